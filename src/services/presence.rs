//! Presence registry: who is streaming each board right now.
//!
//! DESIGN
//! ======
//! One entry per user per board, kept in join order. A user with several
//! tabs open holds one entry with a connection count; the entry goes away
//! when the last of those connections leaves. The registry never emits
//! events; the streaming transport announces presence changes itself.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub display_name: String,
}

struct Slot {
    entry: PresenceEntry,
    connections: usize,
}

#[derive(Default)]
pub struct PresenceRegistry {
    boards: Mutex<HashMap<Uuid, Vec<Slot>>>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Vec<Slot>>> {
        self.boards.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register one connection for `user_id`. Re-joining refreshes the
    /// display name and never duplicates the entry.
    pub fn join(&self, board_id: Uuid, user_id: Uuid, display_name: &str) {
        let mut boards = self.lock();
        let slots = boards.entry(board_id).or_default();
        if let Some(slot) = slots.iter_mut().find(|s| s.entry.user_id == user_id) {
            display_name.clone_into(&mut slot.entry.display_name);
            slot.connections += 1;
            return;
        }
        slots.push(Slot {
            entry: PresenceEntry { user_id, display_name: display_name.to_owned() },
            connections: 1,
        });
    }

    /// Release one connection for `user_id`. Unknown users are ignored.
    pub fn leave(&self, board_id: Uuid, user_id: Uuid) {
        let mut boards = self.lock();
        let Some(slots) = boards.get_mut(&board_id) else {
            return;
        };
        let Some(idx) = slots.iter().position(|s| s.entry.user_id == user_id) else {
            return;
        };
        let remove = match slots.get_mut(idx) {
            Some(slot) => {
                slot.connections = slot.connections.saturating_sub(1);
                slot.connections == 0
            }
            None => false,
        };
        if remove {
            slots.remove(idx);
        }
        if slots.is_empty() {
            boards.remove(&board_id);
        }
    }

    /// Connected users for a board, in join order.
    #[must_use]
    pub fn snapshot(&self, board_id: Uuid) -> Vec<PresenceEntry> {
        self.lock()
            .get(&board_id)
            .map(|slots| slots.iter().map(|s| s.entry.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
