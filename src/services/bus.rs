//! Board event bus: per-board subscriber registry and synchronous fan-out.
//!
//! DESIGN
//! ======
//! `EventBus` is a cheap-to-clone handle around one shared registry. Each
//! board maps to its subscribers in registration order. `emit` snapshots the
//! subscriber list under the lock, releases it, then calls every listener,
//! so listeners may subscribe, cancel or emit re-entrantly without
//! deadlocking or mutating the list mid-iteration.
//!
//! Subscribing also joins the presence registry, and removing a subscriber
//! leaves it. Removal happens exactly once per subscriber, whichever comes
//! first: the handle being cancelled, or the bus evicting a failed listener.
//!
//! ERROR HANDLING
//! ==============
//! A listener that returns an error or panics is evicted and delivery moves
//! on to the next subscriber. One broken connection never stops a board's
//! fan-out.
//!
//! SCALING
//! =======
//! Fan-out reaches subscribers in this process only. Running several
//! instances means publishing from `emit` to a shared broadcast channel and
//! having each instance subscribe to it and fan out locally; the
//! `subscribe` / `emit` signatures stay the same.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::event::BoardEvent;
use crate::services::presence::{PresenceEntry, PresenceRegistry};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("subscriber channel closed")]
    Closed,
    #[error("subscriber buffer full")]
    Full,
    #[error("listener failed: {0}")]
    Listener(String),
}

/// Callback invoked for each event on a subscribed board.
pub type Listener = Arc<dyn Fn(&BoardEvent) -> Result<(), DeliveryError> + Send + Sync>;

struct Subscriber {
    id: u64,
    user_id: Uuid,
    listener: Listener,
}

struct BusInner {
    boards: Mutex<HashMap<Uuid, Vec<Subscriber>>>,
    presence: PresenceRegistry,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// BUS
// =============================================================================

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                boards: Mutex::new(HashMap::new()),
                presence: PresenceRegistry::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Vec<Subscriber>>> {
        self.inner.boards.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `listener` for every event emitted on `board_id` from now on
    /// and mark the user present. There is no replay of earlier events.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, board_id: Uuid, listener: F, user_id: Uuid, display_name: &str) -> Subscription
    where
        F: Fn(&BoardEvent) -> Result<(), DeliveryError> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut boards = self.lock();
            boards
                .entry(board_id)
                .or_default()
                .push(Subscriber { id, user_id, listener: Arc::new(listener) });
            self.inner.presence.join(board_id, user_id, display_name);
        }
        debug!(%board_id, %user_id, subscription = id, "bus: subscribed");
        Subscription { bus: self.clone(), board_id, id, cancelled: AtomicBool::new(false) }
    }

    /// Deliver `event` to every current subscriber of `board_id`, in
    /// registration order. Returns how many listeners accepted it.
    pub fn emit(&self, board_id: Uuid, event: &BoardEvent) -> usize {
        let targets: Vec<(u64, Listener)> = {
            let boards = self.lock();
            let Some(subscribers) = boards.get(&board_id) else {
                return 0;
            };
            subscribers
                .iter()
                .map(|s| (s.id, Arc::clone(&s.listener)))
                .collect()
        };

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, listener) in targets {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(event)))
                .unwrap_or_else(|_| Err(DeliveryError::Listener("listener panicked".into())));
            match outcome {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(%board_id, subscription = id, event = event.kind(), error = %e, "bus: delivery failed");
                    failed.push(id);
                }
            }
        }

        for id in failed {
            self.remove(board_id, id);
        }
        delivered
    }

    /// Users currently connected to `board_id`.
    #[must_use]
    pub fn connected_users(&self, board_id: Uuid) -> Vec<PresenceEntry> {
        self.inner.presence.snapshot(board_id)
    }

    #[must_use]
    pub fn subscriber_count(&self, board_id: Uuid) -> usize {
        self.lock().get(&board_id).map_or(0, Vec::len)
    }

    /// Remove one subscriber and its presence. Returns `false` if it was
    /// already gone.
    fn remove(&self, board_id: Uuid, id: u64) -> bool {
        let mut boards = self.lock();
        let Some(subscribers) = boards.get_mut(&board_id) else {
            return false;
        };
        let Some(idx) = subscribers.iter().position(|s| s.id == id) else {
            return false;
        };
        let removed = subscribers.remove(idx);
        if subscribers.is_empty() {
            boards.remove(&board_id);
        }
        self.inner.presence.leave(board_id, removed.user_id);
        debug!(%board_id, user_id = %removed.user_id, subscription = id, "bus: unsubscribed");
        true
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Handle for one registered listener. Cancelling is idempotent and only
/// ever removes this handle's own entry. Dropping the handle cancels it.
pub struct Subscription {
    bus: EventBus,
    board_id: Uuid,
    id: u64,
    cancelled: AtomicBool,
}

impl Subscription {
    /// Unsubscribe. Returns `true` only for the call that actually removed
    /// the listener; later calls, or calls after the bus evicted a failed
    /// listener, return `false` and change nothing.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.bus.remove(self.board_id, self.id)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("board_id", &self.board_id)
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
#[path = "bus_test.rs"]
mod tests;
