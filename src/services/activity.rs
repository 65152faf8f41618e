//! Activity recorder: append-only history plus the matching board event.
//!
//! Callers record an action only after the mutation it describes is
//! durable. The recorder persists the entry first and emits the event on the
//! owning board only once the entry is stored; if the write fails, nothing
//! is broadcast.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MAX_ACTIVITY_LIMIT;
use crate::event::BoardEvent;
use crate::services::bus::EventBus;
use crate::storage::{ActivityRecord, NewActivity, Store, StoreError};

pub struct ActivityRecorder {
    store: Arc<dyn Store>,
    bus: EventBus,
}

impl ActivityRecorder {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Store `entry`, then emit `event` on `entry.board_id`.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the entry could not be written. No event
    /// is emitted in that case.
    pub async fn record(&self, entry: NewActivity, event: BoardEvent) -> Result<ActivityRecord, StoreError> {
        let record = self.store.create_activity(entry).await.map_err(|e| {
            warn!(error = %e, event = event.kind(), "activity: record failed; event suppressed");
            e
        })?;

        let delivered = self.bus.emit(record.board_id, &event);
        info!(
            board_id = %record.board_id,
            subject_id = %record.subject_id,
            actor_id = %record.actor_id,
            action = record.action.as_str(),
            delivered,
            "activity: recorded"
        );
        Ok(record)
    }

    /// The newest `limit` records for `subject_id`, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub async fn recent(&self, subject_id: Uuid, limit: usize) -> Result<Vec<ActivityRecord>, StoreError> {
        self.store
            .recent_activity(subject_id, limit.clamp(1, MAX_ACTIVITY_LIMIT))
            .await
    }
}

#[cfg(test)]
#[path = "activity_test.rs"]
mod tests;
