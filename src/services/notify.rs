//! Assignment notifications.
//!
//! The task service hands notifications off with `tokio::spawn` and never
//! waits on them; a failed notification is logged and otherwise ignored.

use std::time::Duration;

use uuid::Uuid;

/// Upper bound on one delivery attempt before it counts as failed.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// A user was made assignee of a task by someone else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub target_user_id: Uuid,
    pub subject_title: String,
    pub subject_id: Uuid,
    pub board_id: Uuid,
    pub actor_name: String,
}

// =============================================================================
// NOTIFIER TRAIT
// =============================================================================

/// Delivery channel for assignment notifications. Enables mocking in tests.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`NotifyError`] if the notification could not be delivered.
    async fn notify_assigned(&self, assignment: &Assignment) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Used when no mail channel is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify_assigned(&self, assignment: &Assignment) -> Result<(), NotifyError> {
        tracing::info!(
            target_user_id = %assignment.target_user_id,
            task_id = %assignment.subject_id,
            board_id = %assignment.board_id,
            actor = %assignment.actor_name,
            title = %assignment.subject_title,
            "notify: task assigned"
        );
        Ok(())
    }
}

/// Run one delivery, bounded by `limit`. A notifier that stalls past the
/// limit is reported as a delivery failure.
///
/// # Errors
///
/// Returns the notifier's own error, or [`NotifyError::Delivery`] on timeout.
pub async fn deliver(notifier: &dyn Notifier, assignment: &Assignment, limit: Duration) -> Result<(), NotifyError> {
    match tokio::time::timeout(limit, notifier.notify_assigned(assignment)).await {
        Ok(result) => result,
        Err(_) => Err(NotifyError::Delivery(format!("timed out after {}ms", limit.as_millis()))),
    }
}

#[cfg(test)]
#[path = "notify_test.rs"]
mod tests;
