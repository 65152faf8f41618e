//! Storage collaborator: the transactional store behind the board core.
//!
//! ARCHITECTURE
//! ============
//! The collaboration core never talks to Postgres directly. Services go
//! through the `Store` trait, which exposes exactly the reads and writes the
//! core needs: session lookup, membership, sibling lists, one atomic position
//! batch, and the append-only activity log.
//!
//! Two implementations ship with the server:
//! - `postgres::PgStore`: sqlx pool, one transaction per position batch.
//! - `memory::MemoryStore`: mutex-guarded maps for local runs and tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("write rejected: {0}")]
    Rejected(String),
}

// =============================================================================
// ROWS
// =============================================================================

/// Identity resolved from a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: Uuid,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardRow {
    pub id: Uuid,
    pub name: String,
}

/// A column on a board. Owns a densely numbered list of tasks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRow {
    pub id: Uuid,
    pub board_id: Uuid,
    pub name: String,
    pub position: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub board_id: Uuid,
    pub group_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Option<Uuid>,
    pub position: i32,
    pub created_by: Option<Uuid>,
}

/// Partial update for a task. `None` leaves a field untouched; for the
/// nullable fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub assignee_id: Option<Option<Uuid>>,
}

impl TaskPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.assignee_id.is_none()
    }
}

/// New position (and possibly new group) for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionUpdate {
    pub task_id: Uuid,
    pub group_id: Uuid,
    pub position: i32,
}

/// Everything one reconciliation writes. Applied all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct PositionBatch {
    /// Task created by this batch, already carrying its final position.
    pub insert: Option<Task>,
    /// Task removed by this batch.
    pub delete: Option<Uuid>,
    pub updates: Vec<PositionUpdate>,
}

// =============================================================================
// ACTIVITY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    Updated,
    Assigned,
    Moved,
    Deleted,
    Commented,
    DependencyAdded,
    DependencyRemoved,
}

impl ActivityAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Assigned => "assigned",
            Self::Moved => "moved",
            Self::Deleted => "deleted",
            Self::Commented => "commented",
            Self::DependencyAdded => "dependency_added",
            Self::DependencyRemoved => "dependency_removed",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "assigned" => Some(Self::Assigned),
            "moved" => Some(Self::Moved),
            "deleted" => Some(Self::Deleted),
            "commented" => Some(Self::Commented),
            "dependency_added" => Some(Self::DependencyAdded),
            "dependency_removed" => Some(Self::DependencyRemoved),
            _ => None,
        }
    }
}

/// Activity entry before the store assigns id, timestamp and sequence.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub board_id: Uuid,
    pub subject_id: Uuid,
    pub actor_id: Uuid,
    pub action: ActivityAction,
    pub details: serde_json::Value,
}

/// Immutable history entry. `seq` preserves insertion order for timestamp ties.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub id: Uuid,
    pub board_id: Uuid,
    pub subject_id: Uuid,
    pub actor_id: Uuid,
    pub action: ActivityAction,
    pub details: serde_json::Value,
    /// Milliseconds since Unix epoch.
    pub timestamp: i64,
    pub seq: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub task_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: i64,
}

// =============================================================================
// STORE
// =============================================================================

#[async_trait]
pub trait Store: Send + Sync {
    async fn resolve_session(&self, token: &str) -> Result<Option<Identity>, StoreError>;

    async fn is_board_member(&self, board_id: Uuid, user_id: Uuid) -> Result<bool, StoreError>;

    async fn find_board(&self, board_id: Uuid) -> Result<Option<BoardRow>, StoreError>;

    async fn find_group(&self, group_id: Uuid) -> Result<Option<GroupRow>, StoreError>;

    async fn find_task(&self, task_id: Uuid) -> Result<Option<Task>, StoreError>;

    /// Direct children of a group, ordered by position.
    async fn find_siblings(&self, group_id: Uuid) -> Result<Vec<Task>, StoreError>;

    /// Apply one reconciliation atomically. On error nothing is written.
    async fn apply_position_batch(&self, batch: PositionBatch) -> Result<(), StoreError>;

    async fn update_task(&self, task_id: Uuid, patch: &TaskPatch) -> Result<Option<Task>, StoreError>;

    async fn create_activity(&self, entry: NewActivity) -> Result<ActivityRecord, StoreError>;

    /// Newest first; equal timestamps fall back to reverse insertion order.
    async fn recent_activity(&self, subject_id: Uuid, limit: usize) -> Result<Vec<ActivityRecord>, StoreError>;

    async fn create_comment(&self, task_id: Uuid, author_id: Uuid, body: &str) -> Result<Comment, StoreError>;

    /// Returns `false` if the edge already existed.
    async fn add_dependency(&self, task_id: Uuid, blocked_by: Uuid) -> Result<bool, StoreError>;

    /// Returns `false` if there was no such edge.
    async fn remove_dependency(&self, task_id: Uuid, blocked_by: Uuid) -> Result<bool, StoreError>;

    /// Ids of the tasks blocking `task_id`.
    async fn list_blockers(&self, task_id: Uuid) -> Result<Vec<Uuid>, StoreError>;
}

/// Current time as milliseconds since Unix epoch.
pub(crate) fn now_ms() -> i64 {
    let Ok(dur) = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}
