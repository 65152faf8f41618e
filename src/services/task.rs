//! Task service: board mutations and their history.
//!
//! DESIGN
//! ======
//! Every mutation runs the same sequence:
//!
//! 1. authorize the actor against the owning board
//! 2. apply the change to storage (ordering changes go through the
//!    reconciler as one atomic batch)
//! 3. record the activity entry, which emits the board event once stored
//!
//! Nothing is recorded or emitted for a write that failed. If the write
//! succeeded but its activity entry could not be stored, the mutation still
//! stands and the caller gets the result; the recorder logs the lost event.

use std::collections::{HashSet, VecDeque};

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::event::BoardEvent;
use crate::services::notify::{self, Assignment};
use crate::services::reconciler::{NewTask, ReconcileError};
use crate::state::AppState;
use crate::storage::{ActivityAction, ActivityRecord, Comment, Identity, NewActivity, StoreError, Task, TaskPatch};

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_COMMENT_LEN: usize = 4_000;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("not a member of board {0}")]
    Forbidden(Uuid),
    #[error("{0} not found: {1}")]
    NotFound(&'static str, Uuid),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("move did not take effect: {0}")]
    Reconciliation(StoreError),
    #[error("task {task_id} cannot be blocked by {blocked_by}: dependency cycle")]
    DependencyCycle { task_id: Uuid, blocked_by: Uuid },
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ErrorCode for TaskError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "E_UNAUTHENTICATED",
            Self::Forbidden(_) => "E_FORBIDDEN",
            Self::NotFound(..) => "E_NOT_FOUND",
            Self::InvalidInput(_) => "E_INVALID_INPUT",
            Self::Reconciliation(_) => "E_RECONCILIATION_FAILED",
            Self::DependencyCycle { .. } => "E_DEPENDENCY_CYCLE",
            Self::Storage(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Reconciliation(_) | Self::Storage(_))
    }
}

impl From<ReconcileError> for TaskError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::TaskNotFound(id) => Self::NotFound("task", id),
            ReconcileError::GroupNotFound(id) => Self::NotFound("group", id),
            ReconcileError::ForeignGroup { group_id, .. } => {
                Self::InvalidInput(format!("group {group_id} is on another board"))
            }
            ReconcileError::Rejected(e) => Self::Reconciliation(e),
            ReconcileError::Store(e) => Self::Storage(e),
        }
    }
}

// =============================================================================
// INPUTS
// =============================================================================

#[derive(Debug, Clone)]
pub struct CreateTask {
    pub group_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Option<Uuid>,
    /// Requested slot; appended when `None`.
    pub position: Option<i64>,
}

// =============================================================================
// AUTHORIZATION
// =============================================================================

/// Require that `board_id` exists and `actor` is a member of it.
///
/// # Errors
///
/// `NotFound` for an unknown board, `Forbidden` for a non-member.
pub async fn authorize_board(state: &AppState, board_id: Uuid, actor: &Identity) -> Result<(), TaskError> {
    if state.store.find_board(board_id).await?.is_none() {
        return Err(TaskError::NotFound("board", board_id));
    }
    if !state.store.is_board_member(board_id, actor.user_id).await? {
        warn!(%board_id, user_id = %actor.user_id, "task: non-member rejected");
        return Err(TaskError::Forbidden(board_id));
    }
    Ok(())
}

async fn authorize_task(state: &AppState, task_id: Uuid, actor: &Identity) -> Result<Task, TaskError> {
    let task = state
        .store
        .find_task(task_id)
        .await?
        .ok_or(TaskError::NotFound("task", task_id))?;
    authorize_board(state, task.board_id, actor).await?;
    Ok(task)
}

fn clean_title(raw: &str) -> Result<String, TaskError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(TaskError::InvalidInput("title must not be empty".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(TaskError::InvalidInput(format!("title exceeds {MAX_TITLE_LEN} characters")));
    }
    Ok(title.to_owned())
}

async fn ensure_assignable(state: &AppState, board_id: Uuid, assignee_id: Uuid) -> Result<(), TaskError> {
    if state.store.is_board_member(board_id, assignee_id).await? {
        Ok(())
    } else {
        Err(TaskError::InvalidInput(format!("user {assignee_id} is not a member of the board")))
    }
}

/// Store the activity entry and emit `event`. A failed record does not undo
/// the mutation; the recorder has already logged it and suppressed the event.
async fn record(state: &AppState, entry: NewActivity, event: BoardEvent) {
    if let Err(e) = state.recorder.record(entry, event).await {
        debug!(error = %e, "task: mutation kept without activity record");
    }
}

fn notify_assigned(state: &AppState, task: &Task, actor: &Identity) {
    let Some(target_user_id) = task.assignee_id else {
        return;
    };
    if target_user_id == actor.user_id {
        return;
    }

    let notifier = state.notifier.clone();
    let assignment = Assignment {
        target_user_id,
        subject_title: task.title.clone(),
        subject_id: task.id,
        board_id: task.board_id,
        actor_name: actor.display_name.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = notify::deliver(notifier.as_ref(), &assignment, notify::DELIVERY_TIMEOUT).await {
            warn!(error = %e, task_id = %assignment.subject_id, "task: assignment notification failed");
        }
    });
}

// =============================================================================
// TASKS
// =============================================================================

/// Create a task in `input.group_id`, shifting later siblings down.
///
/// # Errors
///
/// Authorization errors, `InvalidInput` for a bad title or assignee,
/// `NotFound` for an unknown group, `Reconciliation` if the write was refused.
pub async fn create_task(
    state: &AppState,
    actor: &Identity,
    board_id: Uuid,
    input: CreateTask,
) -> Result<Task, TaskError> {
    authorize_board(state, board_id, actor).await?;
    let title = clean_title(&input.title)?;
    if let Some(assignee_id) = input.assignee_id {
        ensure_assignable(state, board_id, assignee_id).await?;
    }

    let new = NewTask {
        board_id,
        group_id: input.group_id,
        title,
        description: input.description,
        assignee_id: input.assignee_id,
        created_by: Some(actor.user_id),
    };
    let task = state.reconciler.insert_entity(new, input.position).await?;

    info!(task_id = %task.id, %board_id, user_id = %actor.user_id, "task: created");
    record(
        state,
        NewActivity {
            board_id,
            subject_id: task.id,
            actor_id: actor.user_id,
            action: ActivityAction::Created,
            details: json!({ "title": task.title, "groupId": task.group_id, "position": task.position }),
        },
        BoardEvent::TaskCreated { task: task.clone(), actor_id: actor.user_id },
    )
    .await;
    notify_assigned(state, &task, actor);
    Ok(task)
}

/// Apply `patch` to a task's fields.
///
/// Changing the assignee records an `assigned` entry instead of `updated`,
/// and notifies the new assignee unless they made the change themselves.
///
/// # Errors
///
/// Authorization errors, `NotFound`, or `InvalidInput` for an empty patch,
/// a bad title, or an assignee who is not on the board.
pub async fn update_task(state: &AppState, actor: &Identity, task_id: Uuid, patch: TaskPatch) -> Result<Task, TaskError> {
    let before = authorize_task(state, task_id, actor).await?;
    if patch.is_empty() {
        return Err(TaskError::InvalidInput("nothing to update".into()));
    }

    let patch = TaskPatch {
        title: patch.title.as_deref().map(clean_title).transpose()?,
        ..patch
    };
    if let Some(Some(assignee_id)) = patch.assignee_id {
        ensure_assignable(state, before.board_id, assignee_id).await?;
    }

    let task = state
        .store
        .update_task(task_id, &patch)
        .await?
        .ok_or(TaskError::NotFound("task", task_id))?;

    let reassigned = task.assignee_id != before.assignee_id;
    let mut fields = Vec::new();
    if patch.title.is_some() {
        fields.push("title");
    }
    if patch.description.is_some() {
        fields.push("description");
    }
    if patch.assignee_id.is_some() {
        fields.push("assigneeId");
    }

    info!(%task_id, user_id = %actor.user_id, ?fields, "task: updated");
    record(
        state,
        NewActivity {
            board_id: task.board_id,
            subject_id: task.id,
            actor_id: actor.user_id,
            action: if reassigned { ActivityAction::Assigned } else { ActivityAction::Updated },
            details: json!({
                "fields": fields,
                "previousAssigneeId": before.assignee_id,
                "assigneeId": task.assignee_id,
            }),
        },
        BoardEvent::TaskUpdated { task: task.clone(), actor_id: actor.user_id },
    )
    .await;

    if reassigned {
        notify_assigned(state, &task, actor);
    }
    Ok(task)
}

/// Move a task to `target_position` in `target_group_id`.
///
/// The emitted `task:moved` event carries the clamped final position. A move
/// onto the task's current slot changes nothing and emits nothing.
///
/// # Errors
///
/// Authorization errors, `NotFound`, `InvalidInput` for a group on another
/// board, or `Reconciliation` if storage refused the batch. Nothing is
/// emitted for a failed move.
pub async fn move_task(
    state: &AppState,
    actor: &Identity,
    task_id: Uuid,
    target_group_id: Uuid,
    target_position: i64,
) -> Result<Task, TaskError> {
    authorize_task(state, task_id, actor).await?;
    let outcome = state
        .reconciler
        .move_entity(task_id, target_group_id, target_position)
        .await?;
    if outcome.changed == 0 {
        return Ok(outcome.task);
    }

    let task = outcome.task;
    record(
        state,
        NewActivity {
            board_id: task.board_id,
            subject_id: task.id,
            actor_id: actor.user_id,
            action: ActivityAction::Moved,
            details: json!({
                "fromGroupId": outcome.from_group_id,
                "fromPosition": outcome.from_position,
                "toGroupId": task.group_id,
                "toPosition": task.position,
            }),
        },
        BoardEvent::TaskMoved {
            task_id: task.id,
            from_group_id: outcome.from_group_id,
            target_group_id: task.group_id,
            target_position: task.position,
            actor_id: actor.user_id,
        },
    )
    .await;
    Ok(task)
}

/// Delete a task and close the gap it leaves in its group.
///
/// # Errors
///
/// Authorization errors, `NotFound`, or `Reconciliation` if the batch was
/// refused.
pub async fn delete_task(state: &AppState, actor: &Identity, task_id: Uuid) -> Result<Task, TaskError> {
    authorize_task(state, task_id, actor).await?;
    let removed = state.reconciler.remove_entity(task_id).await?;

    info!(%task_id, user_id = %actor.user_id, "task: deleted");
    record(
        state,
        NewActivity {
            board_id: removed.board_id,
            subject_id: removed.id,
            actor_id: actor.user_id,
            action: ActivityAction::Deleted,
            details: json!({ "title": removed.title, "groupId": removed.group_id }),
        },
        BoardEvent::TaskDeleted { task_id: removed.id, group_id: removed.group_id, actor_id: actor.user_id },
    )
    .await;
    Ok(removed)
}

// =============================================================================
// COMMENTS
// =============================================================================

/// # Errors
///
/// Authorization errors, `NotFound`, or `InvalidInput` for an empty or
/// oversized body.
pub async fn add_comment(state: &AppState, actor: &Identity, task_id: Uuid, body: &str) -> Result<Comment, TaskError> {
    let task = authorize_task(state, task_id, actor).await?;
    let body = body.trim();
    if body.is_empty() {
        return Err(TaskError::InvalidInput("comment must not be empty".into()));
    }
    if body.chars().count() > MAX_COMMENT_LEN {
        return Err(TaskError::InvalidInput(format!("comment exceeds {MAX_COMMENT_LEN} characters")));
    }

    let comment = state.store.create_comment(task_id, actor.user_id, body).await?;
    record(
        state,
        NewActivity {
            board_id: task.board_id,
            subject_id: task_id,
            actor_id: actor.user_id,
            action: ActivityAction::Commented,
            details: json!({ "commentId": comment.id }),
        },
        BoardEvent::CommentAdded { comment: comment.clone(), actor_id: actor.user_id },
    )
    .await;
    Ok(comment)
}

// =============================================================================
// DEPENDENCIES
// =============================================================================

/// Whether `from` is already blocked, directly or transitively, by `target`.
async fn blocked_transitively(state: &AppState, from: Uuid, target: Uuid) -> Result<bool, TaskError> {
    let mut seen = HashSet::from([from]);
    let mut queue = VecDeque::from([from]);
    while let Some(current) = queue.pop_front() {
        for blocker in state.store.list_blockers(current).await? {
            if blocker == target {
                return Ok(true);
            }
            if seen.insert(blocker) {
                queue.push_back(blocker);
            }
        }
    }
    Ok(false)
}

/// Mark `task_id` as blocked by `blocked_by`. Returns `false` if the edge
/// already existed, in which case nothing is recorded.
///
/// # Errors
///
/// Authorization errors, `NotFound` for either task, `InvalidInput` for a
/// blocker on another board, `DependencyCycle` if the edge would close a
/// loop (including a task blocking itself).
pub async fn add_dependency(
    state: &AppState,
    actor: &Identity,
    task_id: Uuid,
    blocked_by: Uuid,
) -> Result<bool, TaskError> {
    let task = authorize_task(state, task_id, actor).await?;
    if task_id == blocked_by {
        return Err(TaskError::DependencyCycle { task_id, blocked_by });
    }
    let blocker = state
        .store
        .find_task(blocked_by)
        .await?
        .ok_or(TaskError::NotFound("task", blocked_by))?;
    if blocker.board_id != task.board_id {
        return Err(TaskError::InvalidInput(format!("task {blocked_by} is on another board")));
    }
    if blocked_transitively(state, blocked_by, task_id).await? {
        return Err(TaskError::DependencyCycle { task_id, blocked_by });
    }

    if !state.store.add_dependency(task_id, blocked_by).await? {
        return Ok(false);
    }
    record(
        state,
        NewActivity {
            board_id: task.board_id,
            subject_id: task_id,
            actor_id: actor.user_id,
            action: ActivityAction::DependencyAdded,
            details: json!({ "blockedBy": blocked_by }),
        },
        BoardEvent::DependencyAdded { task_id, blocked_by, actor_id: actor.user_id },
    )
    .await;
    Ok(true)
}

/// # Errors
///
/// Authorization errors, or `NotFound` if there is no such edge.
pub async fn remove_dependency(
    state: &AppState,
    actor: &Identity,
    task_id: Uuid,
    blocked_by: Uuid,
) -> Result<(), TaskError> {
    let task = authorize_task(state, task_id, actor).await?;
    if !state.store.remove_dependency(task_id, blocked_by).await? {
        return Err(TaskError::NotFound("dependency", blocked_by));
    }
    record(
        state,
        NewActivity {
            board_id: task.board_id,
            subject_id: task_id,
            actor_id: actor.user_id,
            action: ActivityAction::DependencyRemoved,
            details: json!({ "blockedBy": blocked_by }),
        },
        BoardEvent::DependencyRemoved { task_id, blocked_by, actor_id: actor.user_id },
    )
    .await;
    Ok(())
}

/// Ids of the tasks directly blocking `task_id`.
///
/// # Errors
///
/// Authorization errors or `NotFound`.
pub async fn list_dependencies(state: &AppState, actor: &Identity, task_id: Uuid) -> Result<Vec<Uuid>, TaskError> {
    authorize_task(state, task_id, actor).await?;
    Ok(state.store.list_blockers(task_id).await?)
}

// =============================================================================
// ACTIVITY
// =============================================================================

/// Newest-first history for a task. `limit` defaults to the configured value.
///
/// History outlives the task: once it is deleted, access is checked against
/// the board its activity was recorded on.
///
/// # Errors
///
/// Authorization errors, or `NotFound` if the task never had any history.
pub async fn recent_activity(
    state: &AppState,
    actor: &Identity,
    task_id: Uuid,
    limit: Option<usize>,
) -> Result<Vec<ActivityRecord>, TaskError> {
    let limit = limit.unwrap_or(state.config.activity_default_limit);

    if state.store.find_task(task_id).await?.is_some() {
        authorize_task(state, task_id, actor).await?;
        return Ok(state.recorder.recent(task_id, limit).await?);
    }

    let records = state.recorder.recent(task_id, limit).await?;
    let Some(board_id) = records.first().map(|r| r.board_id) else {
        return Err(TaskError::NotFound("task", task_id));
    };
    authorize_board(state, board_id, actor).await?;
    Ok(records)
}

#[cfg(test)]
#[path = "task_test.rs"]
mod tests;
