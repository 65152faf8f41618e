//! Position reconciler: dense task ordering within and across groups.
//!
//! DESIGN
//! ======
//! Planning is pure: given the sibling lists and the requested slot, the
//! `plan_*` functions return the new position of every task whose position
//! or group changes. Everything in the affected groups ends up numbered
//! `0..n-1` in order, including groups that had gaps before.
//!
//! Applying a plan is one `Store::apply_position_batch` call, which is
//! all-or-nothing. A rejected batch leaves storage untouched and is reported
//! as `ReconcileError::Rejected`; callers must not emit anything for it.
//!
//! CONCURRENCY
//! ===========
//! Read-plan-write on a group is a critical section. `Reconciler` keeps one
//! async mutex per group and holds it across the whole cycle, taking both
//! locks in id order for cross-group moves. This serializes moves inside one
//! process; several processes writing the same board would additionally
//! need a version check in storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::storage::{PositionBatch, PositionUpdate, Store, StoreError, Task};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),
    #[error("group not found: {0}")]
    GroupNotFound(Uuid),
    #[error("group {group_id} does not belong to board {board_id}")]
    ForeignGroup { group_id: Uuid, board_id: Uuid },
    #[error("position update rejected: {0}")]
    Rejected(StoreError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl ErrorCode for ReconcileError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::TaskNotFound(_) => "E_TASK_NOT_FOUND",
            Self::GroupNotFound(_) => "E_GROUP_NOT_FOUND",
            Self::ForeignGroup { .. } => "E_FOREIGN_GROUP",
            Self::Rejected(_) => "E_RECONCILIATION_FAILED",
            Self::Store(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Store(_))
    }
}

// =============================================================================
// PLANNING
// =============================================================================

/// Result of planning a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionPlan {
    /// Final slot of the inserted or moved task.
    pub position: i32,
    /// Only tasks whose group or position actually changes.
    pub updates: Vec<PositionUpdate>,
}

/// Clamp a requested slot into `[0, len]`.
#[must_use]
pub fn clamp_position(requested: i64, len: usize) -> usize {
    usize::try_from(requested.max(0)).unwrap_or(usize::MAX).min(len)
}

fn to_position(idx: usize) -> i32 {
    i32::try_from(idx).unwrap_or(i32::MAX)
}

fn ordered(siblings: &[Task], exclude: Option<Uuid>) -> Vec<&Task> {
    let mut list: Vec<&Task> = siblings.iter().filter(|t| Some(t.id) != exclude).collect();
    list.sort_by_key(|t| (t.position, t.id));
    list
}

/// Renumber `list` as `0..n-1` in `group_id`, keeping only real changes.
fn densify<'a>(list: impl IntoIterator<Item = &'a Task>, group_id: Uuid) -> Vec<PositionUpdate> {
    list.into_iter()
        .enumerate()
        .filter_map(|(idx, task)| {
            let position = to_position(idx);
            (task.position != position || task.group_id != group_id).then_some(PositionUpdate {
                task_id: task.id,
                group_id,
                position,
            })
        })
        .collect()
}

/// Plan moving `moving` to `target_position` in `target_group_id`.
///
/// `target_siblings` are the current children of the target group (the
/// moving task may or may not be among them). `origin_siblings` are the
/// children of the moving task's current group and are only consulted when
/// the groups differ.
#[must_use]
pub fn plan_move(
    target_siblings: &[Task],
    origin_siblings: &[Task],
    moving: &Task,
    target_group_id: Uuid,
    target_position: i64,
) -> PositionPlan {
    let mut target = ordered(target_siblings, Some(moving.id));
    let idx = clamp_position(target_position, target.len());
    target.insert(idx, moving);

    let mut updates = densify(target, target_group_id);
    if moving.group_id != target_group_id {
        updates.extend(densify(ordered(origin_siblings, Some(moving.id)), moving.group_id));
    }

    PositionPlan { position: to_position(idx), updates }
}

/// Plan inserting a new task at `requested` (end of the group when `None`).
/// The returned updates shift existing siblings only.
#[must_use]
pub fn plan_insert(siblings: &[Task], group_id: Uuid, requested: Option<i64>) -> PositionPlan {
    let list = ordered(siblings, None);
    let idx = requested.map_or(list.len(), |p| clamp_position(p, list.len()));

    let updates = list
        .iter()
        .enumerate()
        .filter_map(|(i, task)| {
            let position = to_position(if i < idx { i } else { i + 1 });
            (task.position != position || task.group_id != group_id).then_some(PositionUpdate {
                task_id: task.id,
                group_id,
                position,
            })
        })
        .collect();

    PositionPlan { position: to_position(idx), updates }
}

/// Plan closing the gap left by removing `removed_id` from its group.
#[must_use]
pub fn plan_remove(siblings: &[Task], group_id: Uuid, removed_id: Uuid) -> Vec<PositionUpdate> {
    densify(ordered(siblings, Some(removed_id)), group_id)
}

// =============================================================================
// GROUP LOCKS
// =============================================================================

#[derive(Default)]
struct GroupLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl GroupLocks {
    /// Lock every group in `groups`, in id order, and hold them until the
    /// returned guards drop.
    async fn acquire(&self, groups: &[Uuid]) -> Vec<OwnedMutexGuard<()>> {
        let mut ids = groups.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mutexes: Vec<Arc<tokio::sync::Mutex<()>>> = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Forget locks nobody is holding or waiting on.
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            ids.iter()
                .map(|id| Arc::clone(locks.entry(*id).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        guards
    }
}

// =============================================================================
// RECONCILER
// =============================================================================

/// Outcome of a successful move.
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    /// The task as stored after the move.
    pub task: Task,
    pub from_group_id: Uuid,
    pub from_position: i32,
    /// Number of tasks whose position or group changed.
    pub changed: usize,
}

/// Fields for a task created through `Reconciler::insert_entity`.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub board_id: Uuid,
    pub group_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    locks: GroupLocks,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, locks: GroupLocks::default() }
    }

    /// Move a task to `target_position` within `target_group_id`.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` / `GroupNotFound` / `ForeignGroup` for bad references,
    /// `Rejected` if storage refuses the batch (nothing was written).
    pub async fn move_entity(
        &self,
        task_id: Uuid,
        target_group_id: Uuid,
        target_position: i64,
    ) -> Result<MoveOutcome, ReconcileError> {
        let target_group = self
            .store
            .find_group(target_group_id)
            .await?
            .ok_or(ReconcileError::GroupNotFound(target_group_id))?;

        let mut origin_group_id = self
            .store
            .find_task(task_id)
            .await?
            .ok_or(ReconcileError::TaskNotFound(task_id))?
            .group_id;

        // The task may change groups while we wait for the locks; retry
        // until the locks we hold cover its current group.
        let (_guards, moving) = loop {
            let guards = self.locks.acquire(&[origin_group_id, target_group_id]).await;
            let current = self
                .store
                .find_task(task_id)
                .await?
                .ok_or(ReconcileError::TaskNotFound(task_id))?;
            if current.group_id == origin_group_id {
                break (guards, current);
            }
            debug!(%task_id, "reconciler: task changed group while locking, retrying");
            origin_group_id = current.group_id;
        };

        if target_group.board_id != moving.board_id {
            return Err(ReconcileError::ForeignGroup { group_id: target_group_id, board_id: moving.board_id });
        }

        let target_siblings = self.store.find_siblings(target_group_id).await?;
        let origin_siblings = if moving.group_id == target_group_id {
            Vec::new()
        } else {
            self.store.find_siblings(moving.group_id).await?
        };

        let plan = plan_move(&target_siblings, &origin_siblings, &moving, target_group_id, target_position);
        let changed = plan.updates.len();
        self.apply(PositionBatch { updates: plan.updates, ..PositionBatch::default() })
            .await?;

        info!(
            %task_id,
            from_group = %moving.group_id,
            to_group = %target_group_id,
            position = plan.position,
            changed,
            "reconciler: task moved"
        );

        let task = Task { group_id: target_group_id, position: plan.position, ..moving.clone() };
        Ok(MoveOutcome { task, from_group_id: moving.group_id, from_position: moving.position, changed })
    }

    /// Create a task at `position` (appended when `None`), shifting siblings.
    ///
    /// # Errors
    ///
    /// `GroupNotFound` / `ForeignGroup` for bad references, `Rejected` if
    /// storage refuses the batch.
    pub async fn insert_entity(&self, new: NewTask, position: Option<i64>) -> Result<Task, ReconcileError> {
        let group = self
            .store
            .find_group(new.group_id)
            .await?
            .ok_or(ReconcileError::GroupNotFound(new.group_id))?;
        if group.board_id != new.board_id {
            return Err(ReconcileError::ForeignGroup { group_id: group.id, board_id: new.board_id });
        }

        let _guards = self.locks.acquire(&[new.group_id]).await;
        let siblings = self.store.find_siblings(new.group_id).await?;
        let plan = plan_insert(&siblings, new.group_id, position);

        let task = Task {
            id: Uuid::new_v4(),
            board_id: new.board_id,
            group_id: new.group_id,
            title: new.title,
            description: new.description,
            assignee_id: new.assignee_id,
            position: plan.position,
            created_by: new.created_by,
        };
        self.apply(PositionBatch { insert: Some(task.clone()), delete: None, updates: plan.updates })
            .await?;

        info!(task_id = %task.id, group_id = %task.group_id, position = task.position, "reconciler: task inserted");
        Ok(task)
    }

    /// Delete a task and close the gap it leaves.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` if the task is gone, `Rejected` if storage refuses the
    /// batch.
    pub async fn remove_entity(&self, task_id: Uuid) -> Result<Task, ReconcileError> {
        let mut group_id = self
            .store
            .find_task(task_id)
            .await?
            .ok_or(ReconcileError::TaskNotFound(task_id))?
            .group_id;

        let (_guards, removed) = loop {
            let guards = self.locks.acquire(&[group_id]).await;
            let current = self
                .store
                .find_task(task_id)
                .await?
                .ok_or(ReconcileError::TaskNotFound(task_id))?;
            if current.group_id == group_id {
                break (guards, current);
            }
            group_id = current.group_id;
        };

        let siblings = self.store.find_siblings(group_id).await?;
        let updates = plan_remove(&siblings, group_id, task_id);
        self.apply(PositionBatch { insert: None, delete: Some(task_id), updates })
            .await?;

        info!(%task_id, %group_id, "reconciler: task removed");
        Ok(removed)
    }

    async fn apply(&self, batch: PositionBatch) -> Result<(), ReconcileError> {
        if batch.insert.is_none() && batch.delete.is_none() && batch.updates.is_empty() {
            debug!("reconciler: nothing to write");
            return Ok(());
        }
        self.store.apply_position_batch(batch).await.map_err(|e| {
            warn!(error = %e, "reconciler: position batch rejected");
            ReconcileError::Rejected(e)
        })
    }
}

#[cfg(test)]
#[path = "reconciler_test.rs"]
mod tests;
