//! In-memory store used for local development and tests.
//!
//! DESIGN
//! ======
//! All tables live behind one `std::sync::Mutex`. A position batch is
//! validated in full before any row is touched, and the lock is held across
//! both steps, so a batch lands all-or-nothing like a Postgres transaction.
//! Deleting a task drops its comments and dependency edges, matching the
//! `ON DELETE CASCADE` foreign keys.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    ActivityRecord, BoardRow, Comment, GroupRow, Identity, NewActivity, PositionBatch, Store, StoreError, Task,
    TaskPatch, now_ms,
};

#[derive(Default)]
struct MemoryInner {
    users: HashMap<Uuid, String>,
    sessions: HashMap<String, Uuid>,
    boards: HashMap<Uuid, BoardRow>,
    members: HashSet<(Uuid, Uuid)>,
    groups: HashMap<Uuid, GroupRow>,
    tasks: HashMap<Uuid, Task>,
    activity: Vec<ActivityRecord>,
    next_seq: i64,
    comments: Vec<Comment>,
    /// `(task_id, blocked_by)` edges.
    dependencies: Vec<(Uuid, Uuid)>,
    reject_writes: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // SEEDING
    // =========================================================================

    pub fn seed_user(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().users.insert(id, name.to_owned());
        id
    }

    /// Create a session for `user_id` and return its token.
    pub fn create_session(&self, user_id: Uuid) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.lock().sessions.insert(token.clone(), user_id);
        token
    }

    /// Create a board owned by `owner_id`. The owner becomes a member.
    pub fn seed_board(&self, name: &str, owner_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        let mut inner = self.lock();
        inner.boards.insert(id, BoardRow { id, name: name.to_owned() });
        inner.members.insert((id, owner_id));
        id
    }

    pub fn add_member(&self, board_id: Uuid, user_id: Uuid) {
        self.lock().members.insert((board_id, user_id));
    }

    pub fn seed_group(&self, board_id: Uuid, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let mut inner = self.lock();
        let position = i32::try_from(inner.groups.values().filter(|g| g.board_id == board_id).count()).unwrap_or(i32::MAX);
        inner.groups.insert(id, GroupRow { id, board_id, name: name.to_owned(), position });
        id
    }

    /// Append a task at the end of a group without going through reconciliation.
    pub fn seed_task(&self, group_id: Uuid, title: &str) -> Option<Task> {
        let mut inner = self.lock();
        let board_id = inner.groups.get(&group_id)?.board_id;
        let position = i32::try_from(inner.tasks.values().filter(|t| t.group_id == group_id).count()).ok()?;
        let task = Task {
            id: Uuid::new_v4(),
            board_id,
            group_id,
            title: title.to_owned(),
            description: None,
            assignee_id: None,
            position,
            created_by: None,
        };
        inner.tasks.insert(task.id, task.clone());
        Some(task)
    }

    /// Make position batches, activity and comment writes fail without
    /// writing anything.
    #[cfg(test)]
    pub fn reject_writes(&self, reject: bool) {
        self.lock().reject_writes = reject;
    }
}

/// Check every step of `batch` against the current table without writing.
fn validate_batch(tasks: &HashMap<Uuid, Task>, batch: &PositionBatch) -> Result<(), StoreError> {
    if let Some(task_id) = batch.delete {
        if !tasks.contains_key(&task_id) {
            return Err(StoreError::Rejected(format!("task {task_id} does not exist")));
        }
    }
    if let Some(task) = &batch.insert {
        if tasks.contains_key(&task.id) && batch.delete != Some(task.id) {
            return Err(StoreError::Rejected(format!("task {} already exists", task.id)));
        }
    }
    for update in &batch.updates {
        let inserted = batch.insert.as_ref().is_some_and(|t| t.id == update.task_id);
        let present = tasks.contains_key(&update.task_id) && batch.delete != Some(update.task_id);
        if !inserted && !present {
            return Err(StoreError::Rejected(format!("task {} does not exist", update.task_id)));
        }
    }
    Ok(())
}

/// Write a batch that already passed `validate_batch`.
fn apply_batch(tasks: &mut HashMap<Uuid, Task>, batch: PositionBatch) {
    if let Some(task_id) = batch.delete {
        tasks.remove(&task_id);
    }
    if let Some(task) = batch.insert {
        tasks.insert(task.id, task);
    }
    for update in batch.updates {
        if let Some(task) = tasks.get_mut(&update.task_id) {
            task.group_id = update.group_id;
            task.position = update.position;
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn resolve_session(&self, token: &str) -> Result<Option<Identity>, StoreError> {
        let inner = self.lock();
        Ok(inner.sessions.get(token).and_then(|user_id| {
            inner
                .users
                .get(user_id)
                .map(|name| Identity { user_id: *user_id, display_name: name.clone() })
        }))
    }

    async fn is_board_member(&self, board_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.lock().members.contains(&(board_id, user_id)))
    }

    async fn find_board(&self, board_id: Uuid) -> Result<Option<BoardRow>, StoreError> {
        Ok(self.lock().boards.get(&board_id).cloned())
    }

    async fn find_group(&self, group_id: Uuid) -> Result<Option<GroupRow>, StoreError> {
        Ok(self.lock().groups.get(&group_id).cloned())
    }

    async fn find_task(&self, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self.lock().tasks.get(&task_id).cloned())
    }

    async fn find_siblings(&self, group_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let inner = self.lock();
        let mut siblings: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.group_id == group_id)
            .cloned()
            .collect();
        siblings.sort_by_key(|t| (t.position, t.id));
        Ok(siblings)
    }

    async fn apply_position_batch(&self, batch: PositionBatch) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.reject_writes {
            return Err(StoreError::Rejected("position batch rejected".into()));
        }
        validate_batch(&inner.tasks, &batch)?;

        let deleted = batch.delete;
        apply_batch(&mut inner.tasks, batch);
        if let Some(task_id) = deleted {
            inner
                .dependencies
                .retain(|(task, blocker)| *task != task_id && *blocker != task_id);
            inner.comments.retain(|c| c.task_id != task_id);
        }
        Ok(())
    }

    async fn update_task(&self, task_id: Uuid, patch: &TaskPatch) -> Result<Option<Task>, StoreError> {
        let mut inner = self.lock();
        let Some(task) = inner.tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        if let Some(title) = &patch.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &patch.description {
            task.description.clone_from(description);
        }
        if let Some(assignee_id) = patch.assignee_id {
            task.assignee_id = assignee_id;
        }
        Ok(Some(task.clone()))
    }

    async fn create_activity(&self, entry: NewActivity) -> Result<ActivityRecord, StoreError> {
        let mut inner = self.lock();
        if inner.reject_writes {
            return Err(StoreError::Rejected("activity write rejected".into()));
        }
        inner.next_seq += 1;
        let record = ActivityRecord {
            id: Uuid::new_v4(),
            board_id: entry.board_id,
            subject_id: entry.subject_id,
            actor_id: entry.actor_id,
            action: entry.action,
            details: entry.details,
            timestamp: now_ms(),
            seq: inner.next_seq,
        };
        inner.activity.push(record.clone());
        Ok(record)
    }

    async fn recent_activity(&self, subject_id: Uuid, limit: usize) -> Result<Vec<ActivityRecord>, StoreError> {
        let inner = self.lock();
        let mut records: Vec<ActivityRecord> = inner
            .activity
            .iter()
            .filter(|r| r.subject_id == subject_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.seq.cmp(&a.seq)));
        records.truncate(limit);
        Ok(records)
    }

    async fn create_comment(&self, task_id: Uuid, author_id: Uuid, body: &str) -> Result<Comment, StoreError> {
        let mut inner = self.lock();
        if inner.reject_writes {
            return Err(StoreError::Rejected("comment write rejected".into()));
        }
        let comment = Comment { id: Uuid::new_v4(), task_id, author_id, body: body.to_owned(), created_at: now_ms() };
        inner.comments.push(comment.clone());
        Ok(comment)
    }

    async fn add_dependency(&self, task_id: Uuid, blocked_by: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if inner.dependencies.contains(&(task_id, blocked_by)) {
            return Ok(false);
        }
        inner.dependencies.push((task_id, blocked_by));
        Ok(true)
    }

    async fn remove_dependency(&self, task_id: Uuid, blocked_by: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let before = inner.dependencies.len();
        inner.dependencies.retain(|edge| *edge != (task_id, blocked_by));
        Ok(inner.dependencies.len() != before)
    }

    async fn list_blockers(&self, task_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .lock()
            .dependencies
            .iter()
            .filter(|(task, _)| *task == task_id)
            .map(|(_, blocker)| *blocker)
            .collect())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
