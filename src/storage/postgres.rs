//! Postgres-backed store.
//!
//! DESIGN
//! ======
//! Plain `sqlx::query` / `query_as` with tuple rows. Position batches run in
//! one transaction; the `(group_id, position)` uniqueness constraint is
//! deferred to commit so intermediate shifts inside a batch never trip it.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{
    ActivityAction, ActivityRecord, BoardRow, Comment, GroupRow, Identity, NewActivity, PositionBatch, Store,
    StoreError, Task, TaskPatch, now_ms,
};

type TaskTuple = (Uuid, Uuid, Uuid, String, Option<String>, Option<Uuid>, i32, Option<Uuid>);

const TASK_COLUMNS: &str = "id, board_id, group_id, title, description, assignee_id, position, created_by";

fn task_from_tuple(row: TaskTuple) -> Task {
    let (id, board_id, group_id, title, description, assignee_id, position, created_by) = row;
    Task { id, board_id, group_id, title, description, assignee_id, position, created_by }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn resolve_session(&self, token: &str) -> Result<Option<Identity>, StoreError> {
        let row = sqlx::query(
            r"SELECT u.id, u.name
              FROM sessions s
              JOIN users u ON u.id = s.user_id
              WHERE s.token = $1 AND s.expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Identity { user_id: r.get("id"), display_name: r.get("name") }))
    }

    async fn is_board_member(&self, board_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        let member: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM boards WHERE id = $1 AND owner_id = $2
                UNION ALL
                SELECT 1 FROM board_members WHERE board_id = $1 AND user_id = $2
            )",
        )
        .bind(board_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(member)
    }

    async fn find_board(&self, board_id: Uuid) -> Result<Option<BoardRow>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, String)>("SELECT id, name FROM boards WHERE id = $1")
            .bind(board_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id, name)| BoardRow { id, name }))
    }

    async fn find_group(&self, group_id: Uuid) -> Result<Option<GroupRow>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, String, i32)>(
            "SELECT id, board_id, name, position FROM board_groups WHERE id = $1",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, board_id, name, position)| GroupRow { id, board_id, name, position }))
    }

    async fn find_task(&self, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query_as::<_, TaskTuple>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(task_from_tuple))
    }

    async fn find_siblings(&self, group_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query_as::<_, TaskTuple>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE group_id = $1 ORDER BY position ASC, id ASC"
        ))
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(task_from_tuple).collect())
    }

    async fn apply_position_batch(&self, batch: PositionBatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        if let Some(task_id) = batch.delete {
            let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
                .bind(task_id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Rejected(format!("task {task_id} does not exist")));
            }
        }

        if let Some(task) = &batch.insert {
            sqlx::query(
                "INSERT INTO tasks (id, board_id, group_id, title, description, assignee_id, position, created_by) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(task.id)
            .bind(task.board_id)
            .bind(task.group_id)
            .bind(&task.title)
            .bind(&task.description)
            .bind(task.assignee_id)
            .bind(task.position)
            .bind(task.created_by)
            .execute(&mut *tx)
            .await?;
        }

        for update in &batch.updates {
            let result = sqlx::query("UPDATE tasks SET group_id = $2, position = $3, updated_at = now() WHERE id = $1")
                .bind(update.task_id)
                .bind(update.group_id)
                .bind(update.position)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Rejected(format!("task {} does not exist", update.task_id)));
            }
        }

        // Dropping `tx` on any early return above rolls everything back.
        tx.commit().await?;
        Ok(())
    }

    async fn update_task(&self, task_id: Uuid, patch: &TaskPatch) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query_as::<_, TaskTuple>(&format!(
            "UPDATE tasks SET \
                 title = COALESCE($2, title), \
                 description = CASE WHEN $3 THEN $4 ELSE description END, \
                 assignee_id = CASE WHEN $5 THEN $6 ELSE assignee_id END, \
                 updated_at = now() \
             WHERE id = $1 \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task_id)
        .bind(&patch.title)
        .bind(patch.description.is_some())
        .bind(patch.description.clone().flatten())
        .bind(patch.assignee_id.is_some())
        .bind(patch.assignee_id.flatten())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(task_from_tuple))
    }

    async fn create_activity(&self, entry: NewActivity) -> Result<ActivityRecord, StoreError> {
        let id = Uuid::new_v4();
        let timestamp = now_ms();
        let seq: i64 = sqlx::query_scalar(
            "INSERT INTO activity (id, board_id, subject_id, actor_id, action, details, ts) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING seq",
        )
        .bind(id)
        .bind(entry.board_id)
        .bind(entry.subject_id)
        .bind(entry.actor_id)
        .bind(entry.action.as_str())
        .bind(&entry.details)
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await?;

        Ok(ActivityRecord {
            id,
            board_id: entry.board_id,
            subject_id: entry.subject_id,
            actor_id: entry.actor_id,
            action: entry.action,
            details: entry.details,
            timestamp,
            seq,
        })
    }

    async fn recent_activity(&self, subject_id: Uuid, limit: usize) -> Result<Vec<ActivityRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, (Uuid, Uuid, Uuid, Uuid, String, serde_json::Value, i64, i64)>(
            "SELECT id, board_id, subject_id, actor_id, action, details, ts, seq \
             FROM activity WHERE subject_id = $1 \
             ORDER BY ts DESC, seq DESC LIMIT $2",
        )
        .bind(subject_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, board_id, subject_id, actor_id, action, details, timestamp, seq)| {
                let Some(action) = ActivityAction::parse(&action) else {
                    tracing::warn!(%id, action = %action, "skipping activity row with unknown action");
                    return None;
                };
                Some(ActivityRecord { id, board_id, subject_id, actor_id, action, details, timestamp, seq })
            })
            .collect())
    }

    async fn create_comment(&self, task_id: Uuid, author_id: Uuid, body: &str) -> Result<Comment, StoreError> {
        let comment = Comment { id: Uuid::new_v4(), task_id, author_id, body: body.to_owned(), created_at: now_ms() };
        sqlx::query("INSERT INTO task_comments (id, task_id, author_id, body, created_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(comment.id)
            .bind(comment.task_id)
            .bind(comment.author_id)
            .bind(&comment.body)
            .bind(comment.created_at)
            .execute(&self.pool)
            .await?;
        Ok(comment)
    }

    async fn add_dependency(&self, task_id: Uuid, blocked_by: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO task_dependencies (task_id, blocked_by) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(task_id)
        .bind(blocked_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_dependency(&self, task_id: Uuid, blocked_by: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM task_dependencies WHERE task_id = $1 AND blocked_by = $2")
            .bind(task_id)
            .bind(blocked_by)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_blockers(&self, task_id: Uuid) -> Result<Vec<Uuid>, StoreError> {
        let rows: Vec<Uuid> =
            sqlx::query_scalar("SELECT blocked_by FROM task_dependencies WHERE task_id = $1 ORDER BY blocked_by")
                .bind(task_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "postgres_test.rs"]
mod tests;
