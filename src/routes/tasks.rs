//! Task mutation routes.
//!
//! Handlers translate JSON bodies into `services::task` calls. Every write
//! is broadcast to the board's streams by the service, not here.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::auth::AuthUser;
use crate::services::task::{self, CreateTask};
use crate::state::AppState;
use crate::storage::{ActivityRecord, Comment, Task, TaskPatch};

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskBody {
    pub group_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Option<Uuid>,
    pub position: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskBody {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<Uuid>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveTaskBody {
    pub target_group_id: Uuid,
    pub target_position: i64,
}

#[derive(Deserialize)]
pub struct CommentBody {
    pub body: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyBody {
    pub blocked_by: Uuid,
}

#[derive(Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependenciesResponse {
    pub task_id: Uuid,
    pub blocked_by: Vec<Uuid>,
}

// =============================================================================
// TASKS
// =============================================================================

/// `POST /api/boards/:id/tasks`: create a task in one of the board's groups.
pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
    Json(body): Json<CreateTaskBody>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let input = CreateTask {
        group_id: body.group_id,
        title: body.title,
        description: body.description,
        assignee_id: body.assignee_id,
        position: body.position,
    };
    let task = task::create_task(&state, &auth.identity, board_id, input).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// `PATCH /api/tasks/:id`: update title, description or assignee.
pub async fn update_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    Json(body): Json<UpdateTaskBody>,
) -> Result<Json<Task>, ApiError> {
    let patch = TaskPatch { title: body.title, description: body.description, assignee_id: body.assignee_id };
    let task = task::update_task(&state, &auth.identity, task_id, patch).await?;
    Ok(Json(task))
}

/// `POST /api/tasks/:id/move`: move within or across groups.
pub async fn move_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    Json(body): Json<MoveTaskBody>,
) -> Result<Json<Task>, ApiError> {
    let task = task::move_task(&state, &auth.identity, task_id, body.target_group_id, body.target_position).await?;
    Ok(Json(task))
}

/// `DELETE /api/tasks/:id`
pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    task::delete_task(&state, &auth.identity, task_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

// =============================================================================
// COMMENTS / ACTIVITY
// =============================================================================

/// `POST /api/tasks/:id/comments`
pub async fn add_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    Json(body): Json<CommentBody>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    let comment = task::add_comment(&state, &auth.identity, task_id, &body.body).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// `GET /api/tasks/:id/activity?limit=N`: newest first.
pub async fn recent_activity(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityRecord>>, ApiError> {
    let records = task::recent_activity(&state, &auth.identity, task_id, query.limit).await?;
    Ok(Json(records))
}

// =============================================================================
// DEPENDENCIES
// =============================================================================

/// `GET /api/tasks/:id/dependencies`
pub async fn list_dependencies(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Json<DependenciesResponse>, ApiError> {
    let blocked_by = task::list_dependencies(&state, &auth.identity, task_id).await?;
    Ok(Json(DependenciesResponse { task_id, blocked_by }))
}

/// `POST /api/tasks/:id/dependencies`: `{"added": false}` if the edge existed.
pub async fn add_dependency(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    Json(body): Json<DependencyBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let added = task::add_dependency(&state, &auth.identity, task_id, body.blocked_by).await?;
    Ok(Json(serde_json::json!({ "added": added })))
}

/// `DELETE /api/tasks/:id/dependencies/:blocker`
pub async fn remove_dependency(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((task_id, blocked_by)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    task::remove_dependency(&state, &auth.identity, task_id, blocked_by).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[cfg(test)]
#[path = "tasks_test.rs"]
mod tests;
