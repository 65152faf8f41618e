//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the board's HTTP endpoints: task mutations as JSON
//! routes and the per-board event stream as server-sent events. Every route
//! except `/healthz` requires a session.

pub mod auth;
pub mod stream;
pub mod tasks;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::ApiError;
use crate::services::task::TaskError;
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/boards/{id}/stream", get(stream::board_stream))
        .route("/api/boards/{id}/presence", get(stream::board_presence))
        .route("/api/boards/{id}/tasks", post(tasks::create_task))
        .route("/api/tasks/{id}", patch(tasks::update_task).delete(tasks::delete_task))
        .route("/api/tasks/{id}/move", post(tasks::move_task))
        .route("/api/tasks/{id}/comments", post(tasks::add_comment))
        .route("/api/tasks/{id}/activity", get(tasks::recent_activity))
        .route(
            "/api/tasks/{id}/dependencies",
            get(tasks::list_dependencies).post(tasks::add_dependency),
        )
        .route("/api/tasks/{id}/dependencies/{blocker}", delete(tasks::remove_dependency))
        .route("/healthz", get(healthz))
        .fallback(not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "E_ROUTE_NOT_FOUND", "no such route")
}

pub(crate) fn task_error_status(err: &TaskError) -> StatusCode {
    match err {
        TaskError::Unauthenticated => StatusCode::UNAUTHORIZED,
        TaskError::Forbidden(_) => StatusCode::FORBIDDEN,
        TaskError::NotFound(..) => StatusCode::NOT_FOUND,
        TaskError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        TaskError::Reconciliation(_) | TaskError::DependencyCycle { .. } => StatusCode::CONFLICT,
        TaskError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        let status = task_error_status(&err);
        if status.is_server_error() {
            error!(error = %err, "request failed");
        }
        ApiError::from_code(status, &err)
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
