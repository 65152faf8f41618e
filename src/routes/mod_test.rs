use super::*;
use axum::http::Method;

use crate::routes::test_helpers::call;
use crate::state::test_helpers::seeded;
use crate::storage::StoreError;

#[test]
fn task_error_status_mapping() {
    use uuid::Uuid;
    let cases = [
        (TaskError::Unauthenticated, StatusCode::UNAUTHORIZED),
        (TaskError::Forbidden(Uuid::nil()), StatusCode::FORBIDDEN),
        (TaskError::NotFound("task", Uuid::nil()), StatusCode::NOT_FOUND),
        (TaskError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
        (TaskError::Reconciliation(StoreError::Rejected("x".into())), StatusCode::CONFLICT),
        (TaskError::DependencyCycle { task_id: Uuid::nil(), blocked_by: Uuid::nil() }, StatusCode::CONFLICT),
        (TaskError::Storage(StoreError::Rejected("x".into())), StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (err, status) in cases {
        assert_eq!(task_error_status(&err), status, "{err}");
    }
}

#[test]
fn api_error_keeps_task_error_code() {
    let api = ApiError::from(TaskError::Reconciliation(StoreError::Rejected("conflict".into())));
    assert_eq!(api.status, StatusCode::CONFLICT);
    assert_eq!(api.code, "E_RECONCILIATION_FAILED");
    assert!(api.retryable);
}

#[tokio::test]
async fn healthz_needs_no_session() {
    let fx = seeded();
    let (status, _) = call(&fx.state, Method::GET, "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let fx = seeded();
    let (status, body) = call(&fx.state, Method::GET, "/api/nope", Some(&fx.token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "E_ROUTE_NOT_FOUND");
}
