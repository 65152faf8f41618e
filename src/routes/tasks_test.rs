use super::*;
use axum::http::Method;
use serde_json::json;

use crate::routes::test_helpers::call;
use crate::state::test_helpers::{Seeded, seeded};

async fn create(fx: &Seeded, group_id: Uuid, title: &str) -> serde_json::Value {
    let uri = format!("/api/boards/{}/tasks", fx.board_id);
    let (status, body) = call(
        &fx.state,
        Method::POST,
        &uri,
        Some(&fx.token),
        Some(json!({ "groupId": group_id, "title": title })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

fn id_of(task: &serde_json::Value) -> String {
    task["id"].as_str().unwrap().to_owned()
}

#[test]
fn update_body_distinguishes_null_from_absent() {
    let body: UpdateTaskBody = serde_json::from_value(json!({ "description": null })).unwrap();
    assert_eq!(body.description, Some(None));
    assert_eq!(body.assignee_id, None);
    assert_eq!(body.title, None);

    let body: UpdateTaskBody = serde_json::from_value(json!({ "assigneeId": Uuid::nil() })).unwrap();
    assert_eq!(body.assignee_id, Some(Some(Uuid::nil())));
}

#[tokio::test]
async fn create_requires_a_session() {
    let fx = seeded();
    let uri = format!("/api/boards/{}/tasks", fx.board_id);
    let (status, body) = call(&fx.state, Method::POST, &uri, None, Some(json!({ "groupId": fx.todo, "title": "x" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "E_UNAUTHENTICATED");
}

#[tokio::test]
async fn create_returns_camel_case_task() {
    let fx = seeded();
    let task = create(&fx, fx.todo, "Ship it").await;
    assert_eq!(task["title"], "Ship it");
    assert_eq!(task["groupId"], json!(fx.todo));
    assert_eq!(task["position"], 0);
}

#[tokio::test]
async fn non_member_gets_403() {
    let fx = seeded();
    let (_, token) = fx.outsider("mallory");
    let uri = format!("/api/boards/{}/tasks", fx.board_id);
    let (status, body) = call(&fx.state, Method::POST, &uri, Some(&token), Some(json!({ "groupId": fx.todo, "title": "x" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "E_FORBIDDEN");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn patch_can_clear_description() {
    let fx = seeded();
    let task = create(&fx, fx.todo, "t").await;
    let uri = format!("/api/tasks/{}", id_of(&task));

    let (status, body) = call(&fx.state, Method::PATCH, &uri, Some(&fx.token), Some(json!({ "description": "notes" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["description"], "notes");

    let (status, body) = call(&fx.state, Method::PATCH, &uri, Some(&fx.token), Some(json!({ "description": null }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["description"], serde_json::Value::Null);
    assert_eq!(body["title"], "t");
}

#[tokio::test]
async fn move_returns_clamped_position() {
    let fx = seeded();
    let a = create(&fx, fx.todo, "a").await;
    create(&fx, fx.done, "x").await;

    let uri = format!("/api/tasks/{}/move", id_of(&a));
    let (status, body) = call(
        &fx.state,
        Method::POST,
        &uri,
        Some(&fx.token),
        Some(json!({ "targetGroupId": fx.done, "targetPosition": 42 })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["groupId"], json!(fx.done));
    assert_eq!(body["position"], 1);
}

#[tokio::test]
async fn deleted_task_is_404_but_keeps_its_history() {
    let fx = seeded();
    let task = create(&fx, fx.todo, "gone").await;
    let id = id_of(&task);

    let (status, body) = call(&fx.state, Method::DELETE, &format!("/api/tasks/{id}"), Some(&fx.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, history) =
        call(&fx.state, Method::GET, &format!("/api/tasks/{id}/activity"), Some(&fx.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history[0]["action"], "deleted");

    let (status, body) = call(&fx.state, Method::DELETE, &format!("/api/tasks/{id}"), Some(&fx.token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "E_NOT_FOUND");
}

#[tokio::test]
async fn comment_and_activity_round_trip() {
    let fx = seeded();
    let task = create(&fx, fx.todo, "t").await;
    let id = id_of(&task);

    let (status, comment) = call(
        &fx.state,
        Method::POST,
        &format!("/api/tasks/{id}/comments"),
        Some(&fx.token),
        Some(json!({ "body": "first" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(comment["body"], "first");

    let (status, activity) =
        call(&fx.state, Method::GET, &format!("/api/tasks/{id}/activity?limit=1"), Some(&fx.token), None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = activity.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "commented");
    assert_eq!(entries[0]["subjectId"], json!(id));
}

#[tokio::test]
async fn dependency_routes() {
    let fx = seeded();
    let a = id_of(&create(&fx, fx.todo, "a").await);
    let b = id_of(&create(&fx, fx.todo, "b").await);
    let deps = |task: &str| format!("/api/tasks/{task}/dependencies");

    let (status, body) = call(&fx.state, Method::POST, &deps(&a), Some(&fx.token), Some(json!({ "blockedBy": b }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], true);

    let (status, body) = call(&fx.state, Method::POST, &deps(&b), Some(&fx.token), Some(json!({ "blockedBy": a }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "E_DEPENDENCY_CYCLE");

    let (status, body) = call(&fx.state, Method::GET, &deps(&a), Some(&fx.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blockedBy"], json!([b]));

    let (status, _) = call(&fx.state, Method::DELETE, &format!("{}/{b}", deps(&a)), Some(&fx.token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&fx.state, Method::DELETE, &format!("{}/{b}", deps(&a)), Some(&fx.token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
