use super::*;
use crate::event::test_helpers::wire;

fn sample_task() -> Task {
    Task {
        id: Uuid::new_v4(),
        board_id: Uuid::new_v4(),
        group_id: Uuid::new_v4(),
        title: "write tests".into(),
        description: None,
        assignee_id: None,
        position: 2,
        created_by: None,
    }
}

#[tokio::test]
async fn heartbeat_encodes_as_comment_frame() {
    assert_eq!(wire(&StreamFrame::Heartbeat).await, ": heartbeat\n\n");
}

#[tokio::test]
async fn event_encodes_as_data_frame_with_type_tag() {
    let event = BoardEvent::Init {
        connected_users: vec![PresenceEntry { user_id: Uuid::nil(), display_name: "alice".into() }],
    };
    let wire = wire(&StreamFrame::Event(event)).await;

    assert!(wire.starts_with("data: {"));
    assert!(wire.ends_with("}\n\n"));
    let json: serde_json::Value = serde_json::from_str(wire.trim_start_matches("data: ").trim_end()).unwrap();
    assert_eq!(json["type"], "init");
    assert_eq!(json["connectedUsers"][0]["displayName"], "alice");
    assert_eq!(json["connectedUsers"][0]["userId"], Uuid::nil().to_string());
}

#[test]
fn task_moved_payload_uses_camel_case_fields() {
    let task_id = Uuid::new_v4();
    let target_group_id = Uuid::new_v4();
    let actor_id = Uuid::new_v4();
    let event = BoardEvent::TaskMoved {
        task_id,
        from_group_id: Uuid::new_v4(),
        target_group_id,
        target_position: 3,
        actor_id,
    };

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "task:moved");
    assert_eq!(json["taskId"], task_id.to_string());
    assert_eq!(json["targetGroupId"], target_group_id.to_string());
    assert_eq!(json["targetPosition"], 3);
    assert_eq!(json["actorId"], actor_id.to_string());
}

#[test]
fn kind_matches_serialized_type_tag() {
    let task = sample_task();
    let actor_id = Uuid::new_v4();
    let events = vec![
        BoardEvent::Connected { client_id: Uuid::new_v4(), user_id: actor_id },
        BoardEvent::Presence { connected_users: vec![] },
        BoardEvent::TaskCreated { task: task.clone(), actor_id },
        BoardEvent::TaskUpdated { task: task.clone(), actor_id },
        BoardEvent::TaskDeleted { task_id: task.id, group_id: task.group_id, actor_id },
        BoardEvent::DependencyAdded { task_id: task.id, blocked_by: Uuid::new_v4(), actor_id },
    ];

    for event in events {
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
    }
}

#[test]
fn task_created_nests_task_object() {
    let task = sample_task();
    let event = BoardEvent::TaskCreated { task: task.clone(), actor_id: Uuid::new_v4() };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["task"]["title"], "write tests");
    assert_eq!(json["task"]["groupId"], task.group_id.to_string());
    assert_eq!(json["task"]["position"], 2);
}
