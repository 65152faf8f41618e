use super::*;
use crate::event::test_helpers::wire;
use futures::StreamExt;
use tokio::time::timeout;

const HEARTBEAT: Duration = Duration::from_millis(50);

fn identity(name: &str) -> Identity {
    Identity { user_id: Uuid::new_v4(), display_name: name.to_owned() }
}

async fn next(conn: &mut Connection) -> Option<StreamFrame> {
    timeout(Duration::from_secs(1), conn.next_frame())
        .await
        .expect("frame within 1s")
}

/// Read past `connected`, `init` and this connection's own `presence`.
async fn skip_greeting(conn: &mut Connection) {
    for _ in 0..3 {
        next(conn).await.unwrap();
    }
}

#[tokio::test]
async fn open_sends_connected_then_init_including_self() {
    let bus = EventBus::new();
    let board = Uuid::new_v4();
    let alice = identity("alice");

    let mut conn = Connection::open(&bus, board, &alice, HEARTBEAT, 8);
    assert_eq!(conn.state(), ConnectionState::Open);

    match next(&mut conn).await {
        Some(StreamFrame::Event(BoardEvent::Connected { client_id, user_id })) => {
            assert_eq!(client_id, conn.client_id());
            assert_eq!(user_id, alice.user_id);
        }
        other => panic!("expected connected, got {other:?}"),
    }
    assert_eq!(conn.state(), ConnectionState::Streaming);

    match next(&mut conn).await {
        Some(StreamFrame::Event(BoardEvent::Init { connected_users })) => {
            assert_eq!(connected_users.len(), 1);
            assert_eq!(connected_users[0].user_id, alice.user_id);
            assert_eq!(connected_users[0].display_name, "alice");
        }
        other => panic!("expected init, got {other:?}"),
    }

    assert!(matches!(next(&mut conn).await, Some(StreamFrame::Event(BoardEvent::Presence { .. }))));
}

#[tokio::test]
async fn bus_events_are_forwarded_in_order() {
    let bus = EventBus::new();
    let board = Uuid::new_v4();
    let mut conn = Connection::open(&bus, board, &identity("alice"), Duration::from_secs(60), 8);
    skip_greeting(&mut conn).await;

    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    for task_id in [first, second] {
        bus.emit(board, &BoardEvent::TaskDeleted { task_id, group_id: Uuid::nil(), actor_id: Uuid::nil() });
    }

    for expected in [first, second] {
        match next(&mut conn).await {
            Some(StreamFrame::Event(BoardEvent::TaskDeleted { task_id, .. })) => assert_eq!(task_id, expected),
            other => panic!("expected task:deleted, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn heartbeat_arrives_within_two_intervals() {
    let bus = EventBus::new();
    let mut conn = Connection::open(&bus, Uuid::new_v4(), &identity("alice"), HEARTBEAT, 8);
    skip_greeting(&mut conn).await;

    let frame = timeout(HEARTBEAT * 2, conn.next_frame()).await.unwrap();
    assert_eq!(frame, Some(StreamFrame::Heartbeat));
    assert_eq!(wire(&frame.unwrap()).await, ": heartbeat\n\n");
}

#[tokio::test]
async fn other_users_see_presence_on_open_and_close() {
    let bus = EventBus::new();
    let board = Uuid::new_v4();
    let alice = identity("alice");
    let bob = identity("bob");

    let mut watcher = Connection::open(&bus, board, &alice, Duration::from_secs(60), 8);
    skip_greeting(&mut watcher).await;

    let mut conn = Connection::open(&bus, board, &bob, Duration::from_secs(60), 8);
    match next(&mut watcher).await {
        Some(StreamFrame::Event(BoardEvent::Presence { connected_users })) => assert_eq!(connected_users.len(), 2),
        other => panic!("expected presence, got {other:?}"),
    }

    assert!(conn.close());
    match next(&mut watcher).await {
        Some(StreamFrame::Event(BoardEvent::Presence { connected_users })) => {
            assert_eq!(connected_users.len(), 1);
            assert_eq!(connected_users[0].user_id, alice.user_id);
        }
        other => panic!("expected presence, got {other:?}"),
    }
}

#[tokio::test]
async fn close_is_idempotent_and_releases_once() {
    let bus = EventBus::new();
    let board = Uuid::new_v4();
    let alice = identity("alice");

    // Two tabs for the same user.
    let mut first = Connection::open(&bus, board, &alice, HEARTBEAT, 8);
    let second = Connection::open(&bus, board, &alice, HEARTBEAT, 8);
    assert_eq!(bus.subscriber_count(board), 2);
    assert_eq!(bus.connected_users(board).len(), 1);

    assert!(first.close());
    assert!(!first.close());
    assert_eq!(first.state(), ConnectionState::Closed);
    assert_eq!(first.next_frame().await, None);
    assert_eq!(bus.subscriber_count(board), 1);
    assert_eq!(bus.connected_users(board).len(), 1);

    drop(first);
    assert_eq!(bus.connected_users(board).len(), 1);

    drop(second);
    assert_eq!(bus.subscriber_count(board), 0);
    assert!(bus.connected_users(board).is_empty());
}

#[tokio::test]
async fn full_buffer_evicts_and_ends_stream() {
    let bus = EventBus::new();
    let board = Uuid::new_v4();
    let alice = identity("alice");

    // The connection's own presence event fills the single slot.
    let mut slow = Connection::open(&bus, board, &alice, Duration::from_secs(60), 1);
    let delivered = bus.emit(board, &BoardEvent::Presence { connected_users: vec![] });

    assert_eq!(delivered, 0);
    assert_eq!(bus.subscriber_count(board), 0);
    assert!(bus.connected_users(board).is_empty());

    // Already-queued frames still drain, then the stream ends.
    skip_greeting(&mut slow).await;
    assert_eq!(next(&mut slow).await, None);
    assert_eq!(slow.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn dropping_the_stream_closes_the_connection() {
    let bus = EventBus::new();
    let board = Uuid::new_v4();
    let conn = Connection::open(&bus, board, &identity("alice"), HEARTBEAT, 8);

    let mut stream = Box::pin(conn.into_stream());
    let first = stream.next().await.unwrap();
    let wire = wire(&first).await;
    assert!(wire.starts_with("data: {\"type\":\"connected\""), "{wire}");
    assert!(wire.ends_with("\n\n"));
    assert_eq!(bus.subscriber_count(board), 1);

    drop(stream);
    assert_eq!(bus.subscriber_count(board), 0);
    assert!(bus.connected_users(board).is_empty());
}
