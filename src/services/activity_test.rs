use super::*;
use crate::services::bus::DeliveryError;
use crate::storage::ActivityAction;
use crate::storage::memory::MemoryStore;
use std::sync::Mutex;

fn entry(board_id: Uuid, subject_id: Uuid, action: ActivityAction) -> NewActivity {
    NewActivity {
        board_id,
        subject_id,
        actor_id: Uuid::new_v4(),
        action,
        details: serde_json::json!({"n": action.as_str()}),
    }
}

fn deleted_event(task_id: Uuid) -> BoardEvent {
    BoardEvent::TaskDeleted { task_id, group_id: Uuid::new_v4(), actor_id: Uuid::new_v4() }
}

#[tokio::test]
async fn record_persists_then_emits_on_owning_board() {
    let store = Arc::new(MemoryStore::new());
    let bus = EventBus::new();
    let recorder = ActivityRecorder::new(store.clone(), bus.clone());
    let board = Uuid::new_v4();
    let subject = Uuid::new_v4();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = bus.subscribe(
        board,
        move |event: &BoardEvent| {
            sink.lock().unwrap().push(event.clone());
            Ok::<(), DeliveryError>(())
        },
        Uuid::new_v4(),
        "watcher",
    );

    let record = recorder
        .record(entry(board, subject, ActivityAction::Deleted), deleted_event(subject))
        .await
        .unwrap();

    assert_eq!(record.subject_id, subject);
    assert_eq!(record.action, ActivityAction::Deleted);
    {
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], BoardEvent::TaskDeleted { task_id, .. } if task_id == subject));
    }
    assert_eq!(recorder.recent(subject, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_write_suppresses_event() {
    let store = Arc::new(MemoryStore::new());
    let bus = EventBus::new();
    let recorder = ActivityRecorder::new(store.clone(), bus.clone());
    let board = Uuid::new_v4();
    let subject = Uuid::new_v4();

    let count = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&count);
    let _sub = bus.subscribe(
        board,
        move |_: &BoardEvent| {
            *sink.lock().unwrap() += 1;
            Ok(())
        },
        Uuid::new_v4(),
        "watcher",
    );

    store.reject_writes(true);
    let result = recorder
        .record(entry(board, subject, ActivityAction::Created), deleted_event(subject))
        .await;

    assert!(result.is_err());
    assert_eq!(*count.lock().unwrap(), 0);
    store.reject_writes(false);
    assert!(recorder.recent(subject, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn recent_is_newest_first_with_insertion_tiebreak() {
    let store = Arc::new(MemoryStore::new());
    let recorder = ActivityRecorder::new(store, EventBus::new());
    let board = Uuid::new_v4();
    let subject = Uuid::new_v4();

    let actions = [ActivityAction::Created, ActivityAction::Updated, ActivityAction::Moved, ActivityAction::Commented];
    for action in actions {
        recorder
            .record(entry(board, subject, action), deleted_event(subject))
            .await
            .unwrap();
    }
    recorder
        .record(entry(board, Uuid::new_v4(), ActivityAction::Created), deleted_event(subject))
        .await
        .unwrap();

    let recent = recorder.recent(subject, 3).await.unwrap();
    let got: Vec<ActivityAction> = recent.iter().map(|r| r.action).collect();
    assert_eq!(got, vec![ActivityAction::Commented, ActivityAction::Moved, ActivityAction::Updated]);
    assert!(recent.windows(2).all(|w| w[0].seq > w[1].seq));
}

#[tokio::test]
async fn recent_limit_is_at_least_one() {
    let store = Arc::new(MemoryStore::new());
    let recorder = ActivityRecorder::new(store, EventBus::new());
    let board = Uuid::new_v4();
    let subject = Uuid::new_v4();
    for _ in 0..2 {
        recorder
            .record(entry(board, subject, ActivityAction::Updated), deleted_event(subject))
            .await
            .unwrap();
    }

    assert_eq!(recorder.recent(subject, 0).await.unwrap().len(), 1);
}
