mod support;

use std::sync::Arc;

use task_sync::model::{NewTaskFields, TaskDelta};
use task_sync::{bootstrap, Config, NullAlarmScheduler};

use support::FakeTransport;

/// Inbound A (title update) applies, then inbound B (tombstone) on a
/// different opId hard-deletes the task regardless of timestamps.
#[tokio::test]
async fn tombstone_beats_older_update() {
    let transport = Arc::new(FakeTransport::new());
    let alarms = Arc::new(NullAlarmScheduler);
    let handles = bootstrap(":memory:", transport, alarms, Config::default()).unwrap();

    let id = handles
        .core
        .create_task(NewTaskFields {
            title: "A".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let delta_a = TaskDelta {
        title: Some("A2".into()),
        title_updated_at: Some(20),
        ..Default::default()
    };
    handles
        .core
        .apply_inbound("op-a".into(), id.clone(), delta_a)
        .await
        .unwrap();

    let task = handles.store.get(&id).await.unwrap().unwrap();
    assert_eq!(task.title, "A2");

    let delta_b = TaskDelta {
        deleted: Some(true),
        ..Default::default()
    };
    handles
        .core
        .apply_inbound("op-b".into(), id.clone(), delta_b)
        .await
        .unwrap();

    assert!(handles.store.get(&id).await.unwrap().is_none());
}
