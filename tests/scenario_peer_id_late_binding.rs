mod support;

use std::sync::Arc;

use task_sync::model::{NewTaskFields, TaskDelta};
use task_sync::{bootstrap, Config, NullAlarmScheduler};

use support::FakeTransport;

/// A local task created before its CREATE op is acked is later matched,
/// by title with no peer_id, against a snapshot delta carrying a fresh
/// taskId and a peer_id; the two rows converge to one, peer_id bound.
#[tokio::test]
async fn late_peer_id_binds_to_existing_dirty_task_by_title() {
    let transport = Arc::new(FakeTransport::new());
    let alarms = Arc::new(NullAlarmScheduler);
    let handles = bootstrap(":memory:", transport, alarms, Config::default()).unwrap();

    let local_id = handles
        .core
        .create_task(NewTaskFields {
            title: "Milk".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let before = handles.store.get(&local_id).await.unwrap().unwrap();
    assert!(before.peer_id.is_none());
    assert!(before.dirty);

    // A snapshot item referencing a different taskId arrives before the
    // CREATE op is acked, with a newer title timestamp and a peer_id.
    let fresh_task_id = "remote-assigned-id";
    let delta = TaskDelta {
        title: Some("Milk".into()),
        title_updated_at: Some(before.title_updated_at + 1_000),
        peer_id: Some(42),
        ..Default::default()
    };
    handles
        .core
        .apply_inbound("op-snapshot-1".into(), fresh_task_id.into(), delta)
        .await
        .unwrap();

    // No new row was created under the fresh taskId.
    assert!(handles.store.get(fresh_task_id).await.unwrap().is_none());

    // The original local row now carries the peer_id.
    let after = handles.store.get(&local_id).await.unwrap().unwrap();
    assert_eq!(after.peer_id, Some(42));
    assert_eq!(after.title, "Milk");

    let active = handles.store.list_active().await.unwrap();
    assert_eq!(active.len(), 1);
}
