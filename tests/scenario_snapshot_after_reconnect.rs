mod support;

use std::sync::Arc;

use chrono::Utc;
use task_sync::model::{NewTaskFields, TaskDelta};
use task_sync::wire::SnapshotItem;
use task_sync::{bootstrap, Config, NullAlarmScheduler};

use support::FakeTransport;

/// Three locally dirty tasks exist; a reconnect snapshot arrives naming one
/// of them for deletion and carrying a newer edit for another. Dirty outbox
/// entries for the surviving tasks remain pending to drain; the deleted one
/// is hard-removed.
#[tokio::test]
async fn snapshot_after_reconnect_merges_and_deletes() {
    let transport = Arc::new(FakeTransport::new());
    let alarms = Arc::new(NullAlarmScheduler);
    let handles = bootstrap(":memory:", transport, alarms, Config::default()).unwrap();

    let id_a = handles
        .core
        .create_task(NewTaskFields {
            title: "Alpha".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let id_b = handles
        .core
        .create_task(NewTaskFields {
            title: "Beta".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let id_c = handles
        .core
        .create_task(NewTaskFields {
            title: "Gamma".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let task_b = handles.store.get(&id_b).await.unwrap().unwrap();
    let future = Utc::now().timestamp_millis() + 60_000;

    let snapshot = vec![
        // Alpha: untouched by the snapshot.
        SnapshotItem {
            task_id: id_a.clone(),
            delta: TaskDelta::default(),
        },
        // Beta: a newer title arrives from the peer.
        SnapshotItem {
            task_id: id_b.clone(),
            delta: TaskDelta {
                title: Some("Beta v2".into()),
                title_updated_at: Some(task_b.title_updated_at + 1_000),
                ..Default::default()
            },
        },
        // Gamma: the peer has deleted this task.
        SnapshotItem {
            task_id: id_c.clone(),
            delta: TaskDelta {
                deleted: Some(true),
                ..Default::default()
            },
        },
        // A task the peer knows about that the local node has never seen.
        SnapshotItem {
            task_id: "peer-only-task".into(),
            delta: TaskDelta {
                title: Some("Delta".into()),
                title_updated_at: Some(future),
                peer_id: Some(99),
                ..Default::default()
            },
        },
    ];

    handles
        .core
        .apply_snapshot(snapshot, "phone".into())
        .await
        .unwrap();

    assert_eq!(
        handles.store.get(&id_a).await.unwrap().unwrap().title,
        "Alpha"
    );
    assert_eq!(
        handles.store.get(&id_b).await.unwrap().unwrap().title,
        "Beta v2"
    );
    assert!(handles.store.get(&id_c).await.unwrap().is_none());
    assert!(handles.store.get("peer-only-task").await.unwrap().is_some());

    // The dirty CREATE outbox entries for the surviving local tasks remain
    // pending; they were never touched by snapshot application.
    let pending = handles.store.list_pending_outbox().await.unwrap();
    let pending_task_ids: Vec<&str> = pending.iter().map(|e| e.task_id.as_str()).collect();
    assert!(pending_task_ids.contains(&id_a.as_str()));
    assert!(pending_task_ids.contains(&id_b.as_str()));
    assert!(pending_task_ids.contains(&id_c.as_str()));

    // Snapshot re-delivery is a safe no-op (idempotent, bypassing the
    // processed-op check but re-running merge is a no-op on equal timestamps).
    handles
        .core
        .apply_snapshot(
            vec![SnapshotItem {
                task_id: id_b.clone(),
                delta: TaskDelta {
                    title: Some("Beta v2".into()),
                    title_updated_at: Some(task_b.title_updated_at + 1_000),
                    ..Default::default()
                },
            }],
            "phone".into(),
        )
        .await
        .unwrap();
    assert_eq!(
        handles.store.get(&id_b).await.unwrap().unwrap().title,
        "Beta v2"
    );
}
