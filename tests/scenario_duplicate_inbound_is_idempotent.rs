mod support;

use std::sync::Arc;

use task_sync::model::{NewTaskFields, TaskDelta};
use task_sync::{bootstrap, Config, NullAlarmScheduler};

use support::FakeTransport;

/// The same inbound `(opId, delta)` delivered twice must be idempotent: the
/// second delivery returns success without a further tasks write.
#[tokio::test]
async fn duplicate_inbound_delivery_is_a_noop_second_time() {
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

    let delta = TaskDelta {
        title: Some("Z".into()),
        title_updated_at: Some(30),
        ..Default::default()
    };

    handles
        .core
        .apply_inbound("op-x".into(), id.clone(), delta.clone())
        .await
        .unwrap();
    let after_first = handles.store.get(&id).await.unwrap().unwrap();
    assert_eq!(after_first.title, "Z");
    assert_eq!(after_first.title_updated_at, 30);

    // Redeliver the identical opId/delta.
    handles
        .core
        .apply_inbound("op-x".into(), id.clone(), delta)
        .await
        .unwrap();
    let after_second = handles.store.get(&id).await.unwrap().unwrap();
    assert_eq!(after_second, after_first);
}
