mod support;

use std::sync::Arc;

use chrono::Utc;
use task_sync::model::{NewTaskFields, TaskDelta};
use task_sync::{bootstrap, Config, NullAlarmScheduler};

use support::FakeTransport;

#[tokio::test]
async fn concurrent_title_notes_edit_merges_both_fields() {
    let transport = Arc::new(FakeTransport::new());
    let alarms = Arc::new(NullAlarmScheduler);
    let handles = bootstrap(":memory:", transport.clone(), alarms, Config::default()).unwrap();

    let id = handles
        .core
        .create_task(NewTaskFields {
            title: "A".into(),
            notes: Some("n1".into()),
            ..Default::default()
        })
        .await
        .unwrap();

    // Local edit moves the title.
    handles.core.update_title(&id, "B".into()).await.unwrap();

    // A remote edit to notes, timestamped comfortably after creation.
    let future = Utc::now().timestamp_millis() + 60_000;
    let delta = TaskDelta {
        notes: Some("n2".into()),
        notes_updated_at: Some(future),
        ..Default::default()
    };
    handles
        .core
        .apply_inbound("remote-op-1".into(), id.clone(), delta)
        .await
        .unwrap();

    let task = handles.store.get(&id).await.unwrap().unwrap();
    assert_eq!(task.title, "B");
    assert_eq!(task.notes.as_deref(), Some("n2"));

    // Two outbox entries exist: the CREATE and the title UPDATE.
    let pending = handles.store.list_pending_outbox().await.unwrap();
    assert_eq!(pending.len(), 2);
}
