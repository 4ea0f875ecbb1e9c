mod support;

use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;
use task_sync::model::NewTaskFields;
use task_sync::store::queries;
use task_sync::{bootstrap, Config, NullAlarmScheduler, SyncError};

use support::FakeTransport;

/// An outbox row stuck in SENDING past the stuck threshold is reset to
/// PENDING by the next maintenance tick, and the following drain re-sends
/// it, incrementing `attempts`.
#[tokio::test]
async fn stuck_sending_entry_is_reset_and_resent() {
    let transport = Arc::new(FakeTransport::new());
    let alarms = Arc::new(NullAlarmScheduler);
    let handles = bootstrap(":memory:", transport.clone(), alarms, Config::default()).unwrap();

    handles
        .core
        .create_task(NewTaskFields {
            title: "A".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let pending = handles.store.list_pending_outbox().await.unwrap();
    assert_eq!(pending.len(), 1);
    let op_id = pending[0].op_id;

    // First drain tick: CREATE sends and attempts becomes 1.
    handles.pump.tick().await.unwrap();
    assert_eq!(transport.put_count(), 1);
    let entry = handles
        .store
        .run_txn(false, move |tx| queries::get_outbox(tx, op_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.attempts, 1);

    // Force it back into SENDING with a stale last_attempt_at, simulating a
    // send whose ack never arrived.
    let stale = Utc::now().timestamp_millis() - 6 * 60 * 1000;
    handles
        .store
        .run_txn(false, move |tx| -> Result<(), SyncError> {
            tx.execute(
                "UPDATE outbox SET state = 'SENDING', last_attempt_at = ?1 WHERE op_id = ?2",
                params![stale, op_id as i64],
            )?;
            Ok(())
        })
        .await
        .unwrap();

    // Maintenance tick resets the stuck entry to PENDING and re-drains it.
    handles.maintenance.tick().await.unwrap();

    assert_eq!(transport.put_count(), 2);
    let entry = handles
        .store
        .run_txn(false, move |tx| queries::get_outbox(tx, op_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.attempts, 2);
}
