//! Maintenance scheduler: periodic cleanup, retry and alarm rescheduling.
//! Runs on a timer and on explicit "sync now" requests. Every step is
//! idempotent, so a failed tick is simply retried at the next one; partial
//! progress is acceptable.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use crate::alarm::AlarmScheduler;
use crate::config::Config;
use crate::error::SyncError;
use crate::outbox_pump::OutboxPump;
use crate::store::{queries, Store};

pub struct MaintenanceScheduler {
    store: Store,
    pump: OutboxPump,
    alarms: Arc<dyn AlarmScheduler>,
    config: Config,
}

impl MaintenanceScheduler {
    pub fn new(store: Store, pump: OutboxPump, alarms: Arc<dyn AlarmScheduler>, config: Config) -> Self {
        MaintenanceScheduler {
            store,
            pump,
            alarms,
            config,
        }
    }

    /// Run one maintenance tick: reset stuck sends + drain, purge acked
    /// outbox rows, purge aged idempotency-log rows, purge aged tombstones,
    /// and reschedule reminders.
    pub async fn tick(&self) -> Result<(), SyncError> {
        let now = Utc::now().timestamp_millis();

        // Reset stuck sends then drain, both performed by the pump.
        self.pump.tick().await?;

        // Purge acked outbox rows.
        let purged_outbox = self.pump.delete_acked().await?;

        // Purge aged idempotency-log rows.
        let processed_threshold = now - self.config.processed_op_ttl_ms;
        let purged_processed = self
            .store
            .run_txn(false, move |tx| queries::cleanup_old_processed(tx, processed_threshold))
            .await?;

        // Hard-delete synced, aged tombstones.
        let tombstone_threshold = now - self.config.tombstone_ttl_ms;
        let purged_tombstones = self
            .store
            .run_txn(true, move |tx| queries::cleanup_deleted_tasks(tx, tombstone_threshold))
            .await?;

        info!(
            purged_outbox,
            purged_processed, purged_tombstones, "maintenance: cleanup tick complete"
        );

        // Reschedule reminders for tasks due in the future.
        let due = self.store.list_with_reminders(now).await?;
        for task in &due {
            self.alarms.schedule(task).await;
        }

        Ok(())
    }

    /// Run `tick` on `config.maintenance_interval_ms`, forever. A failed tick
    /// is logged and retried at the next interval.
    pub async fn run_forever(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_millis(
            self.config.maintenance_interval_ms.max(1) as u64,
        ));
        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "maintenance: tick failed, will retry next interval");
            }
        }
    }
}
