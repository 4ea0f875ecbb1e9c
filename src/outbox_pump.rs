//! Outbox pump: drains `PENDING` outbox entries through the
//! transport, advancing states and tracking attempts. Single-threaded FIFO
//! drain keyed on the outbox table gives per-task ordering for free; the bus
//! may still reorder operations on different tasks.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::SyncCore;
use crate::error::SyncError;
use crate::model::SyncState;
use crate::store::{queries, Store};
use crate::transport::{BusPath, Transport};
use crate::wire;

#[derive(Clone)]
pub struct OutboxPump {
    store: Store,
    core: SyncCore,
    transport: Arc<dyn Transport>,
    config: Config,
    state_tx: watch::Sender<SyncState>,
}

impl OutboxPump {
    pub fn new(store: Store, core: SyncCore, transport: Arc<dyn Transport>, config: Config) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Idle);
        OutboxPump {
            store,
            core,
            transport,
            config,
            state_tx,
        }
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    /// One full drain tick: reset stuck sends, then FIFO-drain everything
    /// `PENDING`/`SENDING`.
    pub async fn tick(&self) -> Result<(), SyncError> {
        let now = Utc::now().timestamp_millis();
        let threshold = now - self.config.stuck_threshold_ms;
        let reset = self
            .store
            .run_txn(false, move |tx| queries::reset_stuck(tx, threshold))
            .await?;
        if reset > 0 {
            warn!(count = reset, "outbox: reset stuck SENDING entries to PENDING");
        }

        let pending = self.store.list_pending_outbox().await?;
        if pending.is_empty() {
            let _ = self.state_tx.send(SyncState::Idle);
            return Ok(());
        }

        let _ = self.state_tx.send(SyncState::Syncing);
        let mut sent = 0usize;
        let mut failed = 0usize;

        for entry in pending {
            self.core.mark_sending(entry.op_id).await?;
            let now = Utc::now().timestamp_millis();
            let path = BusPath::outbox(&self.config.peer_label_local, entry.op_id);
            let envelope = match wire::build_outbox_envelope(&entry, now) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(op_id = entry.op_id, error = %e, "outbox: failed to build envelope");
                    self.core.mark_failed(entry.op_id, e.to_string()).await?;
                    failed += 1;
                    continue;
                }
            };

            match self.transport.put(&path, &envelope, entry.op_type.urgent()).await {
                Ok(()) => {
                    self.core.mark_sent(entry.op_id).await?;
                    sent += 1;
                }
                Err(e) => {
                    warn!(op_id = entry.op_id, error = %e, "outbox: transient send failure");
                    self.core.mark_failed(entry.op_id, e.to_string()).await?;
                    failed += 1;
                }
            }
        }

        info!(sent, failed, "outbox: drain tick complete");
        let _ = self
            .state_tx
            .send(if failed > 0 { SyncState::Error } else { SyncState::Idle });
        Ok(())
    }

    /// Delete outbox rows that have reached `ACKED`.
    pub async fn delete_acked(&self) -> Result<usize, SyncError> {
        self.store.run_txn(false, |tx| queries::delete_acked(tx)).await
    }

    /// Handle an ack event: transition the op and queue bus cleanup of the
    /// corresponding `/ack/<local>/<opId>` entry.
    pub async fn handle_ack(
        &self,
        op_id: u64,
        success: bool,
        error: Option<String>,
    ) -> Result<(), SyncError> {
        if success {
            self.core.mark_acked(op_id).await?;
        } else {
            self.core
                .mark_failed(op_id, error.unwrap_or_else(|| "peer reported failure".into()))
                .await?;
        }
        let ack_path = BusPath::ack(&self.config.peer_label_local, &op_id.to_string());
        self.transport.delete(&ack_path).await
    }
}
