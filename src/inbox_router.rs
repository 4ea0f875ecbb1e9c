//! Inbox router: demultiplexes bus events by path prefix and dispatches to
//! SyncCore.
//!
//! Event-buffer discipline: the bus may invalidate an event's buffer as soon
//! as the delivery callback returns. Callers MUST hand `on_event` already
//! owned data (`String`/`Vec<u8>`) — by the time it reaches here nothing
//! aliases transport-owned memory, so it is safe to cross the `.await`
//! suspension points below.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::config::Config;
use crate::core::SyncCore;
use crate::error::SyncError;
use crate::outbox_pump::OutboxPump;
use crate::transport::{BusEventType, BusPath, Transport};
use crate::wire;

pub struct InboxRouter {
    core: SyncCore,
    pump: OutboxPump,
    transport: Arc<dyn Transport>,
    config: Config,
}

impl InboxRouter {
    pub fn new(core: SyncCore, pump: OutboxPump, transport: Arc<dyn Transport>, config: Config) -> Self {
        InboxRouter {
            core,
            pump,
            transport,
            config,
        }
    }

    /// Dispatch one bus event. `path` and `payload` must already be owned
    /// (copied out of whatever transport buffer delivered them) by the
    /// caller.
    pub async fn on_event(
        &self,
        _event_type: BusEventType,
        path: String,
        payload: Vec<u8>,
    ) -> Result<(), SyncError> {
        let parsed = BusPath::parse(&path)
            .ok_or_else(|| SyncError::malformed(&path, "unrecognized path"))?;

        match parsed {
            BusPath::Ack { label, op_id } if label == self.config.peer_label_local => {
                let (decoded_op_id, success, error) = wire::decode_ack(&path, &payload)?;
                let op_id: u64 = decoded_op_id.parse().unwrap_or_else(|_| op_id.parse().unwrap_or(0));
                self.pump.handle_ack(op_id, success, error).await
            }

            BusPath::Outbox { label, op_id } if label == self.config.peer_label_peer => {
                let delta = wire::decode_task_delta(&path, &payload)?;
                let (task_id, _op_type, _ts) = wire::decode_envelope(&path, &payload)?;
                self.core
                    .apply_inbound(op_id.clone(), task_id, delta)
                    .await?;

                let now = Utc::now().timestamp_millis();
                let ack_bytes = wire::encode_ack(&op_id, true, None, now);
                let ack_path = BusPath::ack(&self.config.peer_label_peer, &op_id);
                self.transport.put(&ack_path, &ack_bytes, true).await
            }

            BusPath::Task { task_id } => {
                let delta = wire::decode_task_delta(&path, &payload)?;
                let ts = wire::decode_timestamp(&path, &payload).unwrap_or(0);
                let op_id = format!("task:{task_id}:{ts}");
                self.core.apply_inbound(op_id, task_id, delta).await
            }

            BusPath::SnapshotTasks => {
                let (_snapshot_ts, items) = wire::decode_snapshot(&path, &payload)?;
                self.core
                    .apply_snapshot(items, self.config.peer_label_peer.clone())
                    .await
            }

            BusPath::SyncRequest => {
                // The peer is asking for a fresh snapshot. Building and
                // pushing one is an application-level concern (it needs the
                // full active task list re-serialized); this router only
                // validates and logs the request so the host app's
                // snapshot-sender collaborator can react to it.
                let (_ts, _nonce) = wire::decode_sync_request(&path, &payload)?;
                Ok(())
            }

            other => {
                warn!(path, ?other, "inbox: path direction does not match this node");
                Err(SyncError::malformed(&path, "wrong direction for local node"))
            }
        }
    }
}
