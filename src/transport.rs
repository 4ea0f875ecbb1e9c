//! Transport adapter: path scheme and the collaborator trait the pump/router
//! use to talk to the bus. The bus itself — an unreliable, store-and-forward
//! KV transport with at-least-once, eventually-ordered delivery — is an
//! external collaborator; this module only defines the shape the core needs
//! from it.

use async_trait::async_trait;

use crate::error::SyncError;

/// Event kinds the bus delivers to `on_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEventType {
    Changed,
    Deleted,
}

/// The bus's path scheme, parsed into a closed sum type so routing is
/// exhaustive-matched rather than string-compared at the hot path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusPath {
    /// `/outbox/<label>/<opId>` — `label` is either peer_label_local (a
    /// locally queued op) or peer_label_peer (a peer-queued op), and the
    /// caller disambiguates direction against its own config.
    Outbox { label: String, op_id: String },
    /// `/ack/<label>/<opId>`, same label convention as `Outbox`.
    Ack { label: String, op_id: String },
    SnapshotTasks,
    Task { task_id: String },
    SyncRequest,
}

impl BusPath {
    pub fn parse(path: &str) -> Option<BusPath> {
        let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segs.as_slice() {
            ["outbox", label, op_id] => Some(BusPath::Outbox {
                label: label.to_string(),
                op_id: op_id.to_string(),
            }),
            ["ack", label, op_id] => Some(BusPath::Ack {
                label: label.to_string(),
                op_id: op_id.to_string(),
            }),
            ["snapshot", "tasks"] => Some(BusPath::SnapshotTasks),
            ["tasks", task_id] => Some(BusPath::Task {
                task_id: task_id.to_string(),
            }),
            ["sync", "request"] => Some(BusPath::SyncRequest),
            _ => None,
        }
    }

    pub fn outbox(label: &str, op_id: u64) -> String {
        format!("/outbox/{label}/{op_id}")
    }
    pub fn ack(label: &str, op_id: &str) -> String {
        format!("/ack/{label}/{op_id}")
    }
    pub fn snapshot_tasks() -> String {
        "/snapshot/tasks".to_string()
    }
    pub fn task(task_id: &str) -> String {
        format!("/tasks/{task_id}")
    }
    pub fn sync_request() -> String {
        "/sync/request".to_string()
    }
}

/// Collaborator the outbox pump and inbox router use to reach the bus. The
/// bus guarantees at-least-once, eventually-ordered delivery to the remote
/// node; duplicate deliveries are expected and handled by the idempotency
/// log, not here.
///
/// `put`'s `urgent` flag carries the §4.5 step-3 delivery-priority
/// distinction: CREATE/UPDATE/DELETE/COMPLETE outbox ops
/// (`OutboxOpType::urgent`) request urgent delivery, acks unblock the peer's
/// own outbox promptly and are urgent too; a reconnect snapshot request is
/// not time-critical and is sent non-urgently.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn put(&self, path: &str, payload: &[u8], urgent: bool) -> Result<(), SyncError>;
    async fn delete(&self, path: &str) -> Result<(), SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_path_kinds() {
        assert_eq!(
            BusPath::parse("/outbox/watch/123"),
            Some(BusPath::Outbox {
                label: "watch".into(),
                op_id: "123".into()
            })
        );
        assert_eq!(
            BusPath::parse("/ack/phone/abc"),
            Some(BusPath::Ack {
                label: "phone".into(),
                op_id: "abc".into()
            })
        );
        assert_eq!(BusPath::parse("/snapshot/tasks"), Some(BusPath::SnapshotTasks));
        assert_eq!(
            BusPath::parse("/tasks/uuid-1"),
            Some(BusPath::Task {
                task_id: "uuid-1".into()
            })
        );
        assert_eq!(BusPath::parse("/sync/request"), Some(BusPath::SyncRequest));
        assert_eq!(BusPath::parse("/unknown/thing"), None);
    }

    #[test]
    fn builders_round_trip_through_parse() {
        let p = BusPath::outbox("watch", 7);
        assert_eq!(
            BusPath::parse(&p),
            Some(BusPath::Outbox {
                label: "watch".into(),
                op_id: "7".into()
            })
        );
    }
}
