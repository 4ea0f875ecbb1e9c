use serde::{Deserialize, Serialize};

/// Recognized runtime options, each with its default effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Time a `SENDING` outbox entry may sit before the pump resets it to `PENDING`.
    pub stuck_threshold_ms: i64,
    /// Interval between maintenance ticks.
    pub maintenance_interval_ms: i64,
    /// TTL for rows in the idempotency log before `cleanup_old` purges them.
    pub processed_op_ttl_ms: i64,
    /// TTL for synced tombstones before `cleanup_deleted` hard-deletes them.
    pub tombstone_ttl_ms: i64,
    /// Path-construction label for this node ("watch" or "phone").
    pub peer_label_local: String,
    /// Path-construction label for the remote node.
    pub peer_label_peer: String,
    /// Ceiling on outbox send attempts before an entry is moved to `FAILED`
    /// and excluded from the drain loop.
    pub outbox_failure_ceiling: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stuck_threshold_ms: 300_000,
            maintenance_interval_ms: 900_000,
            processed_op_ttl_ms: 604_800_000,
            tombstone_ttl_ms: 2_592_000_000,
            peer_label_local: "watch".to_string(),
            peer_label_peer: "phone".to_string(),
            outbox_failure_ceiling: 10,
        }
    }
}
