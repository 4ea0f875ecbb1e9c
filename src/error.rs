use thiserror::Error;

/// Crate-wide error type, covering the failure taxonomy of the sync engine:
/// store transactions, transport I/O, and malformed wire payloads.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid state: {0}")]
    State(&'static str),

    #[error("transient transport error: {0}")]
    Transport(String),

    #[error("malformed inbound payload at {path}: {reason}")]
    MalformedInboundPayload { path: String, reason: String },

    #[error("outbox op {op_id} failed permanently: {reason}")]
    OutboxFailed { op_id: u64, reason: String },

    #[error("background task join error: {0}")]
    Join(String),
}

impl SyncError {
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::MalformedInboundPayload {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
