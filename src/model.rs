use serde::{Deserialize, Serialize};

/// A single task shared between the two peers.
///
/// `*_updated_at` fields are per-field HLC surrogates (wall-clock millis);
/// `updated_at` bumps on any write. Invariant: each per-field timestamp is
/// `<= updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub notes: Option<String>,
    pub completed: bool,
    pub priority: i32,
    pub due_date: Option<i64>,
    pub due_time: Option<i64>,
    pub reminder: bool,
    pub reminder_time: Option<i64>,
    pub repeating: bool,
    pub deleted: bool,

    pub title_updated_at: i64,
    pub notes_updated_at: i64,
    pub completed_updated_at: i64,
    pub due_date_updated_at: i64,

    pub updated_at: i64,
    pub synced_at: i64,
    pub dirty: bool,
    pub peer_id: Option<i64>,
}

impl Task {
    pub fn new_local(id: String, title: String, now: i64) -> Self {
        Task {
            id,
            title,
            notes: None,
            completed: false,
            priority: 0,
            due_date: None,
            due_time: None,
            reminder: false,
            reminder_time: None,
            repeating: false,
            deleted: false,
            title_updated_at: now,
            notes_updated_at: now,
            completed_updated_at: now,
            due_date_updated_at: now,
            updated_at: now,
            synced_at: 0,
            dirty: true,
            peer_id: None,
        }
    }
}

/// Fields a caller may set when creating a task locally.
#[derive(Debug, Clone, Default)]
pub struct NewTaskFields {
    pub title: String,
    pub notes: Option<String>,
    pub priority: i32,
    pub due_date: Option<i64>,
    pub due_time: Option<i64>,
    pub reminder: bool,
    pub reminder_time: Option<i64>,
    pub repeating: bool,
}

/// An inbound field delta, as decoded from a bus payload. Every field is
/// optional: absence means "peer did not touch this field".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDelta {
    pub title: Option<String>,
    pub title_updated_at: Option<i64>,
    pub notes: Option<String>,
    pub notes_updated_at: Option<i64>,
    pub completed: Option<bool>,
    pub completed_updated_at: Option<i64>,
    pub deleted: Option<bool>,
    pub priority: Option<i32>,
    pub due_date: Option<i64>,
    pub peer_id: Option<i64>,
}

/// The closed set of outbox operation kinds. Sum type, not a string, so
/// dispatch at the hot path is exhaustive-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxOpType {
    Create,
    Update,
    Delete,
    Complete,
}

impl OutboxOpType {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxOpType::Create => "CREATE",
            OutboxOpType::Update => "UPDATE",
            OutboxOpType::Delete => "DELETE",
            OutboxOpType::Complete => "COMPLETE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CREATE" => Some(OutboxOpType::Create),
            "UPDATE" => Some(OutboxOpType::Update),
            "DELETE" => Some(OutboxOpType::Delete),
            "COMPLETE" => Some(OutboxOpType::Complete),
            _ => None,
        }
    }

    /// CREATE/UPDATE/DELETE/COMPLETE request urgent delivery; batch/
    /// maintenance ops (none modeled as outbox rows today) would not.
    pub fn urgent(self) -> bool {
        true
    }
}

/// Outbox state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxState {
    Pending,
    Sending,
    Sent,
    Acked,
    Failed,
}

impl OutboxState {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxState::Pending => "PENDING",
            OutboxState::Sending => "SENDING",
            OutboxState::Sent => "SENT",
            OutboxState::Acked => "ACKED",
            OutboxState::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OutboxState::Pending),
            "SENDING" => Some(OutboxState::Sending),
            "SENT" => Some(OutboxState::Sent),
            "ACKED" => Some(OutboxState::Acked),
            "FAILED" => Some(OutboxState::Failed),
            _ => None,
        }
    }
}

/// A durable outbox entry awaiting send/ack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub op_id: u64,
    pub task_id: String,
    pub op_type: OutboxOpType,
    pub payload: Vec<u8>,
    pub created_at: i64,
    pub attempts: i32,
    pub state: OutboxState,
    pub last_attempt_at: Option<i64>,
    pub error_message: Option<String>,
}

/// An idempotency-log row: at most one per remote-generated `op_id`.
#[derive(Debug, Clone)]
pub struct ProcessedOp {
    pub op_id: String,
    pub processed_at: i64,
}

/// Singleton UI-preference record; always exactly one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub show_hidden: bool,
    pub show_completed: bool,
    pub filter: String,
    /// Comma-delimited decimal ids, matching the wire/storage encoding.
    pub collapsed_groups: String,
    pub dirty: bool,
    pub synced_at: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            show_hidden: false,
            show_completed: true,
            filter: String::new(),
            collapsed_groups: String::new(),
            dirty: false,
            synced_at: 0,
        }
    }
}

/// An inbound settings delta, symmetric in shape to `TaskDelta`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsDelta {
    pub show_hidden: Option<bool>,
    pub show_completed: Option<bool>,
    pub filter: Option<String>,
    pub collapsed_groups: Option<String>,
}

/// Coarse observable sync state surfaced to the UI. Individual per-operation
/// errors never bubble up; they are recorded on the outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    Idle,
    Syncing,
    Error,
}
