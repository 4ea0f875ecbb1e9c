//! Bus payload codec. The bus itself is a byte-keyed KV store; a
//! payload is semantically a JSON object ("DataMap"), so we use
//! `serde_json::Map` as the in-memory representation and serialize it to
//! bytes only at the `Transport` boundary.

use serde_json::{Map, Value};

use crate::error::SyncError;
use crate::model::{OutboxEntry, OutboxOpType, Task, TaskDelta};

pub type Payload = Map<String, Value>;

fn get_str(p: &Payload, key: &str) -> Option<String> {
    p.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}
fn get_i64(p: &Payload, key: &str) -> Option<i64> {
    p.get(key).and_then(|v| v.as_i64())
}
fn get_bool(p: &Payload, key: &str) -> Option<bool> {
    p.get(key).and_then(|v| v.as_bool())
}

/// The minimal field delta a local mutation needs to tell the peer about.
/// Stored as the outbox row's `payload`; the envelope fields (`opId`,
/// `taskId`, `opType`, `timestamp`) are folded in by the pump at send time,
/// since `opId` is only known once the row has been inserted.
pub fn encode_create(task: &Task) -> Vec<u8> {
    let mut m = Payload::new();
    m.insert("title".into(), Value::String(task.title.clone()));
    m.insert("titleUpdatedAt".into(), Value::from(task.title_updated_at));
    if let Some(notes) = &task.notes {
        m.insert("notes".into(), Value::String(notes.clone()));
    }
    m.insert("notesUpdatedAt".into(), Value::from(task.notes_updated_at));
    m.insert("completed".into(), Value::Bool(task.completed));
    m.insert(
        "completedUpdatedAt".into(),
        Value::from(task.completed_updated_at),
    );
    m.insert("priority".into(), Value::from(task.priority));
    m.insert("dueDate".into(), Value::from(task.due_date.unwrap_or(0)));
    if let Some(peer_id) = task.peer_id {
        m.insert("peerId".into(), Value::from(peer_id));
    }
    serde_json::to_vec(&m).unwrap_or_default()
}

pub fn encode_update_title(title: &str, ts: i64) -> Vec<u8> {
    let mut m = Payload::new();
    m.insert("title".into(), Value::String(title.to_string()));
    m.insert("titleUpdatedAt".into(), Value::from(ts));
    serde_json::to_vec(&m).unwrap_or_default()
}

pub fn encode_update_notes(notes: Option<&str>, ts: i64) -> Vec<u8> {
    let mut m = Payload::new();
    if let Some(notes) = notes {
        m.insert("notes".into(), Value::String(notes.to_string()));
    } else {
        m.insert("notes".into(), Value::Null);
    }
    m.insert("notesUpdatedAt".into(), Value::from(ts));
    serde_json::to_vec(&m).unwrap_or_default()
}

pub fn encode_update_title_and_notes(title: &str, notes: Option<&str>, ts: i64) -> Vec<u8> {
    let mut m = Payload::new();
    m.insert("title".into(), Value::String(title.to_string()));
    m.insert("titleUpdatedAt".into(), Value::from(ts));
    if let Some(notes) = notes {
        m.insert("notes".into(), Value::String(notes.to_string()));
    } else {
        m.insert("notes".into(), Value::Null);
    }
    m.insert("notesUpdatedAt".into(), Value::from(ts));
    serde_json::to_vec(&m).unwrap_or_default()
}

pub fn encode_complete(completed: bool, ts: i64) -> Vec<u8> {
    let mut m = Payload::new();
    m.insert("completed".into(), Value::Bool(completed));
    m.insert("completedUpdatedAt".into(), Value::from(ts));
    serde_json::to_vec(&m).unwrap_or_default()
}

/// Only `dueDate` is wire-synced for a schedule update; `dueTime`,
/// `reminder` and `reminderTime` have no delta key and stay local-only.
pub fn encode_schedule(due_date: Option<i64>) -> Vec<u8> {
    let mut m = Payload::new();
    m.insert("dueDate".into(), Value::from(due_date.unwrap_or(0)));
    serde_json::to_vec(&m).unwrap_or_default()
}

pub fn encode_delete() -> Vec<u8> {
    let mut m = Payload::new();
    m.insert("deleted".into(), Value::Bool(true));
    serde_json::to_vec(&m).unwrap_or_default()
}

/// Fold the envelope fields into a stored delta payload to build the final
/// wire payload for `/outbox/<local>/<opId>`.
pub fn build_outbox_envelope(entry: &OutboxEntry, now: i64) -> Result<Vec<u8>, SyncError> {
    let mut m: Payload = serde_json::from_slice(&entry.payload)?;
    m.insert("opId".into(), Value::from(entry.op_id));
    m.insert("taskId".into(), Value::String(entry.task_id.clone()));
    m.insert(
        "opType".into(),
        Value::String(entry.op_type.as_str().to_string()),
    );
    m.insert("timestamp".into(), Value::from(now));
    Ok(serde_json::to_vec(&m)?)
}

pub fn encode_ack(op_id: &str, success: bool, error: Option<&str>, now: i64) -> Vec<u8> {
    let mut m = Payload::new();
    m.insert("opId".into(), Value::String(op_id.to_string()));
    m.insert("success".into(), Value::Bool(success));
    if let Some(error) = error {
        m.insert("error".into(), Value::String(error.to_string()));
    }
    m.insert("timestamp".into(), Value::from(now));
    serde_json::to_vec(&m).unwrap_or_default()
}

pub fn encode_sync_request(now: i64, nonce: &str) -> Vec<u8> {
    let mut m = Payload::new();
    m.insert("timestamp".into(), Value::from(now));
    m.insert("nonce".into(), Value::String(nonce.to_string()));
    serde_json::to_vec(&m).unwrap_or_default()
}

fn decode_payload(path: &str, bytes: &[u8]) -> Result<Payload, SyncError> {
    let v: Value = serde_json::from_slice(bytes)
        .map_err(|e| SyncError::malformed(path, format!("invalid json: {e}")))?;
    v.as_object()
        .cloned()
        .ok_or_else(|| SyncError::malformed(path, "payload is not a JSON object"))
}

/// Decode an inbound `/ack/...` payload. Returns `(opId, success, error)`.
pub fn decode_ack(path: &str, bytes: &[u8]) -> Result<(String, bool, Option<String>), SyncError> {
    let p = decode_payload(path, bytes)?;
    let op_id = get_str(&p, "opId")
        .or_else(|| get_i64(&p, "opId").map(|n| n.to_string()))
        .ok_or_else(|| SyncError::malformed(path, "missing opId"))?;
    let success =
        get_bool(&p, "success").ok_or_else(|| SyncError::malformed(path, "missing success"))?;
    let error = get_str(&p, "error");
    Ok((op_id, success, error))
}

/// Decode an inbound `/outbox/<peer>/<opId>` or `/tasks/<taskId>` delta
/// payload into a `TaskDelta`. Unknown/absent keys are simply absent fields.
pub fn decode_task_delta(path: &str, bytes: &[u8]) -> Result<TaskDelta, SyncError> {
    let p = decode_payload(path, bytes)?;
    Ok(TaskDelta {
        title: get_str(&p, "title"),
        title_updated_at: get_i64(&p, "titleUpdatedAt"),
        notes: get_str(&p, "notes"),
        notes_updated_at: get_i64(&p, "notesUpdatedAt"),
        completed: get_bool(&p, "completed"),
        completed_updated_at: get_i64(&p, "completedUpdatedAt"),
        deleted: get_bool(&p, "deleted"),
        priority: p.get("priority").and_then(|v| v.as_i64()).map(|n| n as i32),
        due_date: get_i64(&p, "dueDate"),
        peer_id: get_i64(&p, "peerId"),
    })
}

/// Extract just the `timestamp` envelope field, used to derive the
/// deterministic opId for `/tasks/<taskId>` single-task updates.
pub fn decode_timestamp(path: &str, bytes: &[u8]) -> Result<i64, SyncError> {
    let p = decode_payload(path, bytes)?;
    get_i64(&p, "timestamp").ok_or_else(|| SyncError::malformed(path, "missing timestamp"))
}

/// Extract just the `taskId`/`opType`/`timestamp` envelope fields, used by
/// the inbox router before dispatching to `apply_inbound`.
pub fn decode_envelope(
    path: &str,
    bytes: &[u8],
) -> Result<(String, Option<OutboxOpType>, i64), SyncError> {
    let p = decode_payload(path, bytes)?;
    let task_id =
        get_str(&p, "taskId").ok_or_else(|| SyncError::malformed(path, "missing taskId"))?;
    let op_type = get_str(&p, "opType").and_then(|s| OutboxOpType::from_str(&s));
    let timestamp = get_i64(&p, "timestamp").unwrap_or(0);
    Ok((task_id, op_type, timestamp))
}

#[derive(Debug, Clone)]
pub struct SnapshotItem {
    pub task_id: String,
    pub delta: TaskDelta,
}

/// Decode a `/snapshot/tasks` payload: `taskCount`, `snapshotTimestamp`, and
/// `task_<i>_*`-prefixed fields for `i` in `[0, taskCount)`.
pub fn decode_snapshot(path: &str, bytes: &[u8]) -> Result<(i64, Vec<SnapshotItem>), SyncError> {
    let p = decode_payload(path, bytes)?;
    let count = p
        .get("taskCount")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| SyncError::malformed(path, "missing taskCount"))?;
    let snapshot_ts = get_i64(&p, "snapshotTimestamp").unwrap_or(0);

    let mut items = Vec::with_capacity(count.max(0) as usize);
    for i in 0..count {
        let prefix = format!("task_{i}_");
        let task_id = p
            .get(&format!("{prefix}id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| SyncError::malformed(path, format!("missing {prefix}id")))?
            .to_string();
        let delta = TaskDelta {
            title: p.get(&format!("{prefix}title")).and_then(|v| v.as_str()).map(String::from),
            title_updated_at: p.get(&format!("{prefix}titleUpdatedAt")).and_then(|v| v.as_i64()),
            notes: p.get(&format!("{prefix}notes")).and_then(|v| v.as_str()).map(String::from),
            notes_updated_at: p.get(&format!("{prefix}notesUpdatedAt")).and_then(|v| v.as_i64()),
            completed: p.get(&format!("{prefix}completed")).and_then(|v| v.as_bool()),
            completed_updated_at: p
                .get(&format!("{prefix}completedUpdatedAt"))
                .and_then(|v| v.as_i64()),
            deleted: p.get(&format!("{prefix}deleted")).and_then(|v| v.as_bool()),
            priority: p
                .get(&format!("{prefix}priority"))
                .and_then(|v| v.as_i64())
                .map(|n| n as i32),
            due_date: p.get(&format!("{prefix}dueDate")).and_then(|v| v.as_i64()),
            peer_id: p.get(&format!("{prefix}phoneId")).and_then(|v| v.as_i64()),
        };
        items.push(SnapshotItem { task_id, delta });
    }
    Ok((snapshot_ts, items))
}

/// Decode a `/sync/request` payload: `(timestamp, nonce)`.
pub fn decode_sync_request(path: &str, bytes: &[u8]) -> Result<(i64, String), SyncError> {
    let p = decode_payload(path, bytes)?;
    let timestamp = get_i64(&p, "timestamp").unwrap_or(0);
    let nonce =
        get_str(&p, "nonce").ok_or_else(|| SyncError::malformed(path, "missing nonce"))?;
    Ok((timestamp, nonce))
}
