use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::error::SyncError;
use crate::model::{OutboxEntry, OutboxOpType, OutboxState, Settings, Task};

/// Raw, synchronous table operations. Every function takes an open
/// transaction so callers can compose several of them into one atomic unit;
/// these are the primitives the merge engine is built on.
pub mod queries {
    use super::*;

    pub fn init_schema(conn: &Connection) -> Result<(), SyncError> {
        conn.execute_batch(
            r#"
PRAGMA journal_mode=WAL;

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    notes TEXT,
    completed INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 0,
    due_date INTEGER,
    due_time INTEGER,
    reminder INTEGER NOT NULL DEFAULT 0,
    reminder_time INTEGER,
    repeating INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0,
    title_updated_at INTEGER NOT NULL,
    notes_updated_at INTEGER NOT NULL,
    completed_updated_at INTEGER NOT NULL,
    due_date_updated_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    synced_at INTEGER NOT NULL DEFAULT 0,
    dirty INTEGER NOT NULL DEFAULT 0,
    peer_id INTEGER UNIQUE
);

CREATE INDEX IF NOT EXISTS idx_tasks_active ON tasks(deleted);
CREATE INDEX IF NOT EXISTS idx_tasks_dirty ON tasks(dirty);
CREATE INDEX IF NOT EXISTS idx_tasks_peer_id ON tasks(peer_id);

CREATE TABLE IF NOT EXISTS outbox (
    op_id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    op_type TEXT NOT NULL CHECK(op_type IN ('CREATE','UPDATE','DELETE','COMPLETE')),
    payload BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL CHECK(state IN ('PENDING','SENDING','SENT','ACKED','FAILED')) DEFAULT 'PENDING',
    last_attempt_at INTEGER,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_outbox_drain ON outbox(state, created_at);
CREATE INDEX IF NOT EXISTS idx_outbox_task ON outbox(task_id, created_at);

CREATE TABLE IF NOT EXISTS processed_ops (
    op_id TEXT PRIMARY KEY,
    processed_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    show_hidden INTEGER NOT NULL DEFAULT 0,
    show_completed INTEGER NOT NULL DEFAULT 1,
    filter TEXT NOT NULL DEFAULT '',
    collapsed_groups TEXT NOT NULL DEFAULT '',
    dirty INTEGER NOT NULL DEFAULT 0,
    synced_at INTEGER NOT NULL DEFAULT 0
);
"#,
        )?;
        conn.execute(
            "INSERT INTO settings(id) VALUES (0) ON CONFLICT(id) DO NOTHING",
            [],
        )?;
        Ok(())
    }

    fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
        Ok(Task {
            id: row.get("id")?,
            title: row.get("title")?,
            notes: row.get("notes")?,
            completed: row.get::<_, i64>("completed")? != 0,
            priority: row.get("priority")?,
            due_date: row.get("due_date")?,
            due_time: row.get("due_time")?,
            reminder: row.get::<_, i64>("reminder")? != 0,
            reminder_time: row.get("reminder_time")?,
            repeating: row.get::<_, i64>("repeating")? != 0,
            deleted: row.get::<_, i64>("deleted")? != 0,
            title_updated_at: row.get("title_updated_at")?,
            notes_updated_at: row.get("notes_updated_at")?,
            completed_updated_at: row.get("completed_updated_at")?,
            due_date_updated_at: row.get("due_date_updated_at")?,
            updated_at: row.get("updated_at")?,
            synced_at: row.get("synced_at")?,
            dirty: row.get::<_, i64>("dirty")? != 0,
            peer_id: row.get("peer_id")?,
        })
    }

    const TASK_COLUMNS: &str = "id, title, notes, completed, priority, due_date, due_time, \
        reminder, reminder_time, repeating, deleted, title_updated_at, notes_updated_at, \
        completed_updated_at, due_date_updated_at, updated_at, synced_at, dirty, peer_id";

    pub fn get_task(tx: &Transaction, id: &str) -> Result<Option<Task>, SyncError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
        Ok(tx
            .query_row(&sql, params![id], row_to_task)
            .optional()?)
    }

    pub fn get_task_by_peer_id(tx: &Transaction, peer_id: i64) -> Result<Option<Task>, SyncError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE peer_id = ?1");
        Ok(tx
            .query_row(&sql, params![peer_id], row_to_task)
            .optional()?)
    }

    /// Duplicate reconciliation fallback: the dirty, not-yet-linked local
    /// task with an identical title.
    pub fn find_dirty_by_title_no_peer(
        tx: &Transaction,
        title: &str,
    ) -> Result<Option<Task>, SyncError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE dirty = 1 AND peer_id IS NULL AND title = ?1 \
             ORDER BY updated_at ASC LIMIT 1"
        );
        Ok(tx
            .query_row(&sql, params![title], row_to_task)
            .optional()?)
    }

    pub fn list_active(tx: &Transaction) -> Result<Vec<Task>, SyncError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE deleted = 0 ORDER BY updated_at DESC");
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_task)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_dirty(tx: &Transaction) -> Result<Vec<Task>, SyncError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE dirty = 1 ORDER BY updated_at ASC");
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_task)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_with_reminders(tx: &Transaction, now: i64) -> Result<Vec<Task>, SyncError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE reminder = 1 AND completed = 0 AND deleted = 0 \
             AND reminder_time IS NOT NULL AND reminder_time > ?1 \
             ORDER BY reminder_time ASC"
        );
        let mut stmt = tx.prepare(&sql)?;
        let rows = stmt.query_map(params![now], row_to_task)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn insert_or_replace_task(tx: &Transaction, t: &Task) -> Result<(), SyncError> {
        tx.execute(
            "INSERT INTO tasks (id, title, notes, completed, priority, due_date, due_time, \
             reminder, reminder_time, repeating, deleted, title_updated_at, notes_updated_at, \
             completed_updated_at, due_date_updated_at, updated_at, synced_at, dirty, peer_id) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19) \
             ON CONFLICT(id) DO UPDATE SET \
               title=excluded.title, notes=excluded.notes, completed=excluded.completed, \
               priority=excluded.priority, due_date=excluded.due_date, due_time=excluded.due_time, \
               reminder=excluded.reminder, reminder_time=excluded.reminder_time, \
               repeating=excluded.repeating, deleted=excluded.deleted, \
               title_updated_at=excluded.title_updated_at, notes_updated_at=excluded.notes_updated_at, \
               completed_updated_at=excluded.completed_updated_at, \
               due_date_updated_at=excluded.due_date_updated_at, \
               updated_at=excluded.updated_at, synced_at=excluded.synced_at, \
               dirty=excluded.dirty, peer_id=excluded.peer_id",
            params![
                t.id,
                t.title,
                t.notes,
                t.completed as i64,
                t.priority,
                t.due_date,
                t.due_time,
                t.reminder as i64,
                t.reminder_time,
                t.repeating as i64,
                t.deleted as i64,
                t.title_updated_at,
                t.notes_updated_at,
                t.completed_updated_at,
                t.due_date_updated_at,
                t.updated_at,
                t.synced_at,
                t.dirty as i64,
                t.peer_id,
            ],
        )?;
        Ok(())
    }

    pub fn set_peer_id(tx: &Transaction, id: &str, peer_id: i64) -> Result<usize, SyncError> {
        Ok(tx.execute(
            "UPDATE tasks SET peer_id = ?2 WHERE id = ?1 AND peer_id IS NULL",
            params![id, peer_id],
        )?)
    }

    pub fn mark_task_synced(tx: &Transaction, id: &str, now: i64) -> Result<usize, SyncError> {
        Ok(tx.execute(
            "UPDATE tasks SET synced_at = ?2, dirty = 0 WHERE id = ?1",
            params![id, now],
        )?)
    }

    pub fn hard_delete_task(tx: &Transaction, id: &str) -> Result<usize, SyncError> {
        Ok(tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])?)
    }

    /// Conditional per-field update, expressed as a single atomic predicate:
    /// the write only takes effect if the incoming timestamp is strictly
    /// newer than the stored one (equal timestamps keep the local value).
    /// `updated_at` is bumped to the max of the two.
    pub fn update_title_if_newer(
        tx: &Transaction,
        id: &str,
        value: &str,
        ts: i64,
    ) -> Result<usize, SyncError> {
        Ok(tx.execute(
            "UPDATE tasks SET title = ?2, title_updated_at = ?3, \
             updated_at = MAX(updated_at, ?3) WHERE id = ?1 AND title_updated_at < ?3",
            params![id, value, ts],
        )?)
    }

    pub fn update_notes_if_newer(
        tx: &Transaction,
        id: &str,
        value: Option<&str>,
        ts: i64,
    ) -> Result<usize, SyncError> {
        Ok(tx.execute(
            "UPDATE tasks SET notes = ?2, notes_updated_at = ?3, \
             updated_at = MAX(updated_at, ?3) WHERE id = ?1 AND notes_updated_at < ?3",
            params![id, value, ts],
        )?)
    }

    pub fn update_completed_if_newer(
        tx: &Transaction,
        id: &str,
        value: bool,
        ts: i64,
    ) -> Result<usize, SyncError> {
        Ok(tx.execute(
            "UPDATE tasks SET completed = ?2, completed_updated_at = ?3, \
             updated_at = MAX(updated_at, ?3) WHERE id = ?1 AND completed_updated_at < ?3",
            params![id, value as i64, ts],
        )?)
    }

    /// Peer-authoritative due-date write: unconditional on a timestamp
    /// comparison, but still guarded so it is a no-op when the value is
    /// unchanged, and tracked with its own surrogate timestamp for symmetry
    /// with the other per-field writes.
    pub fn update_due_date_authoritative(
        tx: &Transaction,
        id: &str,
        value: Option<i64>,
        now: i64,
    ) -> Result<usize, SyncError> {
        Ok(tx.execute(
            "UPDATE tasks SET due_date = ?2, due_date_updated_at = ?3, \
             updated_at = MAX(updated_at, ?3) \
             WHERE id = ?1 AND due_date IS NOT ?2",
            params![id, value, now],
        )?)
    }

    /// Hard-delete tombstones that are synced and have aged past `threshold`.
    pub fn cleanup_deleted_tasks(tx: &Transaction, threshold: i64) -> Result<usize, SyncError> {
        Ok(tx.execute(
            "DELETE FROM tasks WHERE deleted = 1 AND synced_at > 0 AND synced_at < ?1",
            params![threshold],
        )?)
    }

    fn row_to_outbox(row: &Row) -> rusqlite::Result<OutboxEntry> {
        let op_type_s: String = row.get("op_type")?;
        let state_s: String = row.get("state")?;
        Ok(OutboxEntry {
            op_id: row.get::<_, i64>("op_id")? as u64,
            task_id: row.get("task_id")?,
            op_type: OutboxOpType::from_str(&op_type_s).unwrap_or(OutboxOpType::Update),
            payload: row.get("payload")?,
            created_at: row.get("created_at")?,
            attempts: row.get("attempts")?,
            state: OutboxState::from_str(&state_s).unwrap_or(OutboxState::Pending),
            last_attempt_at: row.get("last_attempt_at")?,
            error_message: row.get("error_message")?,
        })
    }

    pub fn insert_outbox(
        tx: &Transaction,
        task_id: &str,
        op_type: OutboxOpType,
        payload: &[u8],
        created_at: i64,
    ) -> Result<u64, SyncError> {
        tx.execute(
            "INSERT INTO outbox (task_id, op_type, payload, created_at, attempts, state) \
             VALUES (?1, ?2, ?3, ?4, 0, 'PENDING')",
            params![task_id, op_type.as_str(), payload, created_at],
        )?;
        Ok(tx.last_insert_rowid() as u64)
    }

    pub fn get_outbox(tx: &Transaction, op_id: u64) -> Result<Option<OutboxEntry>, SyncError> {
        Ok(tx
            .query_row(
                "SELECT op_id, task_id, op_type, payload, created_at, attempts, state, \
                 last_attempt_at, error_message FROM outbox WHERE op_id = ?1",
                params![op_id as i64],
                row_to_outbox,
            )
            .optional()?)
    }

    pub fn list_pending_in_order(tx: &Transaction) -> Result<Vec<OutboxEntry>, SyncError> {
        let mut stmt = tx.prepare(
            "SELECT op_id, task_id, op_type, payload, created_at, attempts, state, \
             last_attempt_at, error_message FROM outbox \
             WHERE state IN ('PENDING','SENDING') ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], row_to_outbox)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn mark_sending(tx: &Transaction, op_id: u64, now: i64) -> Result<usize, SyncError> {
        Ok(tx.execute(
            "UPDATE outbox SET state = 'SENDING', attempts = attempts + 1, last_attempt_at = ?2 \
             WHERE op_id = ?1",
            params![op_id as i64, now],
        )?)
    }

    pub fn mark_sent(tx: &Transaction, op_id: u64) -> Result<usize, SyncError> {
        Ok(tx.execute(
            "UPDATE outbox SET state = 'SENT' WHERE op_id = ?1",
            params![op_id as i64],
        )?)
    }

    pub fn mark_acked(tx: &Transaction, op_id: u64) -> Result<usize, SyncError> {
        Ok(tx.execute(
            "UPDATE outbox SET state = 'ACKED' WHERE op_id = ?1",
            params![op_id as i64],
        )?)
    }

    /// On failure the entry stays `PENDING` for retry unless `attempts` has
    /// reached `ceiling`, in which case it becomes `FAILED` and is excluded
    /// from drain until operator intervention. Returns the resulting state,
    /// or `None` if no row matched `op_id`.
    pub fn mark_failed(
        tx: &Transaction,
        op_id: u64,
        err: &str,
        ceiling: u32,
    ) -> Result<Option<OutboxState>, SyncError> {
        let state: Option<String> = tx
            .query_row(
                "UPDATE outbox SET \
                   state = CASE WHEN attempts >= ?3 THEN 'FAILED' ELSE 'PENDING' END, \
                   error_message = ?2 \
                 WHERE op_id = ?1 RETURNING state",
                params![op_id as i64, err, ceiling],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state.map(|s| OutboxState::from_str(&s).unwrap_or(OutboxState::Pending)))
    }

    pub fn reset_stuck(tx: &Transaction, threshold: i64) -> Result<usize, SyncError> {
        Ok(tx.execute(
            "UPDATE outbox SET state = 'PENDING' \
             WHERE state = 'SENDING' AND last_attempt_at < ?1",
            params![threshold],
        )?)
    }

    pub fn delete_acked(tx: &Transaction) -> Result<usize, SyncError> {
        Ok(tx.execute("DELETE FROM outbox WHERE state = 'ACKED'", [])?)
    }

    pub fn is_processed(tx: &Transaction, op_id: &str) -> Result<bool, SyncError> {
        Ok(tx
            .query_row(
                "SELECT 1 FROM processed_ops WHERE op_id = ?1",
                params![op_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    pub fn mark_processed(tx: &Transaction, op_id: &str, now: i64) -> Result<(), SyncError> {
        tx.execute(
            "INSERT INTO processed_ops (op_id, processed_at) VALUES (?1, ?2) \
             ON CONFLICT(op_id) DO NOTHING",
            params![op_id, now],
        )?;
        Ok(())
    }

    pub fn cleanup_old_processed(tx: &Transaction, threshold: i64) -> Result<usize, SyncError> {
        Ok(tx.execute(
            "DELETE FROM processed_ops WHERE processed_at < ?1",
            params![threshold],
        )?)
    }

    pub fn get_settings(tx: &Transaction) -> Result<Settings, SyncError> {
        Ok(tx.query_row(
            "SELECT show_hidden, show_completed, filter, collapsed_groups, dirty, synced_at \
             FROM settings WHERE id = 0",
            [],
            |row| {
                Ok(Settings {
                    show_hidden: row.get::<_, i64>(0)? != 0,
                    show_completed: row.get::<_, i64>(1)? != 0,
                    filter: row.get(2)?,
                    collapsed_groups: row.get(3)?,
                    dirty: row.get::<_, i64>(4)? != 0,
                    synced_at: row.get(5)?,
                })
            },
        )?)
    }

    pub fn put_settings(tx: &Transaction, s: &Settings) -> Result<(), SyncError> {
        tx.execute(
            "UPDATE settings SET show_hidden=?1, show_completed=?2, filter=?3, \
             collapsed_groups=?4, dirty=?5, synced_at=?6 WHERE id = 0",
            params![
                s.show_hidden as i64,
                s.show_completed as i64,
                s.filter,
                s.collapsed_groups,
                s.dirty as i64,
                s.synced_at,
            ],
        )?;
        Ok(())
    }
}

/// Async-facing handle over a transactional SQLite connection.
///
/// Every public method runs its body inside `spawn_blocking`, holding the
/// connection mutex for the duration of the blocking call; this is the one
/// suspension point the store permits, and it forbids re-entrant
/// transactions from the same logical task by construction (the mutex is
/// only released after commit).
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    tasks_tx: watch::Sender<Vec<Task>>,
}

impl Store {
    pub fn open(path: &str) -> Result<Self, SyncError> {
        let conn = Connection::open(path)?;
        queries::init_schema(&conn)?;
        let initial = {
            let tx = conn.unchecked_transaction()?;
            let tasks = queries::list_active(&tx)?;
            tx.commit()?;
            tasks
        };
        let (tasks_tx, _) = watch::channel(initial);
        Ok(Store {
            conn: Arc::new(Mutex::new(conn)),
            tasks_tx,
        })
    }

    pub fn open_in_memory() -> Result<Self, SyncError> {
        Self::open(":memory:")
    }

    /// Subscribe to the reactive, restartable observation of `list_active()`;
    /// fires at least once after every committed transaction touching tasks.
    pub fn watch_tasks(&self) -> watch::Receiver<Vec<Task>> {
        self.tasks_tx.subscribe()
    }

    /// Run `f` atomically. Either every effect inside `f` commits, or none
    /// do: any error aborts the whole transaction.
    pub async fn run_txn<F, R>(&self, touches_tasks: bool, f: F) -> Result<R, SyncError>
    where
        F: FnOnce(&Transaction) -> Result<R, SyncError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<R, SyncError> {
            let mut guard = conn.blocking_lock();
            debug!("store: begin transaction");
            let tx = guard.unchecked_transaction()?;
            let r = f(&tx)?;
            tx.commit()?;
            debug!("store: committed transaction");
            Ok(r)
        })
        .await
        .map_err(|e| SyncError::Join(e.to_string()))??;

        if touches_tasks {
            self.refresh_tasks_view().await?;
        }
        Ok(result)
    }

    async fn refresh_tasks_view(&self) -> Result<(), SyncError> {
        let conn = self.conn.clone();
        let tasks = tokio::task::spawn_blocking(move || -> Result<Vec<Task>, SyncError> {
            let guard = conn.blocking_lock();
            let tx = guard.unchecked_transaction()?;
            let tasks = queries::list_active(&tx)?;
            tx.commit()?;
            Ok(tasks)
        })
        .await
        .map_err(|e| SyncError::Join(e.to_string()))??;
        let _ = self.tasks_tx.send(tasks);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Task>, SyncError> {
        let id = id.to_string();
        self.run_txn(false, move |tx| queries::get_task(tx, &id)).await
    }

    pub async fn list_active(&self) -> Result<Vec<Task>, SyncError> {
        self.run_txn(false, |tx| queries::list_active(tx)).await
    }

    pub async fn list_dirty(&self) -> Result<Vec<Task>, SyncError> {
        self.run_txn(false, |tx| queries::list_dirty(tx)).await
    }

    pub async fn list_with_reminders(&self, now: i64) -> Result<Vec<Task>, SyncError> {
        self.run_txn(false, move |tx| queries::list_with_reminders(tx, now))
            .await
    }

    pub async fn list_pending_outbox(&self) -> Result<Vec<OutboxEntry>, SyncError> {
        self.run_txn(false, |tx| queries::list_pending_in_order(tx)).await
    }

    pub async fn get_settings(&self) -> Result<Settings, SyncError> {
        self.run_txn(false, |tx| queries::get_settings(tx)).await
    }
}
