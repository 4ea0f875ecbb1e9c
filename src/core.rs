//! SyncCore: wraps Store + Merge. Every local mutation writes
//! the task *and* enqueues an outbox entry inside one transaction. Every
//! inbound operation is applied through Merge inside one transaction guarded
//! by the idempotency log.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::Transaction;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::alarm::AlarmScheduler;
use crate::config::Config;
use crate::error::SyncError;
use crate::merge::{self, FieldWrites, MergeOutcome};
use crate::model::{NewTaskFields, OutboxOpType, OutboxState, Settings, SettingsDelta, Task, TaskDelta};
use crate::store::{queries, Store};
use crate::wire;
use crate::wire::SnapshotItem;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Clone)]
pub struct SyncCore {
    store: Store,
    alarms: Arc<dyn AlarmScheduler>,
    config: Config,
}

impl SyncCore {
    pub fn new(store: Store, alarms: Arc<dyn AlarmScheduler>, config: Config) -> Self {
        SyncCore {
            store,
            alarms,
            config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ---- Local-mutation API -------------------------------------------------

    pub async fn create_task(&self, fields: NewTaskFields) -> Result<String, SyncError> {
        let id = Uuid::new_v4().to_string();
        let created_id = id.clone();
        let task = self
            .store
            .run_txn(true, move |tx| -> Result<Task, SyncError> {
                let now = now_ms();
                let mut task = Task::new_local(created_id.clone(), fields.title, now);
                task.notes = fields.notes;
                task.priority = fields.priority;
                task.due_date = fields.due_date;
                task.due_time = fields.due_time;
                task.reminder = fields.reminder;
                task.reminder_time = fields.reminder_time;
                task.repeating = fields.repeating;

                queries::insert_or_replace_task(tx, &task)?;
                queries::insert_outbox(
                    tx,
                    &task.id,
                    OutboxOpType::Create,
                    &wire::encode_create(&task),
                    now,
                )?;
                Ok(task)
            })
            .await?;

        if task.reminder {
            self.alarms.schedule(&task).await;
        }
        Ok(id)
    }

    pub async fn update_title(&self, id: &str, title: String) -> Result<(), SyncError> {
        let task_id = id.to_string();
        self.store
            .run_txn(true, move |tx| -> Result<(), SyncError> {
                let now = now_ms();
                let mut task = load_for_local_write(tx, &task_id)?;
                task.title = title;
                task.title_updated_at = now;
                task.updated_at = now;
                task.dirty = true;
                queries::insert_or_replace_task(tx, &task)?;
                queries::insert_outbox(
                    tx,
                    &task.id,
                    OutboxOpType::Update,
                    &wire::encode_update_title(&task.title, now),
                    now,
                )?;
                Ok(())
            })
            .await
    }

    pub async fn update_notes(&self, id: &str, notes: Option<String>) -> Result<(), SyncError> {
        let task_id = id.to_string();
        self.store
            .run_txn(true, move |tx| -> Result<(), SyncError> {
                let now = now_ms();
                let mut task = load_for_local_write(tx, &task_id)?;
                task.notes = notes;
                task.notes_updated_at = now;
                task.updated_at = now;
                task.dirty = true;
                queries::insert_or_replace_task(tx, &task)?;
                queries::insert_outbox(
                    tx,
                    &task.id,
                    OutboxOpType::Update,
                    &wire::encode_update_notes(task.notes.as_deref(), now),
                    now,
                )?;
                Ok(())
            })
            .await
    }

    pub async fn update_title_and_notes(
        &self,
        id: &str,
        title: String,
        notes: Option<String>,
    ) -> Result<(), SyncError> {
        let task_id = id.to_string();
        self.store
            .run_txn(true, move |tx| -> Result<(), SyncError> {
                let now = now_ms();
                let mut task = load_for_local_write(tx, &task_id)?;
                task.title = title;
                task.title_updated_at = now;
                task.notes = notes;
                task.notes_updated_at = now;
                task.updated_at = now;
                task.dirty = true;
                queries::insert_or_replace_task(tx, &task)?;
                queries::insert_outbox(
                    tx,
                    &task.id,
                    OutboxOpType::Update,
                    &wire::encode_update_title_and_notes(&task.title, task.notes.as_deref(), now),
                    now,
                )?;
                Ok(())
            })
            .await
    }

    pub async fn set_completed(&self, id: &str, completed: bool) -> Result<(), SyncError> {
        let task_id = id.to_string();
        self.store
            .run_txn(true, move |tx| -> Result<(), SyncError> {
                let now = now_ms();
                let mut task = load_for_local_write(tx, &task_id)?;
                task.completed = completed;
                task.completed_updated_at = now;
                task.updated_at = now;
                task.dirty = true;
                queries::insert_or_replace_task(tx, &task)?;
                queries::insert_outbox(
                    tx,
                    &task.id,
                    OutboxOpType::Complete,
                    &wire::encode_complete(completed, now),
                    now,
                )?;
                Ok(())
            })
            .await?;

        if completed {
            self.alarms.cancel(id).await;
        }
        Ok(())
    }

    pub async fn update_schedule(
        &self,
        id: &str,
        due_date: Option<i64>,
        due_time: Option<i64>,
        reminder: bool,
        reminder_time: Option<i64>,
    ) -> Result<(), SyncError> {
        let task_id = id.to_string();
        let task = self
            .store
            .run_txn(true, move |tx| -> Result<Task, SyncError> {
                let now = now_ms();
                let mut task = load_for_local_write(tx, &task_id)?;
                task.due_date = due_date;
                task.due_date_updated_at = now;
                task.due_time = due_time;
                task.reminder = reminder;
                task.reminder_time = reminder_time;
                task.updated_at = now;
                task.dirty = true;
                queries::insert_or_replace_task(tx, &task)?;
                queries::insert_outbox(
                    tx,
                    &task.id,
                    OutboxOpType::Update,
                    &wire::encode_schedule(due_date),
                    now,
                )?;
                Ok(task)
            })
            .await?;

        if task.reminder {
            self.alarms.schedule(&task).await;
        } else {
            self.alarms.cancel(&task.id).await;
        }
        Ok(())
    }

    pub async fn delete_task(&self, id: &str) -> Result<(), SyncError> {
        let task_id = id.to_string();
        self.store
            .run_txn(true, move |tx| -> Result<(), SyncError> {
                let now = now_ms();
                let mut task = load_for_local_write(tx, &task_id)?;
                task.deleted = true;
                task.updated_at = now;
                task.dirty = true;
                queries::insert_or_replace_task(tx, &task)?;
                queries::insert_outbox(
                    tx,
                    &task.id,
                    OutboxOpType::Delete,
                    &wire::encode_delete(),
                    now,
                )?;
                Ok(())
            })
            .await?;

        self.alarms.cancel(id).await;
        Ok(())
    }

    // ---- Inbound-apply API --------------------------------------------------

    /// Idempotent in `op_id`: re-delivering the same `(op_id, delta)` is a
    /// no-op after the first successful apply.
    pub async fn apply_inbound(
        &self,
        op_id: String,
        task_id: String,
        delta: TaskDelta,
    ) -> Result<(), SyncError> {
        self.store
            .run_txn(true, move |tx| -> Result<(), SyncError> {
                let now = now_ms();
                if queries::is_processed(tx, &op_id)? {
                    debug!(op_id, "apply_inbound: duplicate delivery, skipping");
                    return Ok(());
                }
                apply_delta(tx, &task_id, &delta, now)?;
                queries::mark_processed(tx, &op_id, now)?;
                Ok(())
            })
            .await
    }

    /// Applies each snapshot item through merge with a deterministic
    /// `opId = "snapshot:" + taskId + ":" + peerLabel`. Bypasses the
    /// processed-op check (re-delivery must be safe, not merely skipped):
    /// re-running merge on equal timestamps is already a no-op.
    pub async fn apply_snapshot(
        &self,
        items: Vec<SnapshotItem>,
        peer_label: String,
    ) -> Result<(), SyncError> {
        self.store
            .run_txn(true, move |tx| -> Result<(), SyncError> {
                let now = now_ms();
                for item in &items {
                    let op_id = format!("snapshot:{}:{}", item.task_id, peer_label);
                    apply_delta(tx, &item.task_id, &item.delta, now)?;
                    queries::mark_processed(tx, &op_id, now)?;
                }
                Ok(())
            })
            .await
    }

    /// Asymmetric settings merge: peer settings are applied only when local
    /// is not dirty; unlike tasks, there is no per-field LWW here.
    pub async fn apply_inbound_settings(&self, delta: SettingsDelta) -> Result<(), SyncError> {
        self.store
            .run_txn(false, move |tx| -> Result<(), SyncError> {
                let now = now_ms();
                let mut settings = queries::get_settings(tx)?;
                if settings.dirty {
                    debug!("apply_inbound_settings: local settings dirty, dropping inbound");
                    return Ok(());
                }
                if let Some(v) = delta.show_hidden {
                    settings.show_hidden = v;
                }
                if let Some(v) = delta.show_completed {
                    settings.show_completed = v;
                }
                if let Some(v) = delta.filter {
                    settings.filter = v;
                }
                if let Some(v) = delta.collapsed_groups {
                    settings.collapsed_groups = v;
                }
                settings.synced_at = now;
                queries::put_settings(tx, &settings)?;
                Ok(())
            })
            .await
    }

    pub async fn update_settings_local(
        &self,
        mutate: impl FnOnce(&mut Settings) + Send + 'static,
    ) -> Result<(), SyncError> {
        self.store
            .run_txn(false, move |tx| -> Result<(), SyncError> {
                let mut settings = queries::get_settings(tx)?;
                mutate(&mut settings);
                settings.dirty = true;
                queries::put_settings(tx, &settings)?;
                Ok(())
            })
            .await
    }

    // ---- Outbox-state transitions API (called by the pump) -----------------

    pub async fn mark_sending(&self, op_id: u64) -> Result<(), SyncError> {
        self.store
            .run_txn(false, move |tx| {
                queries::mark_sending(tx, op_id, now_ms()).map(|_| ())
            })
            .await
    }

    pub async fn mark_sent(&self, op_id: u64) -> Result<(), SyncError> {
        self.store
            .run_txn(false, move |tx| queries::mark_sent(tx, op_id).map(|_| ()))
            .await
    }

    pub async fn mark_acked(&self, op_id: u64) -> Result<(), SyncError> {
        self.store
            .run_txn(false, move |tx| queries::mark_acked(tx, op_id).map(|_| ()))
            .await
    }

    pub async fn mark_failed(&self, op_id: u64, err: String) -> Result<(), SyncError> {
        let ceiling = self.config.outbox_failure_ceiling;
        self.store
            .run_txn(false, move |tx| {
                match queries::mark_failed(tx, op_id, &err, ceiling)? {
                    Some(OutboxState::Failed) => {
                        // Ceiling reached: the row is now excluded from drain
                        // until operator intervention. Surfaced as the
                        // taxonomy's UnrecoverableOutbox case, not bubbled to
                        // the caller (the transition itself must commit).
                        let unrecoverable = SyncError::OutboxFailed { op_id, reason: err };
                        warn!(error = %unrecoverable, "outbox: op permanently failed");
                    }
                    Some(_) => {}
                    None => warn!(op_id, "mark_failed: no matching outbox row"),
                }
                Ok(())
            })
            .await
    }
}

fn load_for_local_write(tx: &Transaction, id: &str) -> Result<Task, SyncError> {
    queries::get_task(tx, id)?.ok_or(SyncError::State("task not found"))
}

/// Resolve `local` by id, then by peer_id, then by the dirty+title fallback
/// (duplicate reconciliation), run merge, and apply the decided writes.
/// Shared by `apply_inbound` and `apply_snapshot`.
fn apply_delta(
    tx: &Transaction,
    task_id: &str,
    delta: &TaskDelta,
    now: i64,
) -> Result<(), SyncError> {
    let local = resolve_local(tx, task_id, delta)?;

    match merge::merge(local.as_ref(), delta, now) {
        MergeOutcome::Delete => {
            if let Some(local) = &local {
                queries::hard_delete_task(tx, &local.id)?;
            }
        }
        MergeOutcome::Insert(mut task) => {
            task.id = task_id.to_string();
            queries::insert_or_replace_task(tx, &task)?;
        }
        MergeOutcome::Apply(writes) => {
            let local = local.ok_or(SyncError::State(
                "merge produced an Apply outcome with no local row",
            ))?;
            apply_field_writes(tx, &local.id, &writes, now)?;
        }
    }
    Ok(())
}

fn resolve_local(
    tx: &Transaction,
    task_id: &str,
    delta: &TaskDelta,
) -> Result<Option<Task>, SyncError> {
    if let Some(found) = queries::get_task(tx, task_id)? {
        return Ok(Some(found));
    }
    if let Some(peer_id) = delta.peer_id {
        if let Some(found) = queries::get_task_by_peer_id(tx, peer_id)? {
            return Ok(Some(found));
        }
    }
    if delta.deleted != Some(true) {
        if let Some(title) = &delta.title {
            if let Some(found) = queries::find_dirty_by_title_no_peer(tx, title)? {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}

fn apply_field_writes(
    tx: &Transaction,
    id: &str,
    writes: &FieldWrites,
    now: i64,
) -> Result<(), SyncError> {
    let mut wrote = false;
    if let Some((title, ts)) = &writes.title {
        wrote |= queries::update_title_if_newer(tx, id, title, *ts)? > 0;
    }
    if let Some((notes, ts)) = &writes.notes {
        wrote |= queries::update_notes_if_newer(tx, id, notes.as_deref(), *ts)? > 0;
    }
    if let Some((completed, ts)) = &writes.completed {
        wrote |= queries::update_completed_if_newer(tx, id, *completed, *ts)? > 0;
    }
    if let Some(due_date) = writes.due_date {
        wrote |= queries::update_due_date_authoritative(tx, id, due_date, now)? > 0;
    }
    if let Some(peer_id) = writes.peer_id {
        wrote |= queries::set_peer_id(tx, id, peer_id)? > 0;
    }
    if wrote {
        queries::mark_task_synced(tx, id, now)?;
    }
    Ok(())
}
