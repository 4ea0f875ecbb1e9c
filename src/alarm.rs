//! The local reminder/alarm scheduler is an external collaborator: the core
//! only ever calls `schedule`/`cancel` on it.

use async_trait::async_trait;

use crate::model::Task;

#[async_trait]
pub trait AlarmScheduler: Send + Sync {
    /// Schedule (or reschedule) a reminder for `task`. Called on create and
    /// on update when `task.reminder` is set; idempotent — calling it twice
    /// for the same state must not double-fire.
    async fn schedule(&self, task: &Task);

    /// Cancel any pending reminder for `task_id`. Called on complete and on
    /// delete. Idempotent.
    async fn cancel(&self, task_id: &str);
}

/// No-op collaborator, useful for headless/test bootstraps.
pub struct NullAlarmScheduler;

#[async_trait]
impl AlarmScheduler for NullAlarmScheduler {
    async fn schedule(&self, _task: &Task) {}
    async fn cancel(&self, _task_id: &str) {}
}
