//! Per-field last-writer-wins merge.
//!
//! `merge` is a pure function of `(local, delta, now)`: it never touches the
//! store. It decides, for an existing task, exactly which per-field writes
//! the conditional `update_*_if_newer` store primitives should attempt; the
//! store re-checks the same strictly-newer predicate atomically when those
//! writes are applied, so a decision computed here can never resurrect a
//! field the store itself would have rejected.

use crate::model::{Task, TaskDelta};

/// Per-field writes to attempt against an existing local task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldWrites {
    pub title: Option<(String, i64)>,
    pub notes: Option<(Option<String>, i64)>,
    pub completed: Option<(bool, i64)>,
    /// Peer is authoritative for due_date: written whenever it differs,
    /// independent of a timestamp race.
    pub due_date: Option<Option<i64>>,
    /// Peer linkage: only ever set when previously unset.
    pub peer_id: Option<i64>,
}

impl FieldWrites {
    pub fn wrote_any(&self) -> bool {
        self.title.is_some()
            || self.notes.is_some()
            || self.completed.is_some()
            || self.due_date.is_some()
            || self.peer_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The incoming delta carried a tombstone; hard-delete the local row (a
    /// no-op if there was none). Always recorded as processed.
    Delete,
    /// No local row existed and the delta was not a tombstone: insert.
    Insert(Task),
    /// A local row existed: apply these field writes (may be all-`None`,
    /// meaning nothing was newer and the task is otherwise untouched).
    Apply(FieldWrites),
}

/// Apply the per-field LWW algorithm. `local` is `None` when the duplicate
/// reconciliation lookups (by id, by peer_id, by dirty+title) all failed to
/// find a row.
pub fn merge(local: Option<&Task>, delta: &TaskDelta, now: i64) -> MergeOutcome {
    // A tombstone always deletes, unconditionally.
    if delta.deleted == Some(true) {
        return MergeOutcome::Delete;
    }

    let Some(local) = local else {
        return MergeOutcome::Insert(create_from_delta(delta, now));
    };

    let mut writes = FieldWrites::default();

    // Per-field update-if-newer. Equal timestamps keep local (no write).
    if let (Some(title), Some(ts)) = (&delta.title, delta.title_updated_at) {
        if ts > local.title_updated_at {
            writes.title = Some((title.clone(), ts));
        }
    }
    if let Some(ts) = delta.notes_updated_at {
        if ts > local.notes_updated_at {
            writes.notes = Some((delta.notes.clone(), ts));
        }
    }
    if let (Some(completed), Some(ts)) = (delta.completed, delta.completed_updated_at) {
        if ts > local.completed_updated_at {
            writes.completed = Some((completed, ts));
        }
    }

    // Peer linkage, set-once.
    if local.peer_id.is_none() {
        if let Some(peer_id) = delta.peer_id {
            writes.peer_id = Some(peer_id);
        }
    }

    // Due-date authority. The peer's value always wins when it differs from
    // the local value, independent of any timestamp.
    if let Some(due_date) = delta.due_date {
        let due_date = if due_date == 0 { None } else { Some(due_date) };
        if due_date != local.due_date {
            writes.due_date = Some(due_date);
        }
    }

    MergeOutcome::Apply(writes)
}

fn create_from_delta(delta: &TaskDelta, now: i64) -> Task {
    let due_date = delta.due_date.and_then(|d| if d == 0 { None } else { Some(d) });
    // Deliberately conflates "has a due date" with "user wants a reminder".
    let reminder = due_date.is_some();

    Task {
        id: String::new(), // caller fills in the real task id before insert
        title: delta.title.clone().unwrap_or_default(),
        notes: delta.notes.clone(),
        completed: delta.completed.unwrap_or(false),
        priority: delta.priority.unwrap_or(0),
        due_date,
        due_time: None,
        reminder,
        reminder_time: None,
        repeating: false,
        deleted: false,
        title_updated_at: delta.title_updated_at.unwrap_or(now),
        notes_updated_at: delta.notes_updated_at.unwrap_or(now),
        completed_updated_at: delta.completed_updated_at.unwrap_or(now),
        due_date_updated_at: now,
        updated_at: now,
        synced_at: now,
        dirty: false,
        peer_id: delta.peer_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_task() -> Task {
        Task {
            id: "T".into(),
            title: "A".into(),
            notes: Some("n1".into()),
            completed: false,
            priority: 0,
            due_date: None,
            due_time: None,
            reminder: false,
            reminder_time: None,
            repeating: false,
            deleted: false,
            title_updated_at: 10,
            notes_updated_at: 10,
            completed_updated_at: 10,
            due_date_updated_at: 10,
            updated_at: 10,
            synced_at: 10,
            dirty: false,
            peer_id: None,
        }
    }

    /// A local edit to title (not modeled here, since merge only sees
    /// inbound deltas) co-exists with an inbound notes update; only notes
    /// should move.
    #[test]
    fn concurrent_notes_update_only_touches_notes() {
        let mut local = base_task();
        local.title = "B".into();
        local.title_updated_at = 20;
        local.updated_at = 20;

        let delta = TaskDelta {
            notes: Some("n2".into()),
            notes_updated_at: Some(25),
            ..Default::default()
        };

        let outcome = merge(Some(&local), &delta, 30);
        match outcome {
            MergeOutcome::Apply(w) => {
                assert_eq!(w.notes, Some((Some("n2".to_string()), 25)));
                assert!(w.title.is_none());
                assert!(w.completed.is_none());
            }
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    /// A tombstone beats an older update; deletion always wins.
    #[test]
    fn tombstone_always_deletes() {
        let mut local = base_task();
        local.title = "A2".into();
        local.title_updated_at = 20;

        let delta = TaskDelta {
            deleted: Some(true),
            ..Default::default()
        };

        assert_eq!(merge(Some(&local), &delta, 100), MergeOutcome::Delete);
    }

    /// Equal timestamps do not update (tie -> local wins).
    #[test]
    fn tie_breaking_keeps_local() {
        let local = base_task();
        let delta = TaskDelta {
            title: Some("Z".into()),
            title_updated_at: Some(10), // equal to local.title_updated_at
            ..Default::default()
        };
        match merge(Some(&local), &delta, 50) {
            MergeOutcome::Apply(w) => assert!(w.title.is_none()),
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    /// Per-field commutativity for two deltas with distinct per-field
    /// timestamps on the same task.
    #[test]
    fn per_field_commutativity() {
        let local = base_task();

        let i1 = TaskDelta {
            title: Some("B".into()),
            title_updated_at: Some(20),
            ..Default::default()
        };
        let i2 = TaskDelta {
            notes: Some("n2".into()),
            notes_updated_at: Some(25),
            ..Default::default()
        };

        let apply = |t: &Task, d: &TaskDelta| -> Task {
            let mut out = t.clone();
            if let MergeOutcome::Apply(w) = merge(Some(t), d, 999) {
                if let Some((title, ts)) = w.title {
                    out.title = title;
                    out.title_updated_at = ts;
                }
                if let Some((notes, ts)) = w.notes {
                    out.notes = notes;
                    out.notes_updated_at = ts;
                }
            }
            out
        };

        let order_a = apply(&apply(&local, &i1), &i2);
        let order_b = apply(&apply(&local, &i2), &i1);
        assert_eq!(order_a.title, order_b.title);
        assert_eq!(order_a.notes, order_b.notes);
    }

    #[test]
    fn create_if_absent_derives_reminder_from_due_date() {
        let delta = TaskDelta {
            title: Some("Milk".into()),
            due_date: Some(12345),
            ..Default::default()
        };
        match merge(None, &delta, 100) {
            MergeOutcome::Insert(t) => {
                assert!(t.reminder);
                assert_eq!(t.due_date, Some(12345));
                assert!(!t.dirty);
                assert_eq!(t.synced_at, 100);
            }
            other => panic!("expected Insert, got {other:?}"),
        }
    }

    #[test]
    fn peer_linkage_sets_once() {
        let local = base_task();
        let delta = TaskDelta {
            peer_id: Some(42),
            ..Default::default()
        };
        match merge(Some(&local), &delta, 100) {
            MergeOutcome::Apply(w) => assert_eq!(w.peer_id, Some(42)),
            other => panic!("expected Apply, got {other:?}"),
        }

        let mut already_linked = local.clone();
        already_linked.peer_id = Some(7);
        match merge(Some(&already_linked), &delta, 100) {
            MergeOutcome::Apply(w) => assert!(w.peer_id.is_none()),
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    #[test]
    fn due_date_authority_overwrites_even_with_older_timestamp() {
        let mut local = base_task();
        local.due_date = Some(100);
        let delta = TaskDelta {
            due_date: Some(200),
            ..Default::default()
        };
        match merge(Some(&local), &delta, 100) {
            MergeOutcome::Apply(w) => assert_eq!(w.due_date, Some(Some(200))),
            other => panic!("expected Apply, got {other:?}"),
        }
    }

    #[test]
    fn due_date_zero_means_unset() {
        let mut local = base_task();
        local.due_date = Some(100);
        let delta = TaskDelta {
            due_date: Some(0),
            ..Default::default()
        };
        match merge(Some(&local), &delta, 100) {
            MergeOutcome::Apply(w) => assert_eq!(w.due_date, Some(None)),
            other => panic!("expected Apply, got {other:?}"),
        }
    }
}
