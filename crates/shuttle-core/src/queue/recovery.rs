//! Crash recovery: normalize a freshly loaded snapshot.
//!
//! A task stored as `running` has no process behind it after a restart. It is
//! in-doubt work and goes back to the schedulable pool.

use chrono::{DateTime, SecondsFormat, Utc};

use super::Snapshot;
use crate::domain::TaskStatus;

/// Rewrite every `running` task to `pending`. Returns how many were touched.
///
/// Must run right after `load()` and before the orchestrator starts.
pub fn recover_interrupted(snapshot: &mut Snapshot, now: DateTime<Utc>) -> usize {
    let mut recovered = 0;
    for task in snapshot
        .tasks
        .iter_mut()
        .filter(|t| t.status == TaskStatus::Running)
    {
        let note = format!(
            "interrupted: the host stopped while this task was running (attempt started {}); recovered at {}",
            task.started_at
                .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                .unwrap_or_else(|| "at an unknown time".to_string()),
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        match task.requeue_interrupted(note) {
            Ok(()) => {
                recovered += 1;
                tracing::info!(task_id = %task.id, "recovered interrupted task to pending");
            }
            Err(e) => tracing::warn!(task_id = %task.id, error = %e, "failed to recover task"),
        }
    }
    recovered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentBackend, ApprovalState, AttemptId, TaskId, TaskSpec};
    use crate::queue::TaskRecord;
    use ulid::Ulid;

    fn task(status: TaskStatus) -> TaskRecord {
        let mut t = TaskRecord::new(
            TaskId::from_ulid(Ulid::new()),
            TaskSpec::new("t", "p", "/tmp", AgentBackend::Claude),
            3,
            Utc::now(),
        );
        if status != TaskStatus::Pending {
            t.start_attempt(AttemptId::from_ulid(Ulid::new()), Utc::now()).unwrap();
        }
        match status {
            TaskStatus::Completed => t.mark_completed("ok".into(), None, Utc::now()).unwrap(),
            TaskStatus::Running | TaskStatus::Pending => {}
            other => panic!("unsupported fixture status {other}"),
        }
        t
    }

    #[test]
    fn running_tasks_become_pending_with_note() {
        let mut running = task(TaskStatus::Running);
        running.request_approval("shell: sudo".into()).unwrap();
        let mut snap = Snapshot::new(1, vec![running, task(TaskStatus::Pending), task(TaskStatus::Completed)]);

        let n = recover_interrupted(&mut snap, Utc::now());
        assert_eq!(n, 1);

        let t = &snap.tasks[0];
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.interrupted_note.is_some());
        assert!(t.run_attempt_id.is_none());
        assert!(t.started_at.is_none());
        assert!(t.finished_at.is_none());
        assert_eq!(t.approval_state, ApprovalState::None);
        assert_eq!(t.retry_count, 0);

        assert!(snap.tasks[1].interrupted_note.is_none());
        assert_eq!(snap.tasks[2].status, TaskStatus::Completed);
    }
}
