//! Queue state: the single in-memory writer of the task list.
//!
//! Two kinds of callers:
//! - UI / bot layers send user intents (enqueue, remove, move, edit, retry,
//!   cancel, approve, reject, clear).
//! - The orchestrator commits run-attempt transitions (begin, complete,
//!   fail, cancel, interrupt), always keyed by the attempt id it started so
//!   a late commit from an old attempt is rejected instead of applied.
//!
//! Every mutation bumps the snapshot revision, persists through the
//! [`QueueStore`], broadcasts a [`QueueEvent`] and wakes the orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, Notify, broadcast, mpsc};

use super::{QueueStore, RetryPolicy, Snapshot, TaskRecord};
use crate::app::status::QueueCounts;
use crate::domain::{
    AttemptId, FailureKind, QueueEvent, RunFailure, ShuttleError, TaskEdit, TaskId, TaskSpec, TaskStatus,
};
use crate::ports::{Clock, IdGenerator};

const EVENT_CAPACITY: usize = 256;

/// Intent the orchestrator must act on for the active run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunIntent {
    Cancel(TaskId),
    Approve(TaskId),
    Reject(TaskId),
}

/// Scheduler answer to "what next?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextTask {
    Run(TaskId),
    /// Something is pending but still inside its retry backoff.
    WaitUntil(DateTime<Utc>),
    /// A task is already running.
    Busy,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task never started; it is cancelled now.
    Cancelled,
    /// The task is running; the orchestrator was asked to stop it.
    StopRequested,
}

/// Where a failed attempt ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    RetryScheduled { at: DateTime<Utc> },
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Persist {
    Debounced,
    Immediate,
}

struct Inner {
    /// Queue order; position breaks priority ties.
    tasks: Vec<TaskRecord>,
    revision: u64,
}

impl Inner {
    fn find(&self, id: TaskId) -> Result<usize, ShuttleError> {
        self.tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(ShuttleError::TaskNotFound(id))
    }

    fn snapshot(&mut self) -> Snapshot {
        self.revision += 1;
        Snapshot::new(self.revision, self.tasks.clone())
    }
}

pub struct QueueState {
    inner: Mutex<Inner>,
    store: Arc<QueueStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry: RetryPolicy,
    default_max_retries: u32,
    changed: Notify,
    events: broadcast::Sender<QueueEvent>,
    intents: mpsc::UnboundedSender<RunIntent>,
}

impl QueueState {
    /// Build from an already recovered snapshot.
    ///
    /// The returned receiver belongs to the orchestrator.
    pub fn new(
        snapshot: Snapshot,
        store: Arc<QueueStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        retry: RetryPolicy,
        default_max_retries: u32,
    ) -> (Self, mpsc::UnboundedReceiver<RunIntent>) {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (intents, intents_rx) = mpsc::unbounded_channel();
        let state = Self {
            inner: Mutex::new(Inner {
                tasks: snapshot.tasks,
                revision: snapshot.revision,
            }),
            store,
            clock,
            ids,
            retry,
            default_max_retries,
            changed: Notify::new(),
            events,
            intents,
        };
        (state, intents_rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Resolves after the next mutation (or immediately if one happened
    /// since the last call).
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    pub async fn list(&self) -> Vec<TaskRecord> {
        self.inner.lock().await.tasks.clone()
    }

    pub async fn get(&self, id: TaskId) -> Option<TaskRecord> {
        let inner = self.inner.lock().await;
        inner.tasks.iter().find(|t| t.id == id).cloned()
    }

    pub async fn counts(&self) -> QueueCounts {
        QueueCounts::from_tasks(self.inner.lock().await.tasks.iter())
    }

    pub async fn revision(&self) -> u64 {
        self.inner.lock().await.revision
    }

    // ---------------------------------------------------------------
    // User intents
    // ---------------------------------------------------------------

    pub async fn enqueue(&self, mut spec: TaskSpec) -> Result<TaskId, ShuttleError> {
        if spec.title.trim().is_empty() {
            spec.title = default_title(&spec.prompt);
        }
        let id = self.ids.generate_task_id();
        let record = TaskRecord::new(id, spec, self.default_max_retries, self.clock.now());

        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.tasks.push(record);
            inner.snapshot()
        };
        tracing::info!(task_id = %id, "task enqueued");
        self.commit(snapshot, Persist::Debounced, QueueEvent::TaskAdded(id))
            .await;
        Ok(id)
    }

    /// Pending only.
    pub async fn remove(&self, id: TaskId) -> Result<(), ShuttleError> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let idx = inner.find(id)?;
            inner.tasks[idx].ensure_removable()?;
            inner.tasks.remove(idx);
            inner.snapshot()
        };
        tracing::info!(task_id = %id, "task removed");
        self.commit(snapshot, Persist::Debounced, QueueEvent::TaskRemoved(id))
            .await;
        Ok(())
    }

    /// Move a pending task to `position` in queue order (clamped).
    pub async fn move_to(&self, id: TaskId, position: usize) -> Result<(), ShuttleError> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            let idx = inner.find(id)?;
            inner.tasks[idx].ensure_movable()?;
            let task = inner.tasks.remove(idx);
            let position = position.min(inner.tasks.len());
            inner.tasks.insert(position, task);
            inner.snapshot()
        };
        self.commit(snapshot, Persist::Debounced, QueueEvent::TaskUpdated(id))
            .await;
        Ok(())
    }

    /// Pending only.
    pub async fn edit(&self, id: TaskId, edit: TaskEdit) -> Result<(), ShuttleError> {
        self.mutate(id, Persist::Debounced, |task| task.apply_edit(edit))
            .await
    }

    /// Manual retry: failed -> pending. Unlimited; always bumps `retry_count`.
    pub async fn retry(&self, id: TaskId) -> Result<(), ShuttleError> {
        self.mutate(id, Persist::Debounced, |task| task.reset_for_retry())
            .await?;
        tracing::info!(task_id = %id, "manual retry");
        Ok(())
    }

    pub async fn cancel(&self, id: TaskId) -> Result<CancelOutcome, ShuttleError> {
        let now = self.clock.now();
        let outcome = self
            .mutate(id, Persist::Immediate, |task| match task.status {
                TaskStatus::Pending => task.mark_cancelled(now).map(|()| CancelOutcome::Cancelled),
                TaskStatus::Running => Ok(CancelOutcome::StopRequested),
                other => Err(ShuttleError::InvalidTransition {
                    task: id,
                    from: other,
                    to: TaskStatus::Cancelled,
                }),
            })
            .await?;
        if outcome == CancelOutcome::StopRequested {
            self.send_intent(RunIntent::Cancel(id));
        } else {
            tracing::info!(task_id = %id, "pending task cancelled");
        }
        Ok(outcome)
    }

    pub async fn approve(&self, id: TaskId) -> Result<(), ShuttleError> {
        self.mutate(id, Persist::Immediate, |task| task.approve())
            .await?;
        tracing::info!(task_id = %id, "risky action approved");
        self.send_intent(RunIntent::Approve(id));
        Ok(())
    }

    /// Commits the failure right away; the orchestrator only stops the process.
    pub async fn reject(&self, id: TaskId) -> Result<(), ShuttleError> {
        let now = self.clock.now();
        self.mutate(id, Persist::Immediate, |task| task.reject(now))
            .await?;
        tracing::info!(task_id = %id, "risky action rejected");
        self.send_intent(RunIntent::Reject(id));
        Ok(())
    }

    /// Remove every terminal task. Returns how many were removed.
    pub async fn clear_finished(&self) -> usize {
        let (removed, snapshot) = {
            let mut inner = self.inner.lock().await;
            let removed: Vec<TaskId> = inner
                .tasks
                .iter()
                .filter(|t| t.is_terminal())
                .map(|t| t.id)
                .collect();
            if removed.is_empty() {
                return 0;
            }
            inner.tasks.retain(|t| !t.is_terminal());
            (removed, inner.snapshot())
        };
        self.store.save(snapshot).await;
        for id in &removed {
            let _ = self.events.send(QueueEvent::TaskRemoved(*id));
        }
        self.changed.notify_one();
        removed.len()
    }

    /// Persist the current list now (shutdown).
    pub async fn flush(&self) -> Result<(), ShuttleError> {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner.snapshot()
        };
        self.store.save_immediately(snapshot).await
    }

    // ---------------------------------------------------------------
    // Orchestrator commits
    // ---------------------------------------------------------------

    /// Lowest priority value among runnable tasks, queue position breaking ties.
    pub async fn next_task(&self) -> NextTask {
        let now = self.clock.now();
        let inner = self.inner.lock().await;
        if inner.tasks.iter().any(|t| t.status == TaskStatus::Running) {
            return NextTask::Busy;
        }

        let runnable = inner
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_runnable(now))
            .min_by_key(|(idx, t)| (t.priority, *idx))
            .map(|(_, t)| t.id);
        if let Some(id) = runnable {
            return NextTask::Run(id);
        }

        inner
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter_map(|t| t.next_attempt_at)
            .min()
            .map_or(NextTask::Idle, NextTask::WaitUntil)
    }

    /// Pending -> Running with a fresh attempt id.
    pub async fn begin_attempt(&self, id: TaskId) -> Result<TaskRecord, ShuttleError> {
        let attempt = self.ids.generate_attempt_id();
        let now = self.clock.now();
        let (record, snapshot) = {
            let mut inner = self.inner.lock().await;
            if let Some(running) = inner
                .tasks
                .iter()
                .find(|t| t.status == TaskStatus::Running && t.id != id)
            {
                return Err(ShuttleError::InvalidTask(format!(
                    "{} is already running; only one task runs at a time",
                    running.id
                )));
            }
            let idx = inner.find(id)?;
            inner.tasks[idx].start_attempt(attempt, now)?;
            let record = inner.tasks[idx].clone();
            (record, inner.snapshot())
        };
        tracing::info!(task_id = %id, attempt_id = %attempt, "attempt started");
        self.commit(snapshot, Persist::Debounced, QueueEvent::TaskUpdated(id))
            .await;
        Ok(record)
    }

    pub async fn record_resolved_model(
        &self,
        id: TaskId,
        attempt: AttemptId,
        model: String,
    ) -> Result<(), ShuttleError> {
        self.mutate_attempt(id, attempt, Persist::Debounced, |task| {
            task.resolved_model = Some(model);
            Ok(())
        })
        .await
    }

    pub async fn record_log_path(
        &self,
        id: TaskId,
        attempt: AttemptId,
        path: PathBuf,
    ) -> Result<(), ShuttleError> {
        self.mutate_attempt(id, attempt, Persist::Debounced, |task| {
            task.log_artifact_path = Some(path);
            Ok(())
        })
        .await
    }

    pub async fn record_session(
        &self,
        id: TaskId,
        attempt: AttemptId,
        session_id: String,
    ) -> Result<(), ShuttleError> {
        self.mutate_attempt(id, attempt, Persist::Debounced, |task| {
            task.session_id = Some(session_id);
            Ok(())
        })
        .await
    }

    pub async fn request_approval(
        &self,
        id: TaskId,
        attempt: AttemptId,
        reason: String,
    ) -> Result<(), ShuttleError> {
        let announced = reason.clone();
        self.mutate_attempt(id, attempt, Persist::Immediate, |task| {
            task.request_approval(reason)
        })
        .await?;
        tracing::warn!(task_id = %id, reason = %announced, "approval required");
        let _ = self.events.send(QueueEvent::ApprovalRequested {
            task: id,
            reason: announced,
        });
        Ok(())
    }

    pub async fn complete(
        &self,
        id: TaskId,
        attempt: AttemptId,
        summary: String,
        session_id: Option<String>,
    ) -> Result<(), ShuttleError> {
        let now = self.clock.now();
        self.mutate_attempt(id, attempt, Persist::Immediate, |task| {
            task.mark_completed(summary, session_id, now)
        })
        .await?;
        tracing::info!(task_id = %id, attempt_id = %attempt, "task completed");
        Ok(())
    }

    /// Transient with budget left: back to pending after a backoff.
    /// Otherwise: failed for good.
    pub async fn fail_attempt(
        &self,
        id: TaskId,
        attempt: AttemptId,
        failure: &RunFailure,
    ) -> Result<FailureDisposition, ShuttleError> {
        let now = self.clock.now();
        let retry = &self.retry;
        let disposition = self
            .mutate_attempt(id, attempt, Persist::Immediate, |task| {
                if failure.kind == FailureKind::Transient
                    && task.retry_count < task.max_retries
                {
                    let delay = retry.delay_for(task);
                    let at = now
                        + ChronoDuration::from_std(delay)
                            .unwrap_or_else(|_| ChronoDuration::seconds(60));
                    task.schedule_retry(failure, at)?;
                    Ok(FailureDisposition::RetryScheduled { at })
                } else {
                    task.mark_failed(failure, now)?;
                    Ok(FailureDisposition::Failed)
                }
            })
            .await?;
        match disposition {
            FailureDisposition::RetryScheduled { at } => tracing::warn!(
                task_id = %id,
                attempt_id = %attempt,
                kind = ?failure.kind,
                error = %failure.message,
                retry_at = %at,
                "attempt failed; auto-retry scheduled"
            ),
            FailureDisposition::Failed => tracing::warn!(
                task_id = %id,
                attempt_id = %attempt,
                kind = ?failure.kind,
                reason = failure.reason.as_str(),
                error = %failure.message,
                "task failed"
            ),
        }
        Ok(disposition)
    }

    pub async fn cancel_attempt(&self, id: TaskId, attempt: AttemptId) -> Result<(), ShuttleError> {
        let now = self.clock.now();
        self.mutate_attempt(id, attempt, Persist::Immediate, |task| {
            task.mark_cancelled(now)
        })
        .await?;
        tracing::info!(task_id = %id, attempt_id = %attempt, "running task cancelled");
        Ok(())
    }

    /// Running -> Pending without consuming retry budget (host shutdown).
    pub async fn interrupt_attempt(
        &self,
        id: TaskId,
        attempt: AttemptId,
        note: String,
    ) -> Result<(), ShuttleError> {
        self.mutate_attempt(id, attempt, Persist::Immediate, |task| {
            task.requeue_interrupted(note)
        })
        .await?;
        tracing::info!(task_id = %id, attempt_id = %attempt, "running task requeued on shutdown");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    async fn mutate<R>(
        &self,
        id: TaskId,
        persist: Persist,
        f: impl FnOnce(&mut TaskRecord) -> Result<R, ShuttleError>,
    ) -> Result<R, ShuttleError> {
        let (out, snapshot) = {
            let mut inner = self.inner.lock().await;
            let idx = inner.find(id)?;
            let out = f(&mut inner.tasks[idx])?;
            (out, inner.snapshot())
        };
        self.commit(snapshot, persist, QueueEvent::TaskUpdated(id))
            .await;
        Ok(out)
    }

    async fn mutate_attempt<R>(
        &self,
        id: TaskId,
        attempt: AttemptId,
        persist: Persist,
        f: impl FnOnce(&mut TaskRecord) -> Result<R, ShuttleError>,
    ) -> Result<R, ShuttleError> {
        self.mutate(id, persist, |task| {
            if task.status != TaskStatus::Running || task.run_attempt_id != Some(attempt) {
                return Err(ShuttleError::StaleAttempt { task: id, attempt });
            }
            f(task)
        })
        .await
    }

    /// Persistence happens after the lock is released.
    async fn commit(&self, snapshot: Snapshot, persist: Persist, event: QueueEvent) {
        match persist {
            Persist::Debounced => self.store.save(snapshot).await,
            Persist::Immediate => {
                if let Err(e) = self.store.save_immediately(snapshot).await {
                    tracing::warn!(error = %e, "immediate queue save failed");
                }
            }
        }
        let _ = self.events.send(event);
        self.changed.notify_one();
    }

    fn send_intent(&self, intent: RunIntent) {
        if self.intents.send(intent).is_err() {
            tracing::debug!(?intent, "no orchestrator listening for run intents");
        }
    }
}

fn default_title(prompt: &str) -> String {
    let line = prompt.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("untitled task");
    let mut title: String = line.chars().take(60).collect();
    if line.chars().count() > 60 {
        title.push_str("...");
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentBackend, ApprovalState, ExitReason, Priority};
    use crate::ports::{SystemClock, UlidGenerator};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        state: QueueState,
        intents: mpsc::UnboundedReceiver<RunIntent>,
        store: Arc<QueueStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(QueueStore::new(
            dir.path().join("queue.json"),
            Duration::from_millis(10),
        ));
        let (state, intents) = QueueState::new(
            Snapshot::empty(),
            Arc::clone(&store),
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new(SystemClock)),
            RetryPolicy::default(),
            3,
        );
        Fixture {
            _dir: dir,
            state,
            intents,
            store,
        }
    }

    fn spec(title: &str, priority: Priority) -> TaskSpec {
        TaskSpec::new(title, "do it", "/tmp", AgentBackend::Claude).with_priority(priority)
    }

    async fn run_id(state: &QueueState) -> TaskId {
        match state.next_task().await {
            NextTask::Run(id) => id,
            other => panic!("expected a runnable task, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn selects_by_priority_then_queue_order() {
        let f = fixture();
        let n1 = f.state.enqueue(spec("n1", Priority::Normal)).await.unwrap();
        let h = f.state.enqueue(spec("h", Priority::High)).await.unwrap();
        let n2 = f.state.enqueue(spec("n2", Priority::Normal)).await.unwrap();

        let mut order = Vec::new();
        for _ in 0..3 {
            let id = run_id(&f.state).await;
            let rec = f.state.begin_attempt(id).await.unwrap();
            assert_eq!(f.state.next_task().await, NextTask::Busy);
            f.state
                .complete(id, rec.run_attempt_id.unwrap(), "ok".into(), None)
                .await
                .unwrap();
            order.push(id);
        }
        assert_eq!(order, vec![h, n1, n2]);
        assert_eq!(f.state.next_task().await, NextTask::Idle);
    }

    #[tokio::test]
    async fn reorder_changes_tie_break() {
        let f = fixture();
        let a = f.state.enqueue(spec("a", Priority::Normal)).await.unwrap();
        let b = f.state.enqueue(spec("b", Priority::Normal)).await.unwrap();
        f.state.move_to(b, 0).await.unwrap();
        assert_eq!(run_id(&f.state).await, b);

        f.state.move_to(b, 99).await.unwrap();
        assert_eq!(run_id(&f.state).await, a);
    }

    #[tokio::test]
    async fn only_one_task_may_run() {
        let f = fixture();
        let a = f.state.enqueue(spec("a", Priority::Normal)).await.unwrap();
        let b = f.state.enqueue(spec("b", Priority::Normal)).await.unwrap();
        f.state.begin_attempt(a).await.unwrap();
        assert!(f.state.begin_attempt(b).await.is_err());
        assert_eq!(f.state.get(b).await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn cancel_pending_never_runs() {
        let mut f = fixture();
        let id = f.state.enqueue(spec("a", Priority::Normal)).await.unwrap();

        let outcome = f.state.cancel(id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);

        let task = f.state.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.exit_reason, Some(ExitReason::Cancelled));
        assert!(task.run_attempt_id.is_none());
        assert_eq!(f.state.next_task().await, NextTask::Idle);
        assert!(f.intents.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_running_sends_intent() {
        let mut f = fixture();
        let id = f.state.enqueue(spec("a", Priority::Normal)).await.unwrap();
        f.state.begin_attempt(id).await.unwrap();

        assert_eq!(f.state.cancel(id).await.unwrap(), CancelOutcome::StopRequested);
        assert_eq!(f.intents.try_recv().unwrap(), RunIntent::Cancel(id));
        assert_eq!(f.state.get(id).await.unwrap().status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn transient_failures_respect_budget() {
        let f = fixture();
        let id = f
            .state
            .enqueue(spec("a", Priority::Normal).with_max_retries(1))
            .await
            .unwrap();

        let rec = f.state.begin_attempt(id).await.unwrap();
        let d = f
            .state
            .fail_attempt(id, rec.run_attempt_id.unwrap(), &RunFailure::transient("disconnect"))
            .await
            .unwrap();
        assert!(matches!(d, FailureDisposition::RetryScheduled { .. }));
        let task = f.state.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert!(matches!(f.state.next_task().await, NextTask::WaitUntil(_)));

        // Second attempt once the backoff elapsed.
        {
            let mut inner = f.state.inner.lock().await;
            inner.tasks[0].next_attempt_at = None;
        }
        let rec = f.state.begin_attempt(id).await.unwrap();
        let d = f
            .state
            .fail_attempt(id, rec.run_attempt_id.unwrap(), &RunFailure::transient("disconnect"))
            .await
            .unwrap();
        assert_eq!(d, FailureDisposition::Failed);
        let task = f.state.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.failure_kind, Some(FailureKind::Transient));
        assert_eq!(task.retry_count, task.max_retries);
    }

    #[tokio::test]
    async fn permanent_failure_is_never_retried() {
        let f = fixture();
        let id = f.state.enqueue(spec("a", Priority::Normal)).await.unwrap();
        let rec = f.state.begin_attempt(id).await.unwrap();
        let d = f
            .state
            .fail_attempt(id, rec.run_attempt_id.unwrap(), &RunFailure::permanent("bad key"))
            .await
            .unwrap();
        assert_eq!(d, FailureDisposition::Failed);
        assert_eq!(f.state.get(id).await.unwrap().retry_count, 0);
    }

    #[tokio::test]
    async fn stale_attempt_commits_are_rejected() {
        let f = fixture();
        let id = f.state.enqueue(spec("a", Priority::Normal)).await.unwrap();
        let first = f.state.begin_attempt(id).await.unwrap().run_attempt_id.unwrap();
        f.state
            .fail_attempt(id, first, &RunFailure::transient("drop"))
            .await
            .unwrap();

        let err = f
            .state
            .complete(id, first, "late".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ShuttleError::StaleAttempt { .. }));
    }

    #[tokio::test]
    async fn approval_flow_broadcasts_and_sends_intents() {
        let mut f = fixture();
        let mut events = f.state.subscribe();
        let id = f.state.enqueue(spec("a", Priority::Normal)).await.unwrap();
        let attempt = f.state.begin_attempt(id).await.unwrap().run_attempt_id.unwrap();

        f.state
            .request_approval(id, attempt, "shell: rm -rf".into())
            .await
            .unwrap();
        assert_eq!(f.state.counts().await.awaiting_approval, 1);

        let mut saw_request = false;
        while let Ok(ev) = events.try_recv() {
            if matches!(ev, QueueEvent::ApprovalRequested { task, .. } if task == id) {
                saw_request = true;
            }
        }
        assert!(saw_request);

        f.state.reject(id).await.unwrap();
        assert_eq!(f.intents.try_recv().unwrap(), RunIntent::Reject(id));
        let task = f.state.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.exit_reason, Some(ExitReason::ApprovalRejected));
        assert_eq!(task.approval_state, ApprovalState::Rejected);

        // Rejected tasks are terminal; approve now makes no sense.
        assert!(f.state.approve(id).await.is_err());
    }

    #[tokio::test]
    async fn edits_and_removal_only_while_pending() {
        let f = fixture();
        let id = f.state.enqueue(spec("a", Priority::Normal)).await.unwrap();
        f.state
            .edit(
                id,
                TaskEdit {
                    priority: Some(Priority::Low),
                    ..TaskEdit::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(f.state.get(id).await.unwrap().priority, Priority::Low);

        f.state.begin_attempt(id).await.unwrap();
        assert!(f.state.remove(id).await.is_err());
        assert!(f.state.move_to(id, 0).await.is_err());
        assert!(f.state.edit(id, TaskEdit::default()).await.is_err());
    }

    #[tokio::test]
    async fn clear_finished_keeps_active_work() {
        let f = fixture();
        let done = f.state.enqueue(spec("done", Priority::Normal)).await.unwrap();
        let keep = f.state.enqueue(spec("keep", Priority::Normal)).await.unwrap();
        f.state.cancel(done).await.unwrap();

        assert_eq!(f.state.clear_finished().await, 1);
        let ids: Vec<_> = f.state.list().await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![keep]);
        assert_eq!(f.state.clear_finished().await, 0);
    }

    #[tokio::test]
    async fn flush_persists_current_list() {
        let f = fixture();
        let id = f.state.enqueue(spec("a", Priority::High)).await.unwrap();
        f.state.flush().await.unwrap();

        let loaded = f.store.load();
        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.tasks[0].id, id);
        assert_eq!(loaded.revision, f.state.revision().await);
    }

    #[test]
    fn blank_titles_fall_back_to_prompt() {
        assert_eq!(default_title("\n  fix the build  \nmore"), "fix the build");
        assert_eq!(default_title(""), "untitled task");
        let long = "x".repeat(80);
        assert_eq!(default_title(&long).chars().count(), 63);
    }
}
