//! Orchestrator - スケジューリングループと 1 タスクの実行
//!
//! Loop:
//! 1. a task is running -> nothing to do (only this loop starts tasks)
//! 2. pick the pending task with the lowest priority value, queue order on ties
//! 3. mark running (fresh attempt id), preflight, resolve the model, start
//! 4. consume the event stream; risky tool use suspends consumption until a
//!    human approves or rejects
//! 5. commit the outcome through [`QueueState`] and go again
//!
//! The orchestrator never writes task fields itself. It only holds ephemeral
//! per-run handles (runner handle, deadline, log collector).

use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::detector::RiskyToolDetector;
use crate::domain::{AttemptId, ExitReason, RunEvent, RunFailure, RunOutcome, ShuttleError, TaskId};
use crate::logs::{LiveWindow, LogCollector};
use crate::queue::{NextTask, QueueState, RunIntent, TaskRecord};
use crate::runner::{RunHandle, RunnerRegistry};

/// Same horizon tokio uses for "never".
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub task_timeout: Duration,
    pub cancel_grace: Duration,
    pub log_cap_bytes: u64,
    pub logs_dir: std::path::PathBuf,
}

pub struct Orchestrator {
    state: Arc<QueueState>,
    runners: Arc<RunnerRegistry>,
    detector: RiskyToolDetector,
    settings: OrchestratorSettings,
    intents: mpsc::UnboundedReceiver<RunIntent>,
    live: LiveWindow,
}

impl Orchestrator {
    pub fn new(
        state: Arc<QueueState>,
        runners: Arc<RunnerRegistry>,
        settings: OrchestratorSettings,
        intents: mpsc::UnboundedReceiver<RunIntent>,
        live: LiveWindow,
    ) -> Self {
        Self {
            state,
            runners,
            detector: RiskyToolDetector::new(),
            settings,
            intents,
            live,
        }
    }

    /// Recent lines of the active (or last) run.
    pub fn live_log(&self) -> LiveWindow {
        self.live.clone()
    }

    /// Run until `shutdown` fires. A running task is stopped and requeued,
    /// then the snapshot is flushed.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ShuttleError> {
        self.run_loop(shutdown, false).await
    }

    /// Like [`run`](Self::run), but also returns once nothing is pending
    /// (tasks inside a retry backoff still count as pending).
    pub async fn run_until_idle(self, shutdown: CancellationToken) -> Result<(), ShuttleError> {
        self.run_loop(shutdown, true).await
    }

    async fn run_loop(mut self, shutdown: CancellationToken, stop_when_idle: bool) -> Result<(), ShuttleError> {
        tracing::info!("orchestrator started");
        while !shutdown.is_cancelled() {
            let wait = match self.state.next_task().await {
                NextTask::Run(id) => {
                    self.execute(id, &shutdown).await;
                    continue;
                }
                NextTask::WaitUntil(at) => {
                    let now = self.state.now();
                    Some((at - now).to_std().unwrap_or(Duration::ZERO))
                }
                NextTask::Idle if stop_when_idle => break,
                NextTask::Idle => None,
                NextTask::Busy => {
                    tracing::warn!("a task is marked running without an active run; waiting for a change");
                    None
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.state.changed() => {}
                _ = sleep(wait.unwrap_or(Duration::ZERO)), if wait.is_some() => {}
                Some(intent) = self.intents.recv() => {
                    tracing::debug!(?intent, "ignoring intent; no task is running");
                }
            }
        }

        self.state.flush().await?;
        tracing::info!("orchestrator stopped");
        Ok(())
    }

    async fn execute(&mut self, id: TaskId, shutdown: &CancellationToken) {
        // Nothing is running yet, so every queued intent is stale.
        while let Ok(intent) = self.intents.try_recv() {
            tracing::debug!(?intent, "dropping stale intent");
        }

        let task = match self.state.begin_attempt(id).await {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "could not start task");
                return;
            }
        };
        let Some(attempt) = task.run_attempt_id else {
            tracing::warn!(task_id = %id, "started task has no attempt id");
            return;
        };

        let mut log = LogCollector::open(
            &self.settings.logs_dir,
            id,
            attempt,
            self.settings.log_cap_bytes,
            self.live.clone(),
        )
        .await;
        if let Some(path) = log.path() {
            self.ignore_stale(self.state.record_log_path(id, attempt, path.to_path_buf()).await);
        }
        log.note(&format!("attempt {attempt} on {} started", task.backend)).await;

        let outcome = self.run_attempt(&task, attempt, &mut log, shutdown).await;
        log.note(&describe(&outcome)).await;
        log.finish().await;

        self.commit(id, attempt, outcome).await;
    }

    async fn run_attempt(
        &mut self,
        task: &TaskRecord,
        attempt: AttemptId,
        log: &mut LogCollector,
        shutdown: &CancellationToken,
    ) -> RunOutcome {
        let runner = match self.runners.preflight(task) {
            Ok(runner) => runner,
            Err(e) => return RunOutcome::Failed(e.into()),
        };
        let model = match runner.resolve_model(task) {
            Ok(model) => model,
            Err(e) => return RunOutcome::Failed(e.into()),
        };
        self.ignore_stale(
            self.state
                .record_resolved_model(task.id, attempt, model.clone())
                .await,
        );
        log.note(&format!("model: {model}")).await;

        let handle = match runner.start(task, &model).await {
            Ok(handle) => handle,
            Err(failure) => return RunOutcome::Failed(failure),
        };
        self.drive(task, attempt, handle, log, shutdown).await
    }

    /// The timeout budget counts from `started_at`, so preflight and spawn
    /// time are spent from it too.
    fn deadline_for(&self, task: &TaskRecord) -> Instant {
        let elapsed = task
            .started_at
            .and_then(|started| (self.state.now() - started).to_std().ok())
            .unwrap_or_default();
        let remaining = self.settings.task_timeout.saturating_sub(elapsed);
        let now = Instant::now();
        now.checked_add(remaining).unwrap_or_else(|| now + FAR_FUTURE)
    }

    /// Consume one run's events until a terminal event, a user intent, the
    /// deadline or shutdown ends it.
    async fn drive(
        &mut self,
        task: &TaskRecord,
        attempt: AttemptId,
        mut handle: RunHandle,
        log: &mut LogCollector,
        shutdown: &CancellationToken,
    ) -> RunOutcome {
        let id = task.id;
        let mut deadline = self.deadline_for(task);
        // Set while approval is pending: no events consumed, no deadline.
        let mut waiting_since: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    log.note("host shutting down; stopping run").await;
                    self.stop(&mut handle, log).await;
                    return RunOutcome::Interrupted;
                }
                Some(intent) = self.intents.recv() => match intent {
                    RunIntent::Cancel(task) if task == id => {
                        log.note("cancel requested").await;
                        self.stop(&mut handle, log).await;
                        return RunOutcome::Cancelled;
                    }
                    RunIntent::Reject(task) if task == id => {
                        log.note("risky action rejected").await;
                        self.stop(&mut handle, log).await;
                        return RunOutcome::Rejected;
                    }
                    RunIntent::Approve(task) if task == id => {
                        // Time spent waiting for a human is not charged to the run.
                        if let Some(since) = waiting_since.take() {
                            deadline = deadline.checked_add(since.elapsed()).unwrap_or(deadline);
                        }
                        log.note("risky action approved; resuming").await;
                    }
                    other => tracing::debug!(task_id = %id, intent = ?other, "ignoring intent for another task"),
                },
                _ = sleep_until(deadline), if waiting_since.is_none() => {
                    let limit = self.settings.task_timeout;
                    log.note(&format!("timed out after {}", human(limit))).await;
                    self.stop(&mut handle, log).await;
                    return RunOutcome::Failed(RunFailure::timeout(format!(
                        "task exceeded its {} timeout",
                        human(limit)
                    )));
                }
                event = handle.events.recv(), if waiting_since.is_none() => {
                    let Some(event) = event else {
                        return RunOutcome::Failed(RunFailure::transient(
                            "run event stream closed without a terminal event",
                        ));
                    };
                    log.record(&event).await;
                    match event {
                        RunEvent::Session { session_id } => {
                            self.ignore_stale(self.state.record_session(id, attempt, session_id).await);
                        }
                        RunEvent::ToolUse { tool, input } => {
                            if let Some(hit) = self.detector.inspect(&tool, &input) {
                                let reason = hit.describe();
                                log.note(&format!("approval required: {reason}")).await;
                                match self.state.request_approval(id, attempt, reason).await {
                                    Ok(()) => waiting_since = Some(Instant::now()),
                                    Err(e) => tracing::warn!(task_id = %id, error = %e, "could not request approval"),
                                }
                            }
                        }
                        RunEvent::Result { summary, session_id } => {
                            return RunOutcome::Completed { summary, session_id };
                        }
                        RunEvent::Error { kind, message } => {
                            return RunOutcome::Failed(RunFailure {
                                kind,
                                reason: ExitReason::Failed,
                                message,
                            });
                        }
                        RunEvent::Cancelled => return RunOutcome::Cancelled,
                        RunEvent::Log { .. } | RunEvent::Progress { .. } => {}
                    }
                }
            }
        }
    }

    /// Graceful stop, then forced termination after the grace period.
    async fn stop(&self, handle: &mut RunHandle, log: &mut LogCollector) {
        handle.cancel();
        let grace = sleep(self.settings.cancel_grace);
        tokio::pin!(grace);

        loop {
            tokio::select! {
                _ = &mut grace => break,
                event = handle.events.recv() => match event {
                    Some(event) => {
                        log.record(&event).await;
                        if event.is_terminal() {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }

        log.note("grace period elapsed; forcing termination").await;
        tracing::warn!("agent did not stop within the grace period; terminating");
        handle.terminate();
        let drain = async {
            while let Some(event) = handle.events.recv().await {
                log.record(&event).await;
                if event.is_terminal() {
                    break;
                }
            }
        };
        if tokio::time::timeout(self.settings.cancel_grace, drain).await.is_err() {
            tracing::warn!("agent run did not acknowledge termination");
        }
    }

    async fn commit(&self, id: TaskId, attempt: AttemptId, outcome: RunOutcome) {
        let result = match outcome {
            RunOutcome::Completed { summary, session_id } => {
                self.state.complete(id, attempt, summary, session_id).await
            }
            RunOutcome::Failed(failure) => self
                .state
                .fail_attempt(id, attempt, &failure)
                .await
                .map(|_| ()),
            RunOutcome::Cancelled => self.state.cancel_attempt(id, attempt).await,
            // Already committed by the reject intent.
            RunOutcome::Rejected => Ok(()),
            RunOutcome::Interrupted => {
                let note = format!(
                    "interrupted: the host shut down while this task was running; requeued at {}",
                    self.state.now().to_rfc3339_opts(SecondsFormat::Secs, true)
                );
                self.state.interrupt_attempt(id, attempt, note).await
            }
        };
        if let Err(e) = result {
            tracing::warn!(task_id = %id, attempt_id = %attempt, error = %e, "could not commit run outcome");
        }
    }

    fn ignore_stale(&self, result: Result<(), ShuttleError>) {
        if let Err(e) = result {
            tracing::debug!(error = %e, "skipped update for inactive attempt");
        }
    }
}

fn describe(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Completed { .. } => "run completed".to_string(),
        RunOutcome::Failed(f) => format!(
            "run failed ({}, {:?}): {}",
            f.reason.as_str(),
            f.kind,
            f.message
        ),
        RunOutcome::Cancelled => "run cancelled".to_string(),
        RunOutcome::Rejected => "run stopped after rejection".to_string(),
        RunOutcome::Interrupted => "run interrupted by shutdown".to_string(),
    }
}

fn human(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else if secs > 0 {
        format!("{secs}s")
    } else {
        format!("{}ms", d.as_millis())
    }
}
