//! Task record: the persisted row for one queued task.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    AgentBackend, ApprovalState, AttemptId, ExitReason, FailureKind, Priority, RunFailure,
    ShuttleError, TaskEdit, TaskId, TaskSpec, TaskStatus,
};

/// Metadata + prompt for a task in the queue.
///
/// Design:
/// - This is the "single source of truth" for task state.
/// - All state transitions happen through methods here, and each one is
///   checked against [`TaskStatus::can_transition_to`].
/// - Only [`QueueState`](super::QueueState) holds `&mut TaskRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub title: String,
    pub prompt: String,
    pub working_dir: PathBuf,
    pub backend: AgentBackend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,

    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_ms: Option<u64>,

    /// Fresh per execution; cleared whenever the task is back in pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_attempt_id: Option<AttemptId>,

    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Auto-retry backoff: not selectable before this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<ExitReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_model: Option<String>,

    #[serde(default)]
    pub approval_state: ApprovalState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_artifact_path: Option<PathBuf>,

    /// Set only by crash recovery / shutdown requeue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted_note: Option<String>,
}

pub(crate) fn default_max_retries() -> u32 {
    3
}

impl TaskRecord {
    pub fn new(id: TaskId, spec: TaskSpec, default_max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: spec.title,
            prompt: spec.prompt,
            working_dir: spec.working_dir,
            backend: spec.backend,
            model: spec.model.filter(|m| !m.trim().is_empty()),
            mode: spec.mode.filter(|m| !m.trim().is_empty()),
            status: TaskStatus::Pending,
            priority: spec.priority,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            retry_base_delay_ms: spec.retry_base_delay_ms,
            run_attempt_id: None,
            created_at: now,
            started_at: None,
            finished_at: None,
            next_attempt_at: None,
            last_error: None,
            result_summary: None,
            exit_reason: None,
            failure_kind: None,
            session_id: None,
            resolved_model: None,
            approval_state: ApprovalState::None,
            approval_reason: None,
            log_artifact_path: None,
            interrupted_note: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// UI gates its "Retry" action on this.
    pub fn is_retryable(&self) -> bool {
        self.status == TaskStatus::Failed && self.retry_count < self.max_retries
    }

    /// Pending and past any backoff delay.
    pub fn is_runnable(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.next_attempt_at.is_none_or(|at| at <= now)
    }

    pub fn awaiting_approval(&self) -> bool {
        self.approval_state == ApprovalState::Waiting
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), ShuttleError> {
        if !self.status.can_transition_to(next) {
            return Err(ShuttleError::InvalidTransition {
                task: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    fn require_pending(&self, action: &'static str) -> Result<(), ShuttleError> {
        if self.status != TaskStatus::Pending {
            return Err(ShuttleError::NotPending {
                task: self.id,
                status: self.status,
                action,
            });
        }
        Ok(())
    }

    pub fn apply_edit(&mut self, edit: TaskEdit) -> Result<(), ShuttleError> {
        self.require_pending("edited")?;
        if let Some(prompt) = &edit.prompt
            && prompt.trim().is_empty()
        {
            return Err(ShuttleError::InvalidTask("prompt must not be empty".into()));
        }
        if let Some(title) = edit.title {
            self.title = title;
        }
        if let Some(prompt) = edit.prompt {
            self.prompt = prompt;
        }
        if let Some(priority) = edit.priority {
            self.priority = priority;
        }
        Ok(())
    }

    pub fn ensure_removable(&self) -> Result<(), ShuttleError> {
        self.require_pending("removed")
    }

    pub fn ensure_movable(&self) -> Result<(), ShuttleError> {
        self.require_pending("reordered")
    }

    /// Pending -> Running with a fresh attempt id.
    pub fn start_attempt(&mut self, attempt: AttemptId, now: DateTime<Utc>) -> Result<(), ShuttleError> {
        self.transition(TaskStatus::Running)?;
        self.run_attempt_id = Some(attempt);
        self.started_at = Some(now);
        self.finished_at = None;
        self.next_attempt_at = None;
        self.exit_reason = None;
        self.result_summary = None;
        self.session_id = None;
        self.resolved_model = None;
        self.log_artifact_path = None;
        self.approval_state = ApprovalState::None;
        self.approval_reason = None;
        self.interrupted_note = None;
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        summary: String,
        session_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ShuttleError> {
        self.transition(TaskStatus::Completed)?;
        self.result_summary = Some(summary);
        if session_id.is_some() {
            self.session_id = session_id;
        }
        self.exit_reason = Some(ExitReason::Completed);
        self.failure_kind = None;
        self.last_error = None;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Running -> Failed (terminal).
    pub fn mark_failed(&mut self, failure: &RunFailure, now: DateTime<Utc>) -> Result<(), ShuttleError> {
        self.transition(TaskStatus::Failed)?;
        self.last_error = Some(failure.message.clone());
        self.exit_reason = Some(failure.reason);
        self.failure_kind = Some(failure.kind);
        self.finished_at = Some(now);
        if self.approval_state == ApprovalState::Waiting {
            self.approval_state = ApprovalState::None;
        }
        Ok(())
    }

    /// Running -> Pending on a transient failure; consumes one retry.
    pub fn schedule_retry(
        &mut self,
        failure: &RunFailure,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), ShuttleError> {
        self.transition(TaskStatus::Pending)?;
        self.retry_count += 1;
        self.last_error = Some(failure.message.clone());
        self.failure_kind = Some(failure.kind);
        self.exit_reason = None;
        self.next_attempt_at = Some(next_attempt_at);
        self.clear_attempt();
        Ok(())
    }

    /// Pending or Running -> Cancelled.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> Result<(), ShuttleError> {
        self.transition(TaskStatus::Cancelled)?;
        self.exit_reason = Some(ExitReason::Cancelled);
        self.failure_kind = None;
        self.next_attempt_at = None;
        self.finished_at = Some(now);
        if self.approval_state == ApprovalState::Waiting {
            self.approval_state = ApprovalState::None;
        }
        Ok(())
    }

    /// Manual retry: Failed -> Pending. Unlimited, always bumps the counter.
    pub fn reset_for_retry(&mut self) -> Result<(), ShuttleError> {
        self.transition(TaskStatus::Pending)?;
        self.retry_count += 1;
        self.last_error = None;
        self.exit_reason = None;
        self.failure_kind = None;
        self.result_summary = None;
        self.next_attempt_at = None;
        self.interrupted_note = None;
        self.clear_attempt();
        Ok(())
    }

    /// Running -> Pending without consuming retry budget (restart / shutdown).
    pub fn requeue_interrupted(&mut self, note: impl Into<String>) -> Result<(), ShuttleError> {
        self.transition(TaskStatus::Pending)?;
        self.interrupted_note = Some(note.into());
        self.next_attempt_at = None;
        self.clear_attempt();
        Ok(())
    }

    pub fn request_approval(&mut self, reason: String) -> Result<(), ShuttleError> {
        if self.status != TaskStatus::Running {
            return Err(ShuttleError::InvalidTask(format!(
                "{} is {}; approval can only be requested while running",
                self.id, self.status
            )));
        }
        self.approval_state = ApprovalState::Waiting;
        self.approval_reason = Some(reason);
        Ok(())
    }

    pub fn approve(&mut self) -> Result<(), ShuttleError> {
        if !self.awaiting_approval() {
            return Err(ShuttleError::NotAwaitingApproval(self.id));
        }
        self.approval_state = ApprovalState::Approved;
        Ok(())
    }

    /// Waiting -> Rejected; the task fails for good (never auto-retried).
    pub fn reject(&mut self, now: DateTime<Utc>) -> Result<(), ShuttleError> {
        if !self.awaiting_approval() {
            return Err(ShuttleError::NotAwaitingApproval(self.id));
        }
        self.transition(TaskStatus::Failed)?;
        let what = self
            .approval_reason
            .as_deref()
            .unwrap_or("risky tool action");
        self.last_error = Some(format!("rejected by reviewer: {what}"));
        self.exit_reason = Some(ExitReason::ApprovalRejected);
        self.failure_kind = Some(FailureKind::Permanent);
        self.approval_state = ApprovalState::Rejected;
        self.finished_at = Some(now);
        Ok(())
    }

    fn clear_attempt(&mut self) {
        self.run_attempt_id = None;
        self.started_at = None;
        self.finished_at = None;
        self.approval_state = ApprovalState::None;
        self.approval_reason = None;
    }
}
