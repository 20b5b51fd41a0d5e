//! Status - UI 向けの読み取り専用ビュー
//!
//! Every terminal state shows a readable summary, its failure
//! classification and whether retry is offered, so the UI gates its "Retry"
//! action on [`TaskView::retry_offered`] instead of guessing from strings.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::domain::{
    AgentBackend, ExitReason, FailureKind, Priority, TaskId, TaskStatus,
};
use crate::queue::TaskRecord;

/// Per-status counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Subset of `running`.
    pub awaiting_approval: usize,
}

impl QueueCounts {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a TaskRecord>) -> Self {
        let mut counts = QueueCounts::default();
        for task in tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
            }
            if task.awaiting_approval() {
                counts.awaiting_approval += 1;
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub backend: AgentBackend,
    pub retry_count: u32,
    pub max_retries: u32,
    pub exit_reason: Option<ExitReason>,
    pub failure_kind: Option<FailureKind>,
    pub awaiting_approval: bool,
    pub retry_offered: bool,
    pub summary: String,
    pub log_artifact_path: Option<PathBuf>,
}

impl TaskView {
    pub fn from_record(task: &TaskRecord) -> Self {
        Self {
            id: task.id,
            title: task.title.clone(),
            status: task.status,
            priority: task.priority,
            backend: task.backend,
            retry_count: task.retry_count,
            max_retries: task.max_retries,
            exit_reason: task.exit_reason,
            failure_kind: task.failure_kind,
            awaiting_approval: task.awaiting_approval(),
            retry_offered: task.is_retryable(),
            summary: summary_line(task),
            log_artifact_path: task.log_artifact_path.clone(),
        }
    }
}

fn summary_line(task: &TaskRecord) -> String {
    match task.status {
        TaskStatus::Pending => {
            if let Some(at) = task.next_attempt_at {
                format!(
                    "retry {}/{} scheduled at {}: {}",
                    task.retry_count,
                    task.max_retries,
                    stamp(at),
                    first_line(task.last_error.as_deref().unwrap_or("transient failure"))
                )
            } else if let Some(note) = &task.interrupted_note {
                first_line(note).to_string()
            } else {
                "waiting to run".to_string()
            }
        }
        TaskStatus::Running => {
            if task.awaiting_approval() {
                format!(
                    "awaiting approval: {}",
                    task.approval_reason.as_deref().unwrap_or("risky tool action")
                )
            } else {
                let model = task
                    .resolved_model
                    .as_deref()
                    .map(|m| format!(" ({m})"))
                    .unwrap_or_default();
                match task.started_at {
                    Some(at) => format!("running on {}{model} since {}", task.backend, stamp(at)),
                    None => format!("running on {}{model}", task.backend),
                }
            }
        }
        TaskStatus::Completed => task
            .result_summary
            .as_deref()
            .map(first_line)
            .filter(|s| !s.is_empty())
            .unwrap_or("completed")
            .to_string(),
        TaskStatus::Failed => {
            let reason = task.exit_reason.unwrap_or(ExitReason::Failed).as_str();
            let kind = match task.failure_kind {
                Some(FailureKind::Transient) => "transient",
                Some(FailureKind::Permanent) | None => "permanent",
            };
            let retry = if task.is_retryable() {
                "retry available"
            } else {
                "retry budget exhausted"
            };
            format!(
                "{reason} ({kind}, {retry}): {}",
                first_line(task.last_error.as_deref().unwrap_or("no error text"))
            )
        }
        TaskStatus::Cancelled => "cancelled by user".to_string(),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
