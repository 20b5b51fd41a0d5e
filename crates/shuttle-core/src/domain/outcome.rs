//! Outcome model: how a single run attempt ended.

use serde::{Deserialize, Serialize};

use super::errors::{FailureKind, PreflightError};

/// Why a task left the running state for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Completed,
    Failed,
    Cancelled,
    Timeout,
    ApprovalRejected,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::Completed => "completed",
            ExitReason::Failed => "failed",
            ExitReason::Cancelled => "cancelled",
            ExitReason::Timeout => "timeout",
            ExitReason::ApprovalRejected => "approval rejected",
        }
    }
}

/// A failed attempt: classification travels with the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub reason: ExitReason,
    pub message: String,
}

impl RunFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            reason: ExitReason::Failed,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            reason: ExitReason::Failed,
            message: message.into(),
        }
    }

    /// Wall-clock budget exceeded. Counts against the transient retry budget.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            reason: ExitReason::Timeout,
            message: message.into(),
        }
    }

    /// Classify provider error text (see [`FailureKind::classify`]).
    pub fn from_provider(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: FailureKind::classify(&message),
            reason: ExitReason::Failed,
            message,
        }
    }
}

impl From<PreflightError> for RunFailure {
    fn from(err: PreflightError) -> Self {
        RunFailure::permanent(format!("preflight: {err}"))
    }
}

/// Final result of driving one attempt to its end.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        summary: String,
        session_id: Option<String>,
    },
    Failed(RunFailure),
    Cancelled,
    /// The user rejected a risky action; the state was already committed.
    Rejected,
    /// Host shutdown while running; the task goes back to pending.
    Interrupted,
}
