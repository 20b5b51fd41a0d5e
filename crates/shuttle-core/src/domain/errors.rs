//! Errors - エラー型と分類
//!
//! - `FailureKind`: 実行時エラーの運用分類（retry するかどうか）
//! - `PreflightError`: process を起動する前の検証エラー（常に permanent）
//! - `ShuttleError`: queue / store / state machine のエラー

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{AttemptId, TaskId};
use super::state::TaskStatus;
use super::task::AgentBackend;

/// Failure classification.
///
/// - Transient: may succeed on retry without user intervention.
/// - Permanent: retrying alone will not help.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permanent,
}

impl FailureKind {
    /// Classify free-form provider error text.
    ///
    /// Overload, rate limiting, timeouts, dropped connections and 5xx
    /// availability codes are transient; anything else is permanent.
    pub fn classify(message: &str) -> Self {
        const TRANSIENT_MARKERS: &[&str] = &[
            "overloaded",
            "rate limit",
            "rate_limit",
            "too many requests",
            "timed out",
            "timeout",
            "connection reset",
            "connection refused",
            "econnreset",
            "broken pipe",
            "network",
            "temporarily unavailable",
            "service unavailable",
            "502",
            "503",
            "529",
        ];
        let lower = message.to_lowercase();
        if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
            FailureKind::Transient
        } else {
            FailureKind::Permanent
        }
    }
}

/// Validation failure before any process is spawned. Always permanent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreflightError {
    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("working directory does not exist: {}", .0.display())]
    MissingWorkingDirectory(PathBuf),

    #[error("backend '{0}' does not support headless execution")]
    UnsupportedBackend(AgentBackend),

    #[error("backend '{backend}' does not support mode '{mode}'")]
    UnsupportedMode { backend: AgentBackend, mode: String },

    #[error("{backend} CLI not found (looked for '{program}')")]
    CliNotFound {
        backend: AgentBackend,
        program: String,
    },

    #[error("no model selected for {0} and no default model is configured")]
    NoModel(AgentBackend),
}

/// Engine-level errors (queue state, persistence, configuration).
#[derive(Debug, Error)]
pub enum ShuttleError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("invalid transition for {task}: {from} -> {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("{task} is {status}; only pending tasks can be {action}")]
    NotPending {
        task: TaskId,
        status: TaskStatus,
        action: &'static str,
    },

    #[error("{task} is no longer running attempt {attempt}")]
    StaleAttempt { task: TaskId, attempt: AttemptId },

    #[error("{0} is not waiting for approval")]
    NotAwaitingApproval(TaskId),

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("store error: {0}")]
    Store(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] crate::app::config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("API Error: 529 Overloaded")]
    #[case("Rate limit exceeded, retry later")]
    #[case("request timed out")]
    #[case("read ECONNRESET")]
    #[case("503 Service Unavailable")]
    fn transient_messages(#[case] msg: &str) {
        assert_eq!(FailureKind::classify(msg), FailureKind::Transient);
    }

    #[rstest]
    #[case("invalid api key")]
    #[case("model not found: claude-x")]
    #[case("maximum number of turns reached")]
    fn permanent_messages(#[case] msg: &str) {
        assert_eq!(FailureKind::classify(msg), FailureKind::Permanent);
    }

    #[test]
    fn preflight_messages_are_human_readable() {
        let err = PreflightError::MissingWorkingDirectory(PathBuf::from("/nope"));
        assert_eq!(err.to_string(), "working directory does not exist: /nope");

        let err = PreflightError::NoModel(AgentBackend::Codex);
        assert!(err.to_string().contains("codex"));
    }
}
