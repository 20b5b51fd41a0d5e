//! Events - ドメインイベント
//!
//! - `RunEvent`: runner -> orchestrator の型付きイベント
//! - `QueueEvent`: queue state -> UI の変更通知

use serde::{Deserialize, Serialize};

use super::errors::FailureKind;
use super::ids::TaskId;

/// Which output stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
    Agent,
}

/// One event in a run's ordered stream.
///
/// Only `Result`, `Error` and `Cancelled` end a run. Tool calls, partial
/// output and step markers are intermediate even when they look final.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Log {
        stream: LogStream,
        line: String,
    },
    Progress {
        label: String,
    },
    Session {
        session_id: String,
    },
    ToolUse {
        tool: String,
        input: serde_json::Value,
    },
    Result {
        summary: String,
        session_id: Option<String>,
    },
    Error {
        kind: FailureKind,
        message: String,
    },
    Cancelled,
}

impl RunEvent {
    /// The single completion check for a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEvent::Result { .. } | RunEvent::Error { .. } | RunEvent::Cancelled
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::Log { .. } => "log",
            RunEvent::Progress { .. } => "progress",
            RunEvent::Session { .. } => "session",
            RunEvent::ToolUse { .. } => "tool_use",
            RunEvent::Result { .. } => "result",
            RunEvent::Error { .. } => "error",
            RunEvent::Cancelled => "cancelled",
        }
    }
}

/// "Queue changed" notification for UI / bot layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    TaskAdded(TaskId),
    TaskUpdated(TaskId),
    TaskRemoved(TaskId),
    ApprovalRequested { task: TaskId, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::log(RunEvent::Log { stream: LogStream::Stdout, line: "done".into() }, false)]
    #[case::progress(RunEvent::Progress { label: "final step".into() }, false)]
    #[case::tool(RunEvent::ToolUse { tool: "Bash".into(), input: serde_json::json!({}) }, false)]
    #[case::session(RunEvent::Session { session_id: "s".into() }, false)]
    #[case::result(RunEvent::Result { summary: "ok".into(), session_id: None }, true)]
    #[case::error(RunEvent::Error { kind: FailureKind::Permanent, message: "x".into() }, true)]
    #[case::cancelled(RunEvent::Cancelled, true)]
    fn only_explicit_terminal_events_end_a_run(#[case] event: RunEvent, #[case] terminal: bool) {
        assert_eq!(event.is_terminal(), terminal);
    }
}
