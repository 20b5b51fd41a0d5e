//! Task runners: turn a task into a live, cancellable stream of [`RunEvent`]s.
//!
//! - [`TaskRunner`]: one per agent backend (the orchestrator only sees this)
//! - [`CliTaskRunner`]: generic runner over an [`AgentTransport`], parameterised
//!   by a [`BackendAdapter`] that knows the backend's argv and output format
//! - [`RunnerRegistry`]: backend -> runner lookup plus ordered preflight
//!
//! [`AgentTransport`]: crate::ports::AgentTransport

mod claude;
mod cli;
mod codex;
mod registry;
mod stop;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::{AgentBackend, PreflightError, RunEvent, RunFailure};
use crate::queue::TaskRecord;

pub use claude::ClaudeAdapter;
pub use cli::{CliTaskRunner, find_on_path, resolve_executable};
pub use codex::CodexAdapter;
pub use registry::{RegistryError, RunnerRegistry};
pub use stop::StopToken;

/// Per-backend settings from application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Used when the task has no model of its own.
    pub default_model: Option<String>,
    /// Custom executable path; otherwise the backend's program is looked up on PATH.
    pub executable: Option<PathBuf>,
}

/// A started run.
///
/// `events` is strictly ordered and ends after exactly one terminal event
/// (`Result`, `Error` or `Cancelled`). Dropping the handle abandons the run.
pub struct RunHandle {
    pub events: mpsc::Receiver<RunEvent>,
    pub stop: StopToken,
}

impl RunHandle {
    /// Request a graceful stop.
    pub fn cancel(&self) {
        self.stop.request_graceful();
    }

    /// Escalate to forced termination.
    pub fn terminate(&self) {
        self.stop.force();
    }
}

#[async_trait]
pub trait TaskRunner: Send + Sync {
    fn backend(&self) -> AgentBackend;

    fn supports_mode(&self, mode: &str) -> bool;

    /// Locate the backend CLI without starting it.
    fn resolve_executable(&self) -> Result<PathBuf, PreflightError>;

    /// Task's own model, else the configured default, else a permanent error.
    fn resolve_model(&self, task: &TaskRecord) -> Result<String, PreflightError>;

    async fn start(&self, task: &TaskRecord, model: &str) -> Result<RunHandle, RunFailure>;
}

/// Turns raw stdout lines of one run into typed events. One per run.
pub trait StreamParser: Send {
    fn parse_line(&mut self, line: &str) -> Vec<RunEvent>;
}

/// Backend specifics for [`CliTaskRunner`].
pub trait BackendAdapter: Send + Sync + 'static {
    fn backend(&self) -> AgentBackend;

    /// Accepted values for a task's `mode`.
    fn modes(&self) -> &'static [&'static str];

    fn build_args(&self, task: &TaskRecord, model: &str) -> Vec<String>;

    fn parser(&self) -> Box<dyn StreamParser>;
}

/// Trimmed, non-empty model name.
pub(crate) fn pick_model(task_model: Option<&str>, default_model: Option<&str>) -> Option<String> {
    [task_model, default_model]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|m| !m.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("opus"), Some("sonnet"), Some("opus"))]
    #[case(None, Some("sonnet"), Some("sonnet"))]
    #[case(Some("  "), Some("sonnet"), Some("sonnet"))]
    #[case(None, Some(""), None)]
    #[case(None, None, None)]
    fn model_fallback(
        #[case] task: Option<&str>,
        #[case] default: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(pick_model(task, default).as_deref(), expected);
    }
}
