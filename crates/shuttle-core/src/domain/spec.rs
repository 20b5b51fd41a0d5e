//! Input specs for the queue (enqueue / edit intents).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::task::{AgentBackend, Priority};

/// What the user asks for when enqueuing a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub title: String,
    pub prompt: String,
    pub working_dir: PathBuf,
    pub backend: AgentBackend,

    #[serde(default)]
    pub model: Option<String>,

    /// Backend-specific mode (permission mode, sandbox, ...).
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub priority: Priority,

    /// Falls back to the configured default when absent.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Overrides the backoff base delay for this task.
    #[serde(default)]
    pub retry_base_delay_ms: Option<u64>,
}

impl TaskSpec {
    /// Convenience constructor for the common case.
    pub fn new(
        title: impl Into<String>,
        prompt: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        backend: AgentBackend,
    ) -> Self {
        Self {
            title: title.into(),
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            backend,
            model: None,
            mode: None,
            priority: Priority::Normal,
            max_retries: None,
            retry_base_delay_ms: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Fields editable while a task is still pending. `None` leaves a field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskEdit {
    pub title: Option<String>,
    pub prompt: Option<String>,
    pub priority: Option<Priority>,
}

impl TaskEdit {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.prompt.is_none() && self.priority.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_without_optional_fields_gets_defaults() {
        let json = r#"
        {
          "title": "hello",
          "prompt": "say hi",
          "working_dir": "/tmp",
          "backend": "claude"
        }"#;
        let spec: TaskSpec = serde_json::from_str(json).expect("deserialize");
        assert_eq!(spec.priority, Priority::Normal);
        assert_eq!(spec.max_retries, None);
        assert_eq!(spec.backend, AgentBackend::Claude);
    }

    #[test]
    fn empty_edit_is_detected() {
        assert!(TaskEdit::default().is_empty());
        let edit = TaskEdit {
            priority: Some(Priority::High),
            ..TaskEdit::default()
        };
        assert!(!edit.is_empty());
    }
}
