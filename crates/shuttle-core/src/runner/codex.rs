//! Codex adapter: `codex exec --json`.
//!
//! Events are JSON lines: `thread.started`, `turn.started`, `item.*` (command
//! executions, file changes, MCP tool calls, agent messages), then
//! `turn.completed` or `turn.failed`. Only the last two (and a top-level
//! `error`) end a run.

use std::collections::HashSet;

use serde_json::{Value, json};

use super::{BackendAdapter, StreamParser};
use crate::domain::{AgentBackend, FailureKind, LogStream, RunEvent};
use crate::queue::TaskRecord;

#[derive(Debug, Clone, Copy, Default)]
pub struct CodexAdapter;

impl BackendAdapter for CodexAdapter {
    fn backend(&self) -> AgentBackend {
        AgentBackend::Codex
    }

    fn modes(&self) -> &'static [&'static str] {
        &["read-only", "workspace-write", "danger-full-access"]
    }

    fn build_args(&self, task: &TaskRecord, model: &str) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "--json".to_string(),
            "--model".to_string(),
            model.to_string(),
            "--cd".to_string(),
            task.working_dir.display().to_string(),
            "--skip-git-repo-check".to_string(),
        ];
        if let Some(mode) = &task.mode {
            args.push("--sandbox".to_string());
            args.push(mode.clone());
        }
        args.push("--".to_string());
        args.push(task.prompt.clone());
        args
    }

    fn parser(&self) -> Box<dyn StreamParser> {
        Box::new(CodexStream::default())
    }
}

#[derive(Debug, Default)]
struct CodexStream {
    thread_id: Option<String>,
    last_message: Option<String>,
    /// Item ids already reported as tool use (started and completed both arrive).
    reported: HashSet<String>,
}

impl StreamParser for CodexStream {
    fn parse_line(&mut self, line: &str) -> Vec<RunEvent> {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return Vec::new();
        };

        match str_field(&value, "type") {
            Some("thread.started") => match str_field(&value, "thread_id") {
                Some(id) => {
                    self.thread_id = Some(id.to_string());
                    vec![RunEvent::Session {
                        session_id: id.to_string(),
                    }]
                }
                None => Vec::new(),
            },
            Some("turn.started") => vec![RunEvent::Progress {
                label: "turn started".to_string(),
            }],
            Some(kind @ ("item.started" | "item.updated" | "item.completed")) => {
                let completed = kind == "item.completed";
                value
                    .get("item")
                    .map(|item| self.on_item(item, completed))
                    .unwrap_or_default()
            }
            Some("turn.completed") => vec![RunEvent::Result {
                summary: self.last_message.take().unwrap_or_default(),
                session_id: self.thread_id.clone(),
            }],
            Some("turn.failed") => {
                let message = value
                    .get("error")
                    .and_then(|e| str_field(e, "message"))
                    .unwrap_or("codex turn failed")
                    .to_string();
                vec![error_event(message)]
            }
            Some("error") => {
                let message = str_field(&value, "message")
                    .unwrap_or("codex reported an error")
                    .to_string();
                vec![error_event(message)]
            }
            _ => Vec::new(),
        }
    }
}

impl CodexStream {
    fn on_item(&mut self, item: &Value, completed: bool) -> Vec<RunEvent> {
        let id = str_field(item, "id").unwrap_or_default().to_string();
        match str_field(item, "type") {
            Some("command_execution") => {
                let mut out = Vec::new();
                if self.first_report(&id) {
                    out.push(RunEvent::ToolUse {
                        tool: "shell".to_string(),
                        input: json!({ "command": item.get("command").cloned().unwrap_or(Value::Null) }),
                    });
                }
                if completed {
                    let code = item
                        .get("exit_code")
                        .and_then(Value::as_i64)
                        .map_or_else(|| "?".to_string(), |c| c.to_string());
                    out.push(RunEvent::Progress {
                        label: format!("command finished (exit {code})"),
                    });
                }
                out
            }
            Some("file_change") if completed && self.first_report(&id) => item
                .get("changes")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .map(|change| RunEvent::ToolUse {
                    tool: "file_change".to_string(),
                    input: json!({
                        "path": change.get("path").cloned().unwrap_or(Value::Null),
                        "kind": change.get("kind").cloned().unwrap_or(Value::Null),
                    }),
                })
                .collect(),
            Some("mcp_tool_call") if self.first_report(&id) => vec![RunEvent::ToolUse {
                tool: str_field(item, "tool").unwrap_or("mcp").to_string(),
                input: item.get("arguments").cloned().unwrap_or(Value::Null),
            }],
            Some("agent_message") if completed => match str_field(item, "text") {
                Some(text) => {
                    self.last_message = Some(text.to_string());
                    vec![RunEvent::Log {
                        stream: LogStream::Agent,
                        line: text.to_string(),
                    }]
                }
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Items without an id are always reported.
    fn first_report(&mut self, id: &str) -> bool {
        id.is_empty() || self.reported.insert(id.to_string())
    }
}

fn error_event(message: String) -> RunEvent {
    RunEvent::Error {
        kind: FailureKind::classify(&message),
        message,
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskSpec};
    use chrono::Utc;
    use ulid::Ulid;

    fn parse(lines: &[Value]) -> Vec<RunEvent> {
        let mut p = CodexStream::default();
        lines
            .iter()
            .flat_map(|l| p.parse_line(&l.to_string()))
            .collect()
    }

    #[test]
    fn full_turn_ends_with_last_agent_message() {
        let events = parse(&[
            json!({"type":"thread.started","thread_id":"th_1"}),
            json!({"type":"turn.started"}),
            json!({"type":"item.started","item":{"id":"i1","type":"command_execution","command":"rm -rf build","status":"in_progress"}}),
            json!({"type":"item.completed","item":{"id":"i1","type":"command_execution","command":"rm -rf build","exit_code":0}}),
            json!({"type":"item.completed","item":{"id":"i2","type":"agent_message","text":"Cleaned the build dir."}}),
            json!({"type":"turn.completed","usage":{}}),
        ]);

        let tool_uses = events
            .iter()
            .filter(|e| matches!(e, RunEvent::ToolUse { .. }))
            .count();
        assert_eq!(tool_uses, 1);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(
            events.last(),
            Some(&RunEvent::Result {
                summary: "Cleaned the build dir.".into(),
                session_id: Some("th_1".into())
            })
        );
    }

    #[test]
    fn file_changes_become_tool_uses_per_path() {
        let events = parse(&[json!({"type":"item.completed","item":{"id":"f1","type":"file_change","changes":[
            {"path":".env","kind":"update"},
            {"path":"src/main.rs","kind":"update"}
        ]}})]);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], RunEvent::ToolUse { tool, input } if tool == "file_change" && input["path"] == ".env"));
    }

    #[test]
    fn turn_failed_is_classified() {
        let events = parse(&[json!({"type":"turn.failed","error":{"message":"stream disconnected: network error"}})]);
        assert!(matches!(&events[0], RunEvent::Error { kind: FailureKind::Transient, .. }));
    }

    #[test]
    fn args_put_prompt_last() {
        let spec = TaskSpec::new("t", "add tests", "/repo", AgentBackend::Codex).with_mode("read-only");
        let task = TaskRecord::new(TaskId::from_ulid(Ulid::new()), spec, 3, Utc::now());
        let args = CodexAdapter.build_args(&task, "gpt-5-codex");
        assert_eq!(args[0], "exec");
        assert!(args.ends_with(&["--".to_string(), "add tests".to_string()]));
        assert!(args.windows(2).any(|w| w == ["--sandbox", "read-only"]));
    }
}
