//! Claude Code adapter: `claude -p --output-format stream-json ... -- <prompt>`.
//!
//! Stream shape (one JSON object per line):
//! - `system` / `init`: carries the session id
//! - `assistant`: content blocks (`text`, `tool_use`, `thinking`)
//! - `user`: tool results fed back to the model
//! - `result`: the only terminal line (`is_error` / `subtype` tell success apart)

use serde_json::Value;

use super::{BackendAdapter, StreamParser};
use crate::domain::{AgentBackend, FailureKind, LogStream, RunEvent};
use crate::queue::TaskRecord;

#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeAdapter;

impl BackendAdapter for ClaudeAdapter {
    fn backend(&self) -> AgentBackend {
        AgentBackend::Claude
    }

    fn modes(&self) -> &'static [&'static str] {
        &["default", "acceptEdits", "plan", "bypassPermissions"]
    }

    fn build_args(&self, task: &TaskRecord, model: &str) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--model".to_string(),
            model.to_string(),
        ];
        if let Some(mode) = &task.mode {
            args.push("--permission-mode".to_string());
            args.push(mode.clone());
        }
        // Prompts may start with '-'.
        args.push("--".to_string());
        args.push(task.prompt.clone());
        args
    }

    fn parser(&self) -> Box<dyn StreamParser> {
        Box::new(ClaudeStream::default())
    }
}

#[derive(Debug, Default)]
struct ClaudeStream {
    session_id: Option<String>,
}

impl StreamParser for ClaudeStream {
    fn parse_line(&mut self, line: &str) -> Vec<RunEvent> {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return Vec::new();
        };

        match str_field(&value, "type") {
            Some("system") => self.on_system(&value),
            Some("assistant") => on_assistant(&value),
            Some("user") => on_user(&value),
            Some("result") => vec![self.on_result(&value)],
            _ => Vec::new(),
        }
    }
}

impl ClaudeStream {
    fn on_system(&mut self, value: &Value) -> Vec<RunEvent> {
        if str_field(value, "subtype") != Some("init") {
            return Vec::new();
        }
        match str_field(value, "session_id") {
            Some(id) => {
                self.session_id = Some(id.to_string());
                vec![RunEvent::Session {
                    session_id: id.to_string(),
                }]
            }
            None => Vec::new(),
        }
    }

    fn on_result(&mut self, value: &Value) -> RunEvent {
        let session_id = str_field(value, "session_id")
            .map(str::to_string)
            .or_else(|| self.session_id.clone());
        let subtype = str_field(value, "subtype").unwrap_or("success");
        let is_error = value
            .get("is_error")
            .and_then(Value::as_bool)
            .unwrap_or(false)
            || subtype != "success";
        let text = str_field(value, "result").unwrap_or_default().to_string();

        if is_error {
            let message = if text.is_empty() {
                format!("claude reported {subtype}")
            } else {
                text
            };
            RunEvent::Error {
                kind: FailureKind::classify(&message),
                message,
            }
        } else {
            RunEvent::Result {
                summary: text,
                session_id,
            }
        }
    }
}

fn on_assistant(value: &Value) -> Vec<RunEvent> {
    content_blocks(value)
        .filter_map(|block| match str_field(block, "type") {
            Some("text") => str_field(block, "text")
                .filter(|t| !t.trim().is_empty())
                .map(|t| RunEvent::Log {
                    stream: LogStream::Agent,
                    line: t.to_string(),
                }),
            Some("tool_use") => Some(RunEvent::ToolUse {
                tool: str_field(block, "name").unwrap_or("unknown").to_string(),
                input: block.get("input").cloned().unwrap_or(Value::Null),
            }),
            _ => None,
        })
        .collect()
}

fn on_user(value: &Value) -> Vec<RunEvent> {
    content_blocks(value)
        .filter(|block| str_field(block, "type") == Some("tool_result"))
        .map(|_| RunEvent::Progress {
            label: "tool result".to_string(),
        })
        .collect()
}

fn content_blocks(value: &Value) -> impl Iterator<Item = &Value> {
    value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, TaskSpec};
    use chrono::Utc;
    use serde_json::json;
    use ulid::Ulid;

    fn parse(lines: &[Value]) -> Vec<RunEvent> {
        let mut p = ClaudeStream::default();
        lines
            .iter()
            .flat_map(|l| p.parse_line(&l.to_string()))
            .collect()
    }

    #[test]
    fn tool_use_turn_is_not_terminal() {
        let events = parse(&[
            json!({"type":"system","subtype":"init","session_id":"abc"}),
            json!({"type":"assistant","message":{"content":[
                {"type":"text","text":"Let me check."},
                {"type":"tool_use","name":"Bash","input":{"command":"git status"}}
            ]}}),
            json!({"type":"user","message":{"content":[{"type":"tool_result","content":"clean"}]}}),
            json!({"type":"assistant","message":{"content":[{"type":"text","text":"All clean."}]}}),
        ]);
        assert!(events.iter().all(|e| !e.is_terminal()));
        assert!(matches!(&events[0], RunEvent::Session { session_id } if session_id == "abc"));
        assert!(events.iter().any(|e| matches!(e, RunEvent::ToolUse { input, .. } if input["command"] == "git status")));
    }

    #[test]
    fn success_result_carries_session_from_init() {
        let events = parse(&[
            json!({"type":"system","subtype":"init","session_id":"abc"}),
            json!({"type":"result","subtype":"success","is_error":false,"result":"Done."}),
        ]);
        assert_eq!(
            events.last(),
            Some(&RunEvent::Result {
                summary: "Done.".into(),
                session_id: Some("abc".into())
            })
        );
    }

    #[test]
    fn error_results_are_classified() {
        let events = parse(&[json!({"type":"result","subtype":"error_during_execution","is_error":true,"result":"API Error: 529 overloaded"})]);
        assert!(matches!(&events[0], RunEvent::Error { kind: FailureKind::Transient, .. }));

        let events = parse(&[json!({"type":"result","subtype":"error_max_turns","is_error":true})]);
        assert!(matches!(
            &events[0],
            RunEvent::Error { kind: FailureKind::Permanent, message } if message == "claude reported error_max_turns"
        ));
    }

    #[test]
    fn non_json_lines_are_ignored() {
        assert!(ClaudeStream::default().parse_line("Loading...").is_empty());
    }

    #[test]
    fn args_include_mode_when_set() {
        let spec = TaskSpec::new("t", "fix it", "/repo", AgentBackend::Claude).with_mode("plan");
        let task = TaskRecord::new(TaskId::from_ulid(Ulid::new()), spec, 3, Utc::now());
        let args = ClaudeAdapter.build_args(&task, "opus");
        assert_eq!(args[0], "-p");
        assert!(args.windows(2).any(|w| w == ["--permission-mode", "plan"]));
        assert!(args.ends_with(&["--".to_string(), "fix it".to_string()]));
    }

    #[test]
    fn dash_prompt_is_not_read_as_a_flag() {
        let spec = TaskSpec::new("t", "--help me refactor", "/repo", AgentBackend::Claude);
        let task = TaskRecord::new(TaskId::from_ulid(Ulid::new()), spec, 3, Utc::now());
        let args = ClaudeAdapter.build_args(&task, "opus");
        let sep = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(args[sep + 1..], ["--help me refactor"]);
    }
}
