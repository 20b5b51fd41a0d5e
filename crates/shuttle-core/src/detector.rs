//! Risky tool detector: flags tool invocations that deserve a human look.
//!
//! This runs after the tool already executed. A match pauses the queue until
//! someone approves or rejects; it never blocks the action itself. Matching
//! is case-insensitive substring search, so false positives are expected.

use std::fmt;

use serde_json::Value;

const SHELL_TOOLS: &[&str] = &[
    "bash",
    "shell",
    "run_command",
    "terminal",
    "cmd",
    "exec_command",
    "command_execution",
    "local_shell",
];

const WRITE_TOOLS: &[&str] = &[
    "write",
    "edit",
    "multiedit",
    "notebookedit",
    "write_file",
    "edit_file",
    "create_file",
    "str_replace_editor",
    "apply_patch",
    "file_change",
];

/// Checked in order; the first hit is reported.
const SHELL_PATTERNS: &[(RiskCategory, &str)] = &[
    (RiskCategory::VersionControl, "git push"),
    (RiskCategory::VersionControl, "git commit"),
    (RiskCategory::DestructiveFilesystem, "rm -rf"),
    (RiskCategory::DestructiveFilesystem, "rm -r"),
    (RiskCategory::DestructiveSql, "drop"),
    (RiskCategory::DestructiveSql, "delete from"),
    (RiskCategory::DestructiveSql, "truncate"),
    (RiskCategory::PrivilegeEscalation, "sudo"),
    (RiskCategory::Permissions, "chmod"),
    (RiskCategory::Permissions, "chown"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskCategory {
    VersionControl,
    DestructiveFilesystem,
    DestructiveSql,
    PrivilegeEscalation,
    Permissions,
    SensitiveFile,
}

impl RiskCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskCategory::VersionControl => "version control",
            RiskCategory::DestructiveFilesystem => "destructive filesystem operation",
            RiskCategory::DestructiveSql => "destructive sql",
            RiskCategory::PrivilegeEscalation => "privilege escalation",
            RiskCategory::Permissions => "permission change",
            RiskCategory::SensitiveFile => "sensitive file write",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskMatch {
    pub category: RiskCategory,
    pub tool: String,
    pub pattern: String,
    /// The command or path that matched.
    pub subject: String,
}

impl RiskMatch {
    /// Human-readable reason stored on the task.
    pub fn describe(&self) -> String {
        format!(
            "{} via {}: '{}' matched '{}'",
            self.category.as_str(),
            self.tool,
            truncate(&self.subject, 200),
            self.pattern
        )
    }
}

impl fmt::Display for RiskMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RiskyToolDetector;

impl RiskyToolDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn inspect(&self, tool: &str, input: &Value) -> Option<RiskMatch> {
        let name = tool.trim().to_ascii_lowercase();
        if is_shell_tool(&name) {
            let command = shell_command(input)?;
            return check_command(tool, &command);
        }
        if WRITE_TOOLS.contains(&name.as_str()) {
            return target_paths(input)
                .into_iter()
                .find_map(|path| check_path(tool, &path));
        }
        None
    }
}

fn is_shell_tool(name: &str) -> bool {
    SHELL_TOOLS.contains(&name) || name.ends_with("bash") || name.ends_with("shell")
}

/// `command` / `cmd` / `script`, as a string or an argv array.
fn shell_command(input: &Value) -> Option<String> {
    ["command", "cmd", "script"]
        .iter()
        .filter_map(|key| input.get(*key))
        .find_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Array(parts) => Some(
                parts
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => None,
        })
}

fn target_paths(input: &Value) -> Vec<String> {
    let mut paths: Vec<String> = ["file_path", "path", "filePath", "notebook_path", "target"]
        .iter()
        .filter_map(|key| input.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    // apply_patch style input: "*** Update File: <path>" headers.
    if let Some(patch) = input.get("patch").or_else(|| input.get("input")).and_then(Value::as_str) {
        paths.extend(patch.lines().filter_map(|line| {
            ["*** Update File: ", "*** Add File: ", "*** Delete File: "]
                .iter()
                .find_map(|prefix| line.strip_prefix(prefix))
                .map(|p| p.trim().to_string())
        }));
    }
    paths
}

fn check_command(tool: &str, command: &str) -> Option<RiskMatch> {
    let lower = command.to_lowercase();
    SHELL_PATTERNS
        .iter()
        .find(|(_, pattern)| lower.contains(pattern))
        .map(|(category, pattern)| RiskMatch {
            category: *category,
            tool: tool.to_string(),
            pattern: pattern.to_string(),
            subject: command.to_string(),
        })
}

fn check_path(tool: &str, path: &str) -> Option<RiskMatch> {
    let lower = path.replace('\\', "/").to_lowercase();
    let file_name = lower.rsplit('/').next().unwrap_or(&lower);

    let pattern = if file_name == ".env" || file_name.starts_with(".env.") || file_name.ends_with(".env") {
        ".env"
    } else if lower.contains("credentials") {
        "credentials"
    } else if lower.contains(".ssh/") {
        ".ssh/"
    } else if file_name == ".gitconfig" {
        ".gitconfig"
    } else if lower.contains(".github/workflows/") {
        ".github/workflows/"
    } else if file_name == ".gitlab-ci.yml" {
        ".gitlab-ci.yml"
    } else if lower.contains(".circleci/") {
        ".circleci/"
    } else if file_name == "azure-pipelines.yml" || file_name == "jenkinsfile" {
        "ci pipeline"
    } else {
        return None;
    };

    Some(RiskMatch {
        category: RiskCategory::SensitiveFile,
        tool: tool.to_string(),
        pattern: pattern.to_string(),
        subject: path.to_string(),
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
