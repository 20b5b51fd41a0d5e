//! Log collector: one timestamped artifact per task attempt.
//!
//! - file: `<logs_dir>/<task-id>/<attempt-id>.log`, one line per event
//! - hard size cap; at the cap a truncation marker is written and later
//!   lines are dropped (a write failure is treated the same way)
//! - a bounded live window keeps the most recent lines for UIs

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::domain::{AttemptId, FailureKind, LogStream, RunEvent, TaskId};

pub const TRUNCATION_MARKER: &str = "[log truncated: size cap reached, further output dropped]";

/// Shared ring of the most recent log lines.
#[derive(Debug, Clone)]
pub struct LiveWindow {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LiveWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        while lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

pub struct LogCollector {
    path: Option<PathBuf>,
    file: Option<BufWriter<File>>,
    written: u64,
    cap: u64,
    truncated: bool,
    window: LiveWindow,
}

impl LogCollector {
    /// Never fails: without a file the collector still feeds the live window.
    pub async fn open(
        logs_dir: &Path,
        task: TaskId,
        attempt: AttemptId,
        cap: u64,
        window: LiveWindow,
    ) -> Self {
        let dir = logs_dir.join(task.to_string());
        let path = dir.join(format!("{attempt}.log"));
        let file = match fs::create_dir_all(&dir).await {
            Ok(()) => File::create(&path).await,
            Err(e) => Err(e),
        };
        window.clear();

        match file {
            Ok(file) => Self {
                path: Some(path),
                file: Some(BufWriter::new(file)),
                written: 0,
                cap,
                truncated: false,
                window,
            },
            Err(e) => {
                tracing::warn!(task_id = %task, path = %path.display(), error = %e, "cannot create log artifact");
                Self {
                    path: None,
                    file: None,
                    written: 0,
                    cap,
                    truncated: true,
                    window,
                }
            }
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub async fn record(&mut self, event: &RunEvent) {
        let (tag, text) = render(event);
        self.write_line(tag, &text).await;
    }

    /// Orchestrator annotation (preflight failure, timeout, approval...).
    pub async fn note(&mut self, text: &str) {
        self.write_line("shuttle", text).await;
    }

    pub async fn finish(mut self) -> Option<PathBuf> {
        if let Some(file) = self.file.as_mut()
            && let Err(e) = file.flush().await
        {
            tracing::warn!(error = %e, "failed to flush log artifact");
        }
        self.path
    }

    async fn write_line(&mut self, tag: &str, text: &str) {
        self.window.push(format!("[{tag}] {text}"));
        if self.truncated {
            return;
        }
        let Some(file) = self.file.as_mut() else {
            return;
        };

        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let line = format!("{stamp} [{tag}] {text}\n");
        let len = line.len() as u64;

        if self.written + len > self.cap {
            self.truncated = true;
            let marker = format!("{stamp} {TRUNCATION_MARKER} ({} bytes)\n", self.cap);
            if let Err(e) = file.write_all(marker.as_bytes()).await {
                tracing::warn!(error = %e, "failed to write log truncation marker");
            }
            return;
        }

        match file.write_all(line.as_bytes()).await {
            Ok(()) => self.written += len,
            Err(e) => {
                tracing::warn!(error = %e, "log artifact write failed; truncating");
                self.truncated = true;
                let marker = format!("{stamp} {TRUNCATION_MARKER} (write error: {e})\n");
                let _ = file.write_all(marker.as_bytes()).await;
            }
        }
    }
}

fn render(event: &RunEvent) -> (&'static str, String) {
    match event {
        RunEvent::Log { stream, line } => {
            let tag = match stream {
                LogStream::Stdout => "stdout",
                LogStream::Stderr => "stderr",
                LogStream::Agent => "agent",
            };
            (tag, line.clone())
        }
        RunEvent::Progress { label } => ("progress", label.clone()),
        RunEvent::Session { session_id } => ("session", session_id.clone()),
        RunEvent::ToolUse { tool, input } => ("tool", format!("{tool} {input}")),
        RunEvent::Result { summary, .. } => ("result", summary.clone()),
        RunEvent::Error { kind, message } => {
            let kind = match kind {
                FailureKind::Transient => "transient",
                FailureKind::Permanent => "permanent",
            };
            ("error", format!("({kind}) {message}"))
        }
        RunEvent::Cancelled => ("cancelled", "run stopped".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn ids() -> (TaskId, AttemptId) {
        (TaskId::from_ulid(Ulid::new()), AttemptId::from_ulid(Ulid::new()))
    }

    fn log(line: &str) -> RunEvent {
        RunEvent::Log {
            stream: LogStream::Stdout,
            line: line.to_string(),
        }
    }

    #[tokio::test]
    async fn writes_ordered_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (task, attempt) = ids();
        let mut c = LogCollector::open(dir.path(), task, attempt, 1024 * 1024, LiveWindow::new(10)).await;

        c.record(&log("first")).await;
        c.record(&RunEvent::Result { summary: "done".into(), session_id: None }).await;
        let path = c.finish().await.unwrap();

        assert_eq!(path, dir.path().join(task.to_string()).join(format!("{attempt}.log")));
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[stdout] first"));
        assert!(lines[1].ends_with("[result] done"));
    }

    #[tokio::test]
    async fn cap_drops_tail_and_leaves_marker() {
        let dir = tempfile::tempdir().unwrap();
        let (task, attempt) = ids();
        let mut c = LogCollector::open(dir.path(), task, attempt, 200, LiveWindow::new(100)).await;

        for i in 0..50 {
            c.record(&log(&format!("line {i}"))).await;
        }
        assert!(c.is_truncated());
        assert!(c.bytes_written() <= 200);
        let path = c.finish().await.unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains(TRUNCATION_MARKER));
        assert_eq!(text.matches(TRUNCATION_MARKER).count(), 1);
        assert!(!text.contains("line 49"));
    }

    #[tokio::test]
    async fn live_window_is_bounded_and_keeps_going_past_cap() {
        let dir = tempfile::tempdir().unwrap();
        let (task, attempt) = ids();
        let window = LiveWindow::new(3);
        let mut c = LogCollector::open(dir.path(), task, attempt, 100, window.clone()).await;

        for i in 0..10 {
            c.record(&log(&format!("l{i}"))).await;
        }
        assert_eq!(window.lines(), vec!["[stdout] l7", "[stdout] l8", "[stdout] l9"]);
    }

    #[tokio::test]
    async fn unwritable_dir_still_feeds_window() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let (task, attempt) = ids();
        let window = LiveWindow::new(5);

        let mut c = LogCollector::open(&blocker, task, attempt, 1024, window.clone()).await;
        assert!(c.path().is_none());
        c.note("preflight: prompt is empty").await;
        assert_eq!(window.lines(), vec!["[shuttle] preflight: prompt is empty"]);
        assert!(c.finish().await.is_none());
    }
}
