//! Generic CLI runner: launch through a transport, parse stdout, honour the stop token.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{BackendAdapter, BackendSettings, RunHandle, StopToken, StreamParser, TaskRunner, pick_model};
use crate::domain::{AgentBackend, FailureKind, LogStream, PreflightError, RunEvent, RunFailure};
use crate::ports::{AgentTransport, LaunchSpec, TransportEvent, TransportSession};
use crate::queue::TaskRecord;

const EVENT_BUFFER: usize = 256;

pub struct CliTaskRunner<A> {
    adapter: A,
    transport: Arc<dyn AgentTransport>,
    settings: BackendSettings,
}

impl<A: BackendAdapter> CliTaskRunner<A> {
    pub fn new(adapter: A, transport: Arc<dyn AgentTransport>, settings: BackendSettings) -> Self {
        Self {
            adapter,
            transport,
            settings,
        }
    }
}

#[async_trait]
impl<A: BackendAdapter> TaskRunner for CliTaskRunner<A> {
    fn backend(&self) -> AgentBackend {
        self.adapter.backend()
    }

    fn supports_mode(&self, mode: &str) -> bool {
        self.adapter
            .modes()
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mode.trim()))
    }

    fn resolve_executable(&self) -> Result<PathBuf, PreflightError> {
        resolve_executable(self.settings.executable.as_deref(), self.adapter.backend())
    }

    fn resolve_model(&self, task: &TaskRecord) -> Result<String, PreflightError> {
        pick_model(task.model.as_deref(), self.settings.default_model.as_deref())
            .ok_or(PreflightError::NoModel(self.adapter.backend()))
    }

    async fn start(&self, task: &TaskRecord, model: &str) -> Result<RunHandle, RunFailure> {
        let spec = LaunchSpec {
            program: self.resolve_executable()?,
            args: self.adapter.build_args(task, model),
            working_dir: task.working_dir.clone(),
            env: Vec::new(),
        };
        tracing::debug!(
            task_id = %task.id,
            program = %spec.program.display(),
            args = spec.args.len(),
            "launching agent"
        );
        let session = self
            .transport
            .start(spec)
            .await
            .map_err(|e| RunFailure::from_provider(e.to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let stop = StopToken::new();
        tokio::spawn(pump(self.adapter.parser(), session, tx, stop.clone()));
        Ok(RunHandle { events: rx, stop })
    }
}

/// Forward transport output as typed events until the first terminal one.
///
/// A process that exits without a terminal event is a transient disconnect,
/// unless a stop was requested, in which case the run is `Cancelled`.
async fn pump(
    mut parser: Box<dyn StreamParser>,
    session: TransportSession,
    tx: mpsc::Sender<RunEvent>,
    stop: StopToken,
) {
    let TransportSession {
        mut events,
        mut control,
    } = session;
    let mut interrupted = false;
    let mut killed = false;

    loop {
        tokio::select! {
            biased;

            _ = stop.forced(), if !killed => {
                killed = true;
                interrupted = true;
                if let Err(e) = control.terminate().await {
                    tracing::warn!(error = %e, "failed to terminate agent process");
                }
            }
            _ = stop.graceful_requested(), if !interrupted => {
                interrupted = true;
                if let Err(e) = control.interrupt().await {
                    tracing::warn!(error = %e, "failed to interrupt agent process");
                }
            }
            event = events.recv() => match event {
                Some(TransportEvent::Stdout(line)) => {
                    let parsed = parser.parse_line(&line);
                    if tx.send(RunEvent::Log { stream: LogStream::Stdout, line }).await.is_err() {
                        return;
                    }
                    for ev in parsed {
                        let terminal = ev.is_terminal();
                        if tx.send(ev).await.is_err() || terminal {
                            return;
                        }
                    }
                }
                Some(TransportEvent::Stderr(line)) => {
                    if tx.send(RunEvent::Log { stream: LogStream::Stderr, line }).await.is_err() {
                        return;
                    }
                }
                Some(TransportEvent::Exited { code }) => {
                    let _ = tx.send(exit_without_result(code, interrupted)).await;
                    return;
                }
                None => {
                    let _ = tx.send(exit_without_result(None, interrupted)).await;
                    return;
                }
            },
        }
    }
}

fn exit_without_result(code: Option<i32>, interrupted: bool) -> RunEvent {
    if interrupted {
        return RunEvent::Cancelled;
    }
    let code = code.map_or_else(|| "signal".to_string(), |c| format!("code {c}"));
    RunEvent::Error {
        kind: FailureKind::Transient,
        message: format!("agent process exited ({code}) without a final result"),
    }
}

/// Custom path when configured, otherwise the backend's program on PATH.
///
/// A bare custom name (no directory part) is also looked up on PATH.
pub fn resolve_executable(
    custom: Option<&Path>,
    backend: AgentBackend,
) -> Result<PathBuf, PreflightError> {
    let not_found = |program: String| PreflightError::CliNotFound { backend, program };
    match custom {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) if path.components().count() == 1 => {
            let name = path.to_string_lossy();
            find_on_path(&name).ok_or_else(|| not_found(name.into_owned()))
        }
        Some(path) => Err(not_found(path.display().to_string())),
        None => find_on_path(backend.program()).ok_or_else(|| not_found(backend.program().to_string())),
    }
}

pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .flat_map(|dir| candidates(&dir, program))
        .find(|p| p.is_file())
}

fn candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    let mut out = vec![dir.join(program)];
    if cfg!(windows) {
        for ext in ["exe", "cmd", "bat"] {
            out.push(dir.join(format!("{program}.{ext}")));
        }
    }
    out
}
