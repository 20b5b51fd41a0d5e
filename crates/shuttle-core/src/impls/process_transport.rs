//! ProcessTransport - tokio::process で agent CLI を起動する AgentTransport
//!
//! - stdout / stderr は行単位で読み、到着順に channel へ流す
//! - 両方の reader が閉じてから `Exited` を送る（出力の取りこぼしなし）
//! - interrupt: unix では SIGINT（`nix::sys::signal::kill`）、それ以外は stdin を閉じる
//! - terminate: `start_kill`

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ports::{
    AgentTransport, LaunchSpec, TransportControl, TransportError, TransportEvent, TransportSession,
};

const LINE_BUFFER: usize = 512;

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessTransport;

#[async_trait]
impl AgentTransport for ProcessTransport {
    async fn start(&self, spec: LaunchSpec) -> Result<TransportSession, TransportError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })?;
        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or(TransportError::Closed)?;
        let stderr = child.stderr.take().ok_or(TransportError::Closed)?;

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let out_reader = tokio::spawn(read_lines(stdout, tx.clone(), TransportEvent::Stdout));
        let err_reader = tokio::spawn(read_lines(stderr, tx.clone(), TransportEvent::Stderr));

        let kill = CancellationToken::new();
        let kill_signal = kill.clone();
        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_signal.cancelled() => None,
            };
            let status = match exited {
                Some(status) => status,
                None => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(error = %e, "failed to kill agent process");
                    }
                    child.wait().await
                }
            };
            let _ = out_reader.await;
            let _ = err_reader.await;
            let code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to wait for agent process");
                    None
                }
            };
            tracing::debug!(?pid, ?code, "agent process exited");
            let _ = tx.send(TransportEvent::Exited { code }).await;
        });

        tracing::debug!(?pid, program = %spec.program.display(), "agent process started");
        Ok(TransportSession {
            events: rx,
            control: Box::new(ProcessControl { pid, stdin, kill }),
        })
    }
}

async fn read_lines<R>(
    reader: R,
    tx: mpsc::Sender<TransportEvent>,
    wrap: fn(String) -> TransportEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if tx.send(wrap(line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read agent output");
                break;
            }
        }
    }
}

struct ProcessControl {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    kill: CancellationToken,
}

#[async_trait]
impl TransportControl for ProcessControl {
    async fn send(&mut self, line: &str) -> Result<(), TransportError> {
        let stdin = self.stdin.as_mut().ok_or(TransportError::Closed)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn interrupt(&mut self) -> Result<(), TransportError> {
        // Closing stdin alone is enough for CLIs that read prompts from it.
        self.stdin.take();
        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok())
                && let Err(e) = kill(Pid::from_raw(pid), Signal::SIGINT)
            {
                // ESRCH: already gone, the waiter reports the exit.
                tracing::debug!(pid, error = %e, "SIGINT not delivered");
            }
        }
        Ok(())
    }

    async fn terminate(&mut self) -> Result<(), TransportError> {
        self.stdin.take();
        self.kill.cancel();
        Ok(())
    }
}

impl Drop for ProcessControl {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}
