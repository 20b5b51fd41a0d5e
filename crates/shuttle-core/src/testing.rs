//! Test doubles shared by unit tests: a recording transport and a scripted runner.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{AgentBackend, PreflightError, RunEvent, RunFailure, TaskId};
use crate::ports::{
    AgentTransport, FixedClock, LaunchSpec, TransportControl, TransportError, TransportEvent,
    TransportSession,
};
use crate::queue::TaskRecord;
use crate::runner::{RunHandle, StopToken, TaskRunner};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Replays canned output per `start` and records launches and control calls.
pub(crate) struct RecordingTransport {
    scripts: Mutex<VecDeque<Vec<TransportEvent>>>,
    hang: bool,
    launches: Mutex<Vec<LaunchSpec>>,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl RecordingTransport {
    /// Each start replays the next script, then the stream closes.
    pub(crate) fn scripted(scripts: Vec<Vec<TransportEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            hang: false,
            launches: Mutex::default(),
            calls: Arc::default(),
        }
    }

    /// Replays `events` and then stays open until interrupted or terminated.
    pub(crate) fn hanging(events: Vec<TransportEvent>) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::from([events])),
            hang: true,
            launches: Mutex::default(),
            calls: Arc::default(),
        }
    }

    pub(crate) fn launches(&self) -> Vec<LaunchSpec> {
        lock(&self.launches).clone()
    }

    pub(crate) fn control_calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl AgentTransport for RecordingTransport {
    async fn start(&self, spec: LaunchSpec) -> Result<TransportSession, TransportError> {
        lock(&self.launches).push(spec);
        let script = lock(&self.scripts)
            .pop_front()
            .ok_or(TransportError::Closed)?;

        let (tx, rx) = mpsc::channel(script.len() + 4);
        for event in script {
            let _ = tx.try_send(event);
        }
        Ok(TransportSession {
            events: rx,
            control: Box::new(RecordingControl {
                calls: Arc::clone(&self.calls),
                tx: self.hang.then_some(tx),
            }),
        })
    }
}

struct RecordingControl {
    calls: Arc<Mutex<Vec<&'static str>>>,
    tx: Option<mpsc::Sender<TransportEvent>>,
}

impl RecordingControl {
    fn exit(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.try_send(TransportEvent::Exited { code: None });
        }
    }
}

#[async_trait]
impl TransportControl for RecordingControl {
    async fn send(&mut self, _line: &str) -> Result<(), TransportError> {
        lock(&self.calls).push("send");
        Ok(())
    }

    async fn interrupt(&mut self) -> Result<(), TransportError> {
        lock(&self.calls).push("interrupt");
        self.exit();
        Ok(())
    }

    async fn terminate(&mut self) -> Result<(), TransportError> {
        lock(&self.calls).push("terminate");
        self.exit();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Ending {
    /// The events already end the run (or the stream just closes).
    AsScripted,
    /// Waits for a graceful stop, then reports `Cancelled`.
    Hang,
    /// Ignores graceful stops; only forced termination ends it.
    Stubborn,
}

#[derive(Debug, Clone)]
pub(crate) struct Script {
    events: Vec<RunEvent>,
    ending: Ending,
}

impl Script {
    pub(crate) fn events(events: Vec<RunEvent>) -> Self {
        Self { events, ending: Ending::AsScripted }
    }

    pub(crate) fn hanging(events: Vec<RunEvent>) -> Self {
        Self { events, ending: Ending::Hang }
    }

    pub(crate) fn stubborn(events: Vec<RunEvent>) -> Self {
        Self { events, ending: Ending::Stubborn }
    }
}

/// `TaskRunner` that plays one [`Script`] per attempt, in order.
pub(crate) struct ScriptedRunner {
    backend: AgentBackend,
    scripts: Mutex<VecDeque<Script>>,
    started: Mutex<Vec<TaskId>>,
    forced: Arc<AtomicBool>,
    /// Simulates a slow launch by moving the clock on every start.
    slow_start: Option<(Arc<FixedClock>, chrono::Duration)>,
}

impl ScriptedRunner {
    pub(crate) fn new(backend: AgentBackend, scripts: Vec<Script>) -> Self {
        Self {
            backend,
            scripts: Mutex::new(scripts.into()),
            started: Mutex::default(),
            forced: Arc::default(),
            slow_start: None,
        }
    }

    pub(crate) fn with_slow_start(mut self, clock: Arc<FixedClock>, by: chrono::Duration) -> Self {
        self.slow_start = Some((clock, by));
        self
    }

    /// Task ids in start order.
    pub(crate) fn started(&self) -> Vec<TaskId> {
        lock(&self.started).clone()
    }

    pub(crate) fn was_forced(&self) -> bool {
        self.forced.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    fn backend(&self) -> AgentBackend {
        self.backend
    }

    fn supports_mode(&self, _mode: &str) -> bool {
        true
    }

    fn resolve_executable(&self) -> Result<PathBuf, PreflightError> {
        Ok(PathBuf::from("scripted-agent"))
    }

    fn resolve_model(&self, task: &TaskRecord) -> Result<String, PreflightError> {
        Ok(task.model.clone().unwrap_or_else(|| "test-model".to_string()))
    }

    async fn start(&self, task: &TaskRecord, _model: &str) -> Result<RunHandle, RunFailure> {
        let script = lock(&self.scripts)
            .pop_front()
            .ok_or_else(|| RunFailure::permanent("no scripted run left"))?;
        lock(&self.started).push(task.id);
        if let Some((clock, by)) = &self.slow_start {
            clock.advance(*by);
        }

        let (tx, rx) = mpsc::channel(64);
        let stop = StopToken::new();
        let token = stop.clone();
        let forced = Arc::clone(&self.forced);
        tokio::spawn(async move {
            for event in script.events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            match script.ending {
                Ending::AsScripted => {}
                Ending::Hang => {
                    token.graceful_requested().await;
                    let _ = tx.send(RunEvent::Cancelled).await;
                }
                Ending::Stubborn => {
                    token.forced().await;
                    forced.store(true, Ordering::SeqCst);
                    let _ = tx.send(RunEvent::Cancelled).await;
                }
            }
        });
        Ok(RunHandle { events: rx, stop })
    }
}
