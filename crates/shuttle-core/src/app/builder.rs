//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! config -> data dir lock -> store -> load + crash recovery -> QueueState -> runners -> Orchestrator
//!
//! 起動時検証（Fail-fast）: 設定値・runner 登録の重複・data dir の二重起動は
//! build() でエラーにする。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::config::{ConfigError, ShuttleConfig};
use super::lock::{DataDirLock, LockError};
use super::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::domain::{AgentBackend, ShuttleError};
use crate::impls::ProcessTransport;
use crate::logs::LiveWindow;
use crate::ports::{AgentTransport, Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::queue::{QueueState, QueueStore, recover_interrupted};
use crate::runner::{
    ClaudeAdapter, CliTaskRunner, CodexAdapter, RegistryError, RunnerRegistry, TaskRunner,
};

/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(ShuttleConfig::load(path)?).build().await?;
/// let state = app.state();
/// state.enqueue(spec).await?;
/// app.run(shutdown).await?;
/// ```
pub struct AppBuilder {
    config: ShuttleConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    transport: Option<Arc<dyn AgentTransport>>,
    runners: Vec<Arc<dyn TaskRunner>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Locked(#[from] LockError),

    #[error("failed to persist recovered queue: {0}")]
    Store(#[from] ShuttleError),
}

impl AppBuilder {
    pub fn new(config: ShuttleConfig) -> Self {
        Self {
            config,
            clock: None,
            ids: None,
            transport: None,
            runners: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Transport for the built-in CLI runners (default: [`ProcessTransport`]).
    pub fn with_transport(mut self, transport: Arc<dyn AgentTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Takes the place of the built-in runner for the same backend.
    pub fn with_runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.runners.push(runner);
        self
    }

    pub async fn build(self) -> Result<App, BuildError> {
        let config = self.config;
        config.validate()?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let transport: Arc<dyn AgentTransport> =
            self.transport.unwrap_or_else(|| Arc::new(ProcessTransport));

        let mut registry = RunnerRegistry::new();
        for runner in self.runners {
            registry.register(runner)?;
        }
        for backend in AgentBackend::ALL {
            if registry.get(backend).is_some() {
                continue;
            }
            let Some(settings) = config.backends.get(backend).cloned() else {
                continue;
            };
            let transport = Arc::clone(&transport);
            let runner: Arc<dyn TaskRunner> = match backend {
                AgentBackend::Claude => Arc::new(CliTaskRunner::new(ClaudeAdapter, transport, settings)),
                AgentBackend::Codex => Arc::new(CliTaskRunner::new(CodexAdapter, transport, settings)),
                AgentBackend::Gemini => continue,
            };
            registry.register(runner)?;
        }

        // Before the first read: a second process must not load a snapshot
        // the owner is about to overwrite.
        let lock = DataDirLock::acquire(&config.data_dir)?;

        let store = Arc::new(QueueStore::new(config.snapshot_path(), config.save_debounce));
        let mut snapshot = store.load();
        let recovered = recover_interrupted(&mut snapshot, clock.now());

        let (state, intents) = QueueState::new(
            snapshot,
            store,
            clock,
            ids,
            config.retry.clone(),
            config.default_max_retries,
        );
        let state = Arc::new(state);
        if recovered > 0 {
            tracing::warn!(recovered, "requeued tasks interrupted by a previous shutdown");
            state.flush().await?;
        }

        tracing::info!(
            data_dir = %config.data_dir.display(),
            tasks = state.counts().await.total(),
            backends = ?registry.registered_backends(),
            "shuttle ready"
        );

        let live = LiveWindow::new(config.live_window_lines);
        let orchestrator = Orchestrator::new(
            Arc::clone(&state),
            Arc::new(registry),
            OrchestratorSettings {
                task_timeout: config.task_timeout,
                cancel_grace: config.cancel_grace,
                log_cap_bytes: config.log_cap_bytes,
                logs_dir: config.logs_dir(),
            },
            intents,
            live,
        );

        Ok(App {
            config,
            state,
            orchestrator,
            _lock: lock,
        })
    }
}

/// A wired application: queue state for reads and intents, plus the
/// orchestrator that executes it.
///
/// Owns the data dir until dropped (after `run` returns).
pub struct App {
    config: ShuttleConfig,
    state: Arc<QueueState>,
    orchestrator: Orchestrator,
    _lock: DataDirLock,
}

impl App {
    pub fn config(&self) -> &ShuttleConfig {
        &self.config
    }

    pub fn state(&self) -> Arc<QueueState> {
        Arc::clone(&self.state)
    }

    pub fn live_log(&self) -> LiveWindow {
        self.orchestrator.live_log()
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ShuttleError> {
        self.orchestrator.run(shutdown).await
    }

    pub async fn run_until_idle(self, shutdown: CancellationToken) -> Result<(), ShuttleError> {
        self.orchestrator.run_until_idle(shutdown).await
    }
}
