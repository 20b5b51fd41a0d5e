//! RunnerRegistry - backend ごとの TaskRunner を管理し、preflight を行う

use std::collections::HashMap;
use std::sync::Arc;

use super::TaskRunner;
use crate::domain::{AgentBackend, PreflightError};
use crate::queue::TaskRecord;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("runner for backend '{0}' is already registered")]
    AlreadyRegistered(AgentBackend),
}

/// Backends without a registered runner have no headless execution path.
#[derive(Default)]
pub struct RunnerRegistry {
    runners: HashMap<AgentBackend, Arc<dyn TaskRunner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, runner: Arc<dyn TaskRunner>) -> Result<(), RegistryError> {
        let backend = runner.backend();
        if self.runners.contains_key(&backend) {
            return Err(RegistryError::AlreadyRegistered(backend));
        }
        self.runners.insert(backend, runner);
        Ok(())
    }

    pub fn get(&self, backend: AgentBackend) -> Option<Arc<dyn TaskRunner>> {
        self.runners.get(&backend).cloned()
    }

    pub fn registered_backends(&self) -> Vec<AgentBackend> {
        let mut backends: Vec<_> = self.runners.keys().copied().collect();
        backends.sort();
        backends
    }

    /// Validate before any process starts. Checks run in this order and the
    /// first failure wins:
    ///
    /// 1. prompt is non-empty
    /// 2. working directory exists
    /// 3. backend has a headless runner (and accepts the task's mode)
    /// 4. backend CLI is resolvable
    pub fn preflight(&self, task: &TaskRecord) -> Result<Arc<dyn TaskRunner>, PreflightError> {
        if task.prompt.trim().is_empty() {
            return Err(PreflightError::EmptyPrompt);
        }
        if !task.working_dir.is_dir() {
            return Err(PreflightError::MissingWorkingDirectory(task.working_dir.clone()));
        }
        let runner = self
            .get(task.backend)
            .ok_or(PreflightError::UnsupportedBackend(task.backend))?;
        if let Some(mode) = &task.mode
            && !runner.supports_mode(mode)
        {
            return Err(PreflightError::UnsupportedMode {
                backend: task.backend,
                mode: mode.clone(),
            });
        }
        runner.resolve_executable()?;
        Ok(runner)
    }
}
