//! Config - アプリケーション設定
//!
//! YAML (`serde_yaml`) で読み込み、全フィールドにデフォルトあり。
//! CLI flag / 環境変数での上書きは shuttle-cli 側で行う。
//!
//! ```yaml
//! data_dir: ~/.local/share/shuttle
//! task_timeout_secs: 1800
//! default_max_retries: 3
//! retry:
//!   base_delay: 2000
//!   multiplier: 2.0
//!   max_delay: 60000
//! backends:
//!   claude:
//!     default_model: sonnet
//!   codex:
//!     default_model: gpt-5-codex
//!     executable: /opt/codex/bin/codex
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::AgentBackend;
use crate::queue::{RetryPolicy, millis};
use crate::runner::BackendSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuttleConfig {
    /// Holds `queue.json` and `logs/`.
    pub data_dir: PathBuf,

    #[serde(rename = "save_debounce_ms", with = "millis")]
    pub save_debounce: Duration,

    /// Wall-clock budget per attempt.
    #[serde(rename = "task_timeout_secs", with = "secs")]
    pub task_timeout: Duration,

    /// Graceful stop window before a forced kill.
    #[serde(rename = "cancel_grace_secs", with = "secs")]
    pub cancel_grace: Duration,

    pub log_cap_bytes: u64,
    pub live_window_lines: usize,
    pub default_max_retries: u32,
    pub retry: RetryPolicy,
    pub backends: BackendsConfig,
}

impl Default for ShuttleConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".shuttle"),
            save_debounce: Duration::from_millis(500),
            task_timeout: Duration::from_secs(30 * 60),
            cancel_grace: Duration::from_secs(10),
            log_cap_bytes: 5 * 1024 * 1024,
            live_window_lines: 200,
            default_max_retries: 3,
            retry: RetryPolicy::default(),
            backends: BackendsConfig::default(),
        }
    }
}

/// Settings for the built-in CLI runners. Gemini has no built-in runner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    pub claude: BackendSettings,
    pub codex: BackendSettings,
}

impl BackendsConfig {
    pub fn get(&self, backend: AgentBackend) -> Option<&BackendSettings> {
        match backend {
            AgentBackend::Claude => Some(&self.claude),
            AgentBackend::Codex => Some(&self.codex),
            AgentBackend::Gemini => None,
        }
    }
}

/// Upper bounds keep `Instant + timeout` far from overflow.
pub const MAX_TASK_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const MAX_CANCEL_GRACE: Duration = Duration::from_secs(60 * 60);

impl ShuttleConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_path_buf())
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::from_yaml_str(&text)
    }

    /// No path: defaults. A path that does not exist is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to `()`, not to a mapping.
        let config: ShuttleConfig = if text.trim().is_empty() {
            ShuttleConfig::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::InvalidValue {
                field,
                reason: reason.to_string(),
            })
        };
        if self.task_timeout.is_zero() {
            return invalid("task_timeout_secs", "must be greater than zero");
        }
        if self.task_timeout > MAX_TASK_TIMEOUT {
            return invalid("task_timeout_secs", "must be at most 7 days");
        }
        if self.cancel_grace.is_zero() {
            return invalid("cancel_grace_secs", "must be greater than zero");
        }
        if self.cancel_grace > MAX_CANCEL_GRACE {
            return invalid("cancel_grace_secs", "must be at most 1 hour");
        }
        if self.log_cap_bytes == 0 {
            return invalid("log_cap_bytes", "must be greater than zero");
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier", "must be a finite number >= 1.0");
        }
        if self.retry.max_delay < self.retry.base_delay {
            return invalid("retry.max_delay", "must not be shorter than retry.base_delay");
        }
        Ok(())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("queue.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

/// Serialize `Duration` as integer seconds.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
