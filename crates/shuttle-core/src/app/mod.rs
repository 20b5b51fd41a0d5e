//! App - アプリケーション層
//!
//! ports / queue / runner を組み合わせて実行系を組み立てる。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 設定からのワイヤリングと起動時の crash recovery
//! - **Orchestrator**: 1 タスクずつ実行するスケジューリングループ
//! - **ShuttleConfig**: YAML 設定
//! - **DataDirLock**: data dir を所有するプロセスは 1 つだけ
//! - **status**: UI 向けの集計ビュー

pub mod builder;
pub mod config;
pub mod lock;
pub mod orchestrator;
pub mod status;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::config::{BackendsConfig, ConfigError, ShuttleConfig};
pub use self::lock::{DataDirLock, LockError};
pub use self::orchestrator::{Orchestrator, OrchestratorSettings};
pub use self::status::{QueueCounts, TaskView};
