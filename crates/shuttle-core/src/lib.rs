//! shuttle-core
//!
//! Headless task queue for AI coding agents (Claude Code, Codex CLI, ...).
//! Tasks run one at a time, strictly ordered by priority and queue position;
//! risky tool use pauses the queue until a human decides.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, spec, outcome, errors, events）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, AgentTransport）
//! - **queue**: TaskRecord, QueueState, 永続化（QueueStore）, retry, recovery
//! - **runner**: backend ごとの TaskRunner と preflight
//! - **detector**: risky tool 検出
//! - **logs**: attempt ごとのログ artifact と live window
//! - **app**: builder, orchestrator, config, status views
//! - **impls**: 実装（ProcessTransport）

pub mod app;
pub mod detector;
pub mod domain;
pub mod impls;
pub mod logs;
pub mod ports;
pub mod queue;
pub mod runner;

#[cfg(test)]
pub(crate) mod testing;
