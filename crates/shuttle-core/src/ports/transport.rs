//! Transport port - agent CLI process との入出力
//!
//! A transport starts one agent process and hands back:
//! - an ordered channel of raw output lines (and the final exit)
//! - a control handle: send / interrupt / terminate
//!
//! Runners parse the raw lines into typed [`RunEvent`](crate::domain::RunEvent)s;
//! the transport itself knows nothing about any backend's output format.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

/// Raw output from the process, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Stdout(String),
    Stderr(String),
    /// Always the last event. `code` is `None` when killed by a signal.
    Exited { code: Option<i32> },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("transport closed")]
    Closed,

    #[error("transport io error: {0}")]
    Io(#[from] io::Error),
}

/// Control side of a live process.
#[async_trait]
pub trait TransportControl: Send {
    /// Write one line to the process' stdin.
    async fn send(&mut self, line: &str) -> Result<(), TransportError>;

    /// Ask the process to stop (SIGINT where available).
    async fn interrupt(&mut self) -> Result<(), TransportError>;

    /// Kill the process.
    async fn terminate(&mut self) -> Result<(), TransportError>;
}

pub struct TransportSession {
    pub events: mpsc::Receiver<TransportEvent>,
    pub control: Box<dyn TransportControl>,
}

#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn start(&self, spec: LaunchSpec) -> Result<TransportSession, TransportError>;
}
