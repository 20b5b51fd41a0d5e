//! Domain model (IDs, statuses, specs, outcomes, events).
//!
//! 副作用なし: queue / runner / orchestrator はすべてここの型で会話する。

pub mod errors;
pub mod events;
pub mod ids;
pub mod outcome;
pub mod spec;
pub mod state;
pub mod task;

pub use errors::{FailureKind, PreflightError, ShuttleError};
pub use events::{LogStream, QueueEvent, RunEvent};
pub use ids::{AttemptId, TaskId};
pub use outcome::{ExitReason, RunFailure, RunOutcome};
pub use spec::{TaskEdit, TaskSpec};
pub use state::{ApprovalState, TaskStatus};
pub use task::{AgentBackend, Priority};
