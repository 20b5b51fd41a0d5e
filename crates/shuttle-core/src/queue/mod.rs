//! Queue module: task records, retry policy, persistence and the single
//! in-memory writer of the task list.

mod record;
mod recovery;
mod retry;
mod snapshot;
mod state;
mod store;

pub use record::TaskRecord;
pub use recovery::recover_interrupted;
pub use retry::RetryPolicy;
pub(crate) use retry::millis;
pub use snapshot::{SCHEMA_VERSION, Snapshot};
pub use state::{CancelOutcome, FailureDisposition, NextTask, QueueState, RunIntent};
pub use store::QueueStore;
