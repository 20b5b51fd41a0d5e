//! Per-attempt log artifacts and the live log window.

mod collector;

pub use collector::{LiveWindow, LogCollector, TRUNCATION_MARKER};
