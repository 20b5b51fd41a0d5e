//! Impls - ports の実装
//!
//! - **ProcessTransport**: tokio::process で agent CLI を起動する本番用 transport

pub mod process_transport;

pub use self::process_transport::ProcessTransport;
