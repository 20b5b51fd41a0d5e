//! Ports - 抽象化レイヤー
//!
//! Engine の外側（時刻、ID、agent process）へのインターフェース。
//! テストではそれぞれ差し替える。

pub mod clock;
pub mod id_generator;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::transport::{
    AgentTransport, LaunchSpec, TransportControl, TransportError, TransportEvent, TransportSession,
};
