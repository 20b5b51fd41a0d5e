//! Two-phase stop token: graceful request first, forced termination later.

use tokio_util::sync::CancellationToken;

/// Shared between the orchestrator (who decides when to stop) and the
/// runner's pump task (who talks to the process).
///
/// Forcing implies a graceful request too, so a pump that only watches the
/// graceful token still wakes up.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    graceful: CancellationToken,
    forced: CancellationToken,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase 1: ask the agent to wind down (interrupt).
    pub fn request_graceful(&self) {
        self.graceful.cancel();
    }

    /// Phase 2: kill the process.
    pub fn force(&self) {
        self.graceful.cancel();
        self.forced.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.graceful.is_cancelled()
    }

    pub fn is_forced(&self) -> bool {
        self.forced.is_cancelled()
    }

    pub async fn graceful_requested(&self) {
        self.graceful.cancelled().await;
    }

    pub async fn forced(&self) {
        self.forced.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn force_implies_graceful() {
        let token = StopToken::new();
        let pump = token.clone();
        assert!(!pump.is_stop_requested());

        token.force();
        pump.graceful_requested().await;
        pump.forced().await;
        assert!(pump.is_stop_requested());
        assert!(pump.is_forced());
    }

    #[test]
    fn graceful_does_not_force() {
        let token = StopToken::new();
        token.request_graceful();
        assert!(token.is_stop_requested());
        assert!(!token.is_forced());
    }
}
