//! Clock abstraction for time operations.
//!
//! Controllers never read wall time directly; they ask an injected [`Clock`].
//! [`SystemClock`] reads tokio's clock so that a paused test runtime
//! (`#[tokio::test(start_paused = true)]`) also freezes controller timestamps.
//! See [`crate::mocks::MockClock`] for a manually advanced clock.

use std::fmt::Debug;
use std::time::Instant;

/// Source of monotonic time.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

/// Production clock backed by `tokio::time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_follows_paused_runtime() {
        let clock = SystemClock::new();
        let t1 = clock.now();
        tokio::time::advance(Duration::from_secs(10)).await;
        let t2 = clock.now();

        assert!(t2.duration_since(t1) >= Duration::from_secs(10));
    }
}
