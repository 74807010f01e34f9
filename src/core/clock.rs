//! Device Wall Clock
//!
//! Monotonic scheduling (watchdog, recovery windows) runs on
//! `tokio::time::Instant`. Fix timestamps, cache ages and the clock-drift
//! guard compare against the device's wall clock, read through
//! [`DeviceClock`] so tests can pin it.

use tokio::time::Instant;

/// Source of device wall-clock time.
pub trait DeviceClock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// Real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl DeviceClock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Wall clock derived from the tokio clock.
///
/// `now_ms() = epoch_ms + elapsed(origin)`. Under a paused test runtime the
/// wall clock therefore advances in lockstep with virtual time.
#[derive(Debug, Clone, Copy)]
pub struct AnchoredClock {
    epoch_ms: i64,
    origin: Instant,
}

impl AnchoredClock {
    /// Anchor `epoch_ms` at the current tokio instant.
    pub fn new(epoch_ms: i64) -> Self {
        Self {
            epoch_ms,
            origin: Instant::now(),
        }
    }

    /// Anchor the current system time.
    pub fn from_system() -> Self {
        Self::new(chrono::Utc::now().timestamp_millis())
    }
}

impl DeviceClock for AnchoredClock {
    fn now_ms(&self) -> i64 {
        let elapsed = self.origin.elapsed().as_millis();
        self.epoch_ms.saturating_add(i64::try_from(elapsed).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_anchored_clock_follows_virtual_time() {
        let clock = AnchoredClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);

        tokio::time::advance(Duration::from_millis(2_500)).await;
        assert_eq!(clock.now_ms(), 3_500);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
