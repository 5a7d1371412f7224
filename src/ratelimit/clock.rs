//! Time sources for the window store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A source of "now" in milliseconds.
///
/// Readings must never go backwards. The value is anchored to the Unix
/// epoch so it can be handed to clients as a reset timestamp.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Wall-anchored monotonic clock.
///
/// The epoch offset is sampled once at construction; later readings advance
/// with [`Instant`], so wall-clock adjustments cannot move the window.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
    origin_epoch_ms: u64,
}

impl SystemClock {
    pub fn new() -> Self {
        let epoch_ms = chrono::Utc::now().timestamp_millis();
        Self {
            origin: Instant::now(),
            origin_epoch_ms: u64::try_from(epoch_ms).unwrap_or(0),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.origin_epoch_ms.saturating_add(elapsed)
    }
}

/// A clock that only moves when told to.
///
/// Used by tests and simulations to replay exact request timelines.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Jump to an absolute reading. Earlier readings are ignored.
    pub fn set(&self, ms: u64) {
        self.now.fetch_max(ms, Ordering::SeqCst);
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
