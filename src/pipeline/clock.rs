//! Monotonic millisecond clocks for arrival stamping and report timers

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Source of monotonic time in milliseconds
///
/// Every stage of a pipeline reads time through the same clock so that
/// arrival stamps, reorder hold times and report delays agree.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-time clock counting milliseconds since it was created
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    base: Instant,
}

impl MonotonicClock {
    /// Create a clock starting now
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
        }
    }

    /// Create a clock with a specific base instant
    pub fn with_base(base: Instant) -> Self {
        Self { base }
    }

    pub fn base(&self) -> Instant {
        self.base
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.base.elapsed().as_millis() as u64
    }
}

/// Clock that only moves when told to
///
/// Clones share the same time, so a test can keep one handle and advance
/// the clock a pipeline is reading.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::Relaxed);
    }

    /// Move the clock forward and return the new time
    pub fn advance(&self, delta_ms: u64) -> u64 {
        self.now.fetch_add(delta_ms, Ordering::Relaxed) + delta_ms
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}
