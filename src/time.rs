//! Monotonic time source for publication timestamps and rate limiting
//!
//! All broker timestamps are monotonic microseconds. The `Clock` trait lets
//! a host substitute its own time base; `ManualClock` gives tests full
//! control over interval arithmetic without sleeping.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Source of monotonic microsecond timestamps
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current monotonic time in microseconds
    fn now_us(&self) -> u64;
}

/// Default clock anchored at an `Instant` taken on creation
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose zero point is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Manually driven clock for deterministic tests
///
/// Starts at zero; `set` and `advance` move it forward. Moving backwards is
/// the caller's mistake and is not guarded against.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    /// Create a manual clock at t=0
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the absolute time in microseconds
    pub fn set(&self, us: u64) {
        self.now_us.store(us, Ordering::Release);
    }

    /// Advance the clock by the given number of microseconds
    pub fn advance(&self, us: u64) {
        self.now_us.fetch_add(us, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::Acquire)
    }
}
