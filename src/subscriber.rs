//! Per-subscriber cursor and rate-limit state
//!
//! Each subscriber tracks the last generation it observed, the minimum
//! delivery interval it asked for, and the time of its last copy. The node
//! consults this state to answer "has this subscriber got something new"
//! both for explicit checks and when deciding which waiters to wake on a
//! publish.

/// Opaque identity of a subscriber within one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub(crate) u32);

/// Cursor, throttle, and overflow accounting for one subscriber
#[derive(Debug, Clone)]
pub(crate) struct SubscriberState {
    /// Last generation delivered to this subscriber
    pub last_generation: u32,
    /// False until the first copy completes
    pub seen: bool,
    /// Minimum inter-delivery period; 0 disables throttling
    pub interval_us: u32,
    /// Monotonic time of the last successful copy
    pub last_copy_time_us: u64,
    /// Samples skipped because the cursor fell behind the ring
    pub overflows: u64,
}

impl SubscriberState {
    pub fn new() -> Self {
        Self {
            last_generation: 0,
            seen: false,
            interval_us: 0,
            last_copy_time_us: 0,
            overflows: 0,
        }
    }

    /// Generations published since this subscriber last copied
    ///
    /// Wrap-safe: the counters are compared by wrapping difference, never
    /// by magnitude.
    pub fn behind(&self, generation: u32) -> u32 {
        let cursor = if self.seen { self.last_generation } else { 0 };
        generation.wrapping_sub(cursor)
    }

    /// The update predicate: unseen data exists and the throttle window
    /// has elapsed
    pub fn updated(&self, generation: u32, now_us: u64) -> bool {
        if generation == 0 || self.behind(generation) == 0 {
            return false;
        }

        if self.interval_us > 0 {
            let elapsed = now_us.saturating_sub(self.last_copy_time_us);
            if elapsed < u64::from(self.interval_us) {
                return false;
            }
        }

        true
    }
}
