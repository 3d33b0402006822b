//! Monotonic nanosecond timestamp source.
//!
//! The metric stream state machine only ever needs relative ordering and
//! elapsed-time arithmetic between two timestamps produced by the same
//! process, so we use [`std::time::Instant`] (monotonic, not subject to
//! wall-clock adjustment) rather than [`std::time::SystemTime`].

use std::sync::OnceLock;
use std::time::Instant;

/// A source of monotonically non-decreasing nanosecond timestamps.
///
/// Implementations must be cheap to call from the aggregation hot path --
/// no allocation, no syscalls beyond what `Instant::now()` already does.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current timestamp in nanoseconds since an arbitrary,
    /// fixed epoch private to this clock instance.
    fn now_nanos(&self) -> u64;
}

/// The default [`Clock`], backed by [`Instant`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

impl Clock for SystemClock {
    fn now_nanos(&self) -> u64 {
        Instant::now()
            .saturating_duration_since(epoch())
            .as_nanos() as u64
    }
}

/// A deterministic clock for tests: each call to [`now_nanos`](Clock::now_nanos)
/// advances by a fixed step from a configurable start.
#[derive(Debug)]
pub struct FakeClock {
    ticks: std::sync::atomic::AtomicU64,
    step_nanos: u64,
}

impl FakeClock {
    /// Creates a fake clock starting at `start_nanos` and advancing by
    /// `step_nanos` on each call.
    pub fn new(start_nanos: u64, step_nanos: u64) -> Self {
        FakeClock {
            ticks: std::sync::atomic::AtomicU64::new(start_nanos),
            step_nanos,
        }
    }
}

impl Clock for FakeClock {
    fn now_nanos(&self) -> u64 {
        self.ticks
            .fetch_add(self.step_nanos, std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_non_decreasing() {
        let clock = SystemClock;
        let a = clock.now_nanos();
        let b = clock.now_nanos();
        assert!(b >= a);
    }

    #[test]
    fn fake_clock_advances_by_step() {
        let clock = FakeClock::new(100, 10);
        assert_eq!(clock.now_nanos(), 100);
        assert_eq!(clock.now_nanos(), 110);
        assert_eq!(clock.now_nanos(), 120);
    }
}
