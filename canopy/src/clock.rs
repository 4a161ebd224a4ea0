//! # Hub Clock
//!
//! Every root derives its local time from a single hub-wide monotonic
//! clock, expressed in nanoseconds since the clock's origin. Call time codes,
//! purge deadlines and delegate drift checks are all measured against it.
//!
//! [`ManualClock`] replaces the system clock where time must be stepped
//! explicitly, e.g. to make timeout behavior deterministic.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use canopy_api::Time;

/// Source of hub time.
pub trait Clock: Send + Sync + fmt::Debug + 'static {
    /// Current hub time in nanoseconds.
    fn now(&self) -> Time;
}

/// Monotonic clock backed by [`Instant`].
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Time {
        nanos(self.origin.elapsed())
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Time) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, time: Time) {
        self.now.store(time, Ordering::SeqCst);
    }

    /// Moves the clock forward and returns the new time.
    pub fn advance(&self, by: Duration) -> Time {
        self.now.fetch_add(nanos(by), Ordering::SeqCst) + nanos(by)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Time {
        self.now.load(Ordering::SeqCst)
    }
}

/// Converts a duration to hub time units, saturating at `Time::MAX`.
pub fn nanos(duration: Duration) -> Time {
    Time::try_from(duration.as_nanos()).unwrap_or(Time::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.advance(Duration::from_nanos(50)), 150);
        assert_eq!(clock.now(), 150);
        clock.set(10);
        assert_eq!(clock.now(), 10);
    }
}
