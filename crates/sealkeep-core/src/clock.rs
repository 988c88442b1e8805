//! Clock abstraction.
//!
//! Retention checks and replay-window checks both depend on "now". The
//! service reads time only through [`Clock`] so tests can move time forward
//! past a retention period without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of wall-clock time in whole seconds since the UNIX epoch.
///
/// Signed to match the wire `timestamp` field, which is a signed epoch
/// value set by the client.
pub trait Clock: Send + Sync {
    /// Returns the current Unix timestamp in seconds.
    fn now_secs(&self) -> i64;
}

/// System clock that uses the real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[allow(clippy::cast_possible_wrap)]
    fn now_secs(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs() as i64
    }
}

/// Settable clock for tests.
///
/// Interior mutability lets a test keep an `Arc<ManualClock>` and advance it
/// while the server holds another handle.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `timestamp`.
    #[must_use]
    pub const fn new(timestamp: i64) -> Self {
        Self {
            now: AtomicI64::new(timestamp),
        }
    }

    /// Sets the current time.
    pub fn set(&self, timestamp: i64) {
        self.now.store(timestamp, Ordering::SeqCst);
    }

    /// Moves the clock forward by `delta`.
    #[allow(clippy::cast_possible_wrap)]
    pub fn advance(&self, delta: Duration) {
        self.now
            .fetch_add(delta.as_secs() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_secs(), 1_000);

        clock.advance(Duration::from_secs(3_600));
        assert_eq!(clock.now_secs(), 4_600);

        clock.set(10);
        assert_eq!(clock.now_secs(), 10);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now_secs() > 1_577_836_800);
    }
}
