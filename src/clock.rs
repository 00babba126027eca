//! Injected clock source.
//!
//! All `now` reads inside the scheduler go through a single clock
//! injected at `Cell` construction: a seconds-since-epoch value type,
//! swappable so tests can drive retention and expiry scenarios
//! deterministically instead of sleeping.

use std::sync::Arc;

/// A point in time, expressed as seconds since the Unix epoch.
///
/// Plain `f64` seconds (rather than `Timestamp`'s nanosecond integer)
/// matches the scheduler's own arithmetic, which adds/compares against
/// `data_retention_timeout` seconds and `valid_until` seconds throughout.
pub type Time = f64;

/// Source of the current time for one scheduling cycle.
///
/// Clock regressions (`now` decreasing across cycles) are tolerated by
/// the core; retention expiries are computed on whatever the injected
/// clock reports, monotonic or not.
pub trait Clock: Send + Sync {
    fn now(&self) -> Time;
}

/// Wall-clock source backed by `std::time::SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Time {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs_f64()
    }
}

/// A clock a test can set directly, mirroring `mock.patch('time.time')`
/// in the original test suite.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<std::sync::atomic::AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Time) -> Self {
        Self {
            now: Arc::new(std::sync::atomic::AtomicU64::new(start.to_bits())),
        }
    }

    pub fn set(&self, time: Time) {
        self.now.store(time.to_bits(), std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Time {
        Time::from_bits(self.now.load(std::sync::atomic::Ordering::SeqCst))
    }
}

/// A clock shared by a `Cell` and anything else that needs to read the
/// same notion of "now" (e.g. a test driving both the cell and its own
/// assertions off one `ManualClock`).
pub type SharedClock = Arc<dyn Clock>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_reads_back_what_was_set() {
        let clock = ManualClock::new(100.0);
        assert_eq!(clock.now(), 100.0);
        clock.set(130.0);
        assert_eq!(clock.now(), 130.0);
    }

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let t1 = clock.now();
        let t2 = clock.now();
        assert!(t2 >= t1);
    }
}
