//! Monotonic time source.
//!
//! `Instant` is guaranteed monotonic on every target Rust supports, which
//! is all §4.1 asks of this module; we additionally expose a nanosecond
//! integer form because the channel counters (`first_op_time_ns`,
//! `last_op_time_ns`, §6) and the timer service (§4.5) want a plain `u64`
//! they can store in an atomic.

use std::time::{Duration, Instant};

/// Process-wide reference point; `monotonic_now_ns` returns nanoseconds
/// elapsed since this instant was first touched.
static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Nanoseconds since an arbitrary, process-local, monotonic epoch.
///
/// Only meaningful for differences within the same process; never
/// serialize this as wall-clock time.
pub fn monotonic_now_ns() -> u64 {
    epoch().elapsed().as_nanos() as u64
}

/// An absolute deadline on the monotonic clock, usable with
/// [`super::sync::Condvar::wait_until`] and the timer service's min-heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(u64);

impl Deadline {
    /// A deadline `millis` milliseconds from now. `millis < 0` encodes
    /// "infinite" (block until progress, close, or cancellation, per
    /// §8's boundary behavior for negative timeouts).
    pub fn from_timeout_ms(millis: i64) -> Option<Deadline> {
        if millis < 0 {
            return None;
        }
        Some(Deadline(monotonic_now_ns().saturating_add(millis as u64 * 1_000_000)))
    }

    pub fn from_nanos(ns: u64) -> Deadline {
        Deadline(ns)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn has_passed(self) -> bool {
        monotonic_now_ns() >= self.0
    }

    /// Remaining time until the deadline, or `Duration::ZERO` if past.
    pub fn remaining(self) -> Duration {
        let now = monotonic_now_ns();
        if now >= self.0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.0 - now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn monotonic_is_nondecreasing() {
        let a = monotonic_now_ns();
        sleep(Duration::from_millis(1));
        let b = monotonic_now_ns();
        assert!(b >= a);
    }

    #[test]
    fn negative_timeout_is_infinite() {
        assert!(Deadline::from_timeout_ms(-1).is_none());
    }

    #[test]
    fn zero_timeout_has_already_passed() {
        let d = Deadline::from_timeout_ms(0).unwrap();
        std::thread::sleep(Duration::from_millis(1));
        assert!(d.has_passed());
    }
}
