//! Mutex/condvar primitives clocked on the monotonic source (§4.1).
//!
//! Thin wrappers over `std::sync::{Mutex, Condvar}`: `std`'s condvar
//! already waits relative durations against a monotonic clock on every
//! platform, so the only value this layer adds is `wait_until`, which
//! turns one of our [`Deadline`]s into the repeated relative waits a
//! spurious-wakeup loop needs (see §7's "spurious wake" handling).

use std::sync::{self, PoisonError};
use std::time::Duration;

use super::time::Deadline;

pub use std::sync::MutexGuard;

#[derive(Debug)]
pub struct Mutex<T>(sync::Mutex<T>);

impl<T> Mutex<T> {
    pub fn new(value: T) -> Mutex<T> {
        Mutex(sync::Mutex::new(value))
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeoutResult {
    Notified,
    TimedOut,
}

#[derive(Debug, Default)]
pub struct Condvar(sync::Condvar);

impl Condvar {
    pub fn new() -> Condvar {
        Condvar(sync::Condvar::new())
    }

    pub fn notify_one(&self) {
        self.0.notify_one();
    }

    pub fn notify_all(&self) {
        self.0.notify_all();
    }

    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.0.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for a notification or for `deadline` to pass, whichever
    /// comes first. Loops internally on spurious relative-wait wakeups
    /// so callers only ever see `Notified` (possibly spurious, the
    /// caller must still re-check its predicate) or a true `TimedOut`.
    pub fn wait_until<'a, T>(
        &self,
        mut guard: MutexGuard<'a, T>,
        deadline: Deadline,
    ) -> (MutexGuard<'a, T>, WaitTimeoutResult) {
        loop {
            let remaining = deadline.remaining();
            if remaining == Duration::ZERO {
                return (guard, WaitTimeoutResult::TimedOut);
            }
            let (next_guard, result) = self
                .0
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            guard = next_guard;
            if !result.timed_out() {
                return (guard, WaitTimeoutResult::Notified);
            }
            if deadline.has_passed() {
                return (guard, WaitTimeoutResult::TimedOut);
            }
            // Spurious relative-wait expiry with time still left; loop.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn notify_wakes_waiter_before_deadline() {
        let mutex = Arc::new(Mutex::new(false));
        let cv = Arc::new(Condvar::new());

        let (m2, cv2) = (mutex.clone(), cv.clone());
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            *m2.lock() = true;
            cv2.notify_one();
        });

        let guard = mutex.lock();
        let deadline = Deadline::from_timeout_ms(1000).unwrap();
        let (guard, result) = cv.wait_until(guard, deadline);
        assert_eq!(result, WaitTimeoutResult::Notified);
        assert!(*guard);
        handle.join().unwrap();
    }

    #[test]
    fn deadline_elapses_without_notify() {
        let mutex = Mutex::new(());
        let cv = Condvar::new();
        let guard = mutex.lock();
        let deadline = Deadline::from_timeout_ms(5).unwrap();
        let (_guard, result) = cv.wait_until(guard, deadline);
        assert_eq!(result, WaitTimeoutResult::TimedOut);
    }
}
