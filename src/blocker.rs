//! Execution-context abstraction the channel engine (C7), select
//! multiplexer (C9) and cancellation token (C4) block on.
//!
//! The hard core's suspension points are coroutine `park`/`unpark`, but
//! every test and demo also needs to call blocking channel ops directly
//! from a plain OS thread (the test harness thread itself is not a
//! coroutine). Rather than forcing every caller through a scheduler, a
//! [`Blocker`] captures "whatever the calling context currently is" and
//! gives channel/select code one `park`/`wake` pair that works either
//! way: a coroutine parks/unparks through `crate::coroutine`, a plain
//! thread blocks on a private condvar grounded in the platform port's
//! `platform::sync::{Mutex, Condvar}` (§4.1).

use std::sync::Arc;

use crate::coroutine::{self, Handle as CoroHandle};
use crate::platform::sync::{Condvar, Mutex as PMutex};

#[derive(Clone)]
pub enum Blocker {
    Coroutine(CoroHandle),
    Thread(Arc<ThreadParker>),
}

impl Blocker {
    /// Capture the calling context: the running coroutine if there is
    /// one, otherwise a fresh thread parker bound to this OS thread's
    /// blocking call.
    pub fn current() -> Blocker {
        match coroutine::current() {
            Some(handle) => Blocker::Coroutine(handle),
            None => Blocker::Thread(Arc::new(ThreadParker::new())),
        }
    }

    /// Block until `wake` is called (at least once) from any thread.
    /// Spurious wakeups are possible; callers re-check their predicate.
    pub fn park(&self) {
        match self {
            Blocker::Coroutine(_) => coroutine::park(),
            Blocker::Thread(parker) => parker.park(),
        }
    }

    /// Wake a parked blocker. Idempotent: calling this on a blocker that
    /// isn't currently parked (already woken, or never parked yet) is
    /// harmless — the next `park` call simply returns immediately.
    pub fn wake(&self) {
        match self {
            Blocker::Coroutine(handle) => coroutine::unpark_if_parked(handle),
            Blocker::Thread(parker) => parker.wake(),
        }
    }
}

impl PartialEq for Blocker {
    fn eq(&self, other: &Blocker) -> bool {
        match (self, other) {
            (Blocker::Coroutine(a), Blocker::Coroutine(b)) => a == b,
            (Blocker::Thread(a), Blocker::Thread(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A single-slot wake flag for a blocked OS thread, the thread-mode
/// counterpart to a coroutine's park/unpark.
pub struct ThreadParker {
    woken: PMutex<bool>,
    condvar: Condvar,
}

impl ThreadParker {
    fn new() -> ThreadParker {
        ThreadParker {
            woken: PMutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn park(&self) {
        let mut guard = self.woken.lock();
        while !*guard {
            guard = self.condvar.wait(guard);
        }
        *guard = false;
    }

    fn wake(&self) {
        let mut guard = self.woken.lock();
        *guard = true;
        self.condvar.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn thread_blocker_parks_until_woken() {
        let blocker = Blocker::current();
        assert!(matches!(blocker, Blocker::Thread(_)));

        let b2 = blocker.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            b2.wake();
        });

        blocker.park();
        handle.join().unwrap();
    }

    #[test]
    fn coroutine_blocker_is_selected_inside_a_coroutine() {
        let co = coroutine::create(
            || {
                let blocker = Blocker::current();
                assert!(matches!(blocker, Blocker::Coroutine(_)));
            },
            64 * 1024,
        );
        co.resume().unwrap();
    }
}
