//! C5 — the timer service.
//!
//! A min-heap of deadlines serviced by one dedicated thread, grounded in
//! the teacher's worker-park condvar pattern (`scheduler.rs`'s idle-park
//! loop) generalized into a standalone heap+thread: the thread sleeps
//! until the earliest deadline or until woken by a new, earlier entry,
//! pops everything due, and invokes each entry's callback (typically
//! `Scheduler::enqueue_ready`).

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

use crate::blocker::Blocker;
use crate::platform::sync::{Condvar, Mutex as PMutex};
use crate::platform::time::{monotonic_now_ns, Deadline};

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    deadline_ns: u64,
    id: u64,
    cancelled: Arc<AtomicBool>,
    callback: Mutex<Option<TimerCallback>>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Entry) -> bool {
        self.deadline_ns == other.deadline_ns && self.id == other.id
    }
}
impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Entry) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Entry) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline sorts highest.
        other
            .deadline_ns
            .cmp(&self.deadline_ns)
            .then_with(|| other.id.cmp(&self.id))
    }
}

struct Shared {
    heap: Mutex<BinaryHeap<Entry>>,
    next_id: AtomicU64,
    wake: Condvar,
    wake_lock: PMutex<()>,
    stop: AtomicBool,
}

/// A handle used to cancel a previously scheduled timer entry.
#[derive(Clone)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Best-effort cancellation: a concurrently-firing entry may already
    /// be past the cancelled check by the time this returns.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Owns the dedicated timer thread; dropping it (via `shutdown`) joins it.
pub struct TimerService {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl TimerService {
    pub fn start() -> TimerService {
        let shared = Arc::new(Shared {
            heap: Mutex::new(BinaryHeap::new()),
            next_id: AtomicU64::new(0),
            wake: Condvar::new(),
            wake_lock: PMutex::new(()),
            stop: AtomicBool::new(false),
        });

        let worker_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("coro-rt-timer".into())
            .spawn(move || run(worker_shared))
            .expect("failed to spawn timer thread");

        TimerService {
            shared,
            thread: Some(thread),
        }
    }

    /// Schedule `callback` to run no earlier than `deadline`.
    pub fn schedule_at(&self, deadline: Deadline, callback: TimerCallback) -> TimerHandle {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let entry = Entry {
            deadline_ns: deadline.as_nanos(),
            id,
            cancelled: cancelled.clone(),
            callback: Mutex::new(Some(callback)),
        };

        {
            let mut heap = self.shared.heap.lock().unwrap();
            heap.push(entry);
        }
        // Wake the timer thread unconditionally; it cheaply re-checks the
        // new earliest deadline itself rather than us computing whether
        // this entry actually moved the minimum.
        let _guard = self.shared.wake_lock.lock();
        self.shared.wake.notify_one();

        TimerHandle { cancelled }
    }

    pub fn shutdown(mut self) {
        self.shared.stop.store(true, Ordering::Release);
        {
            let _guard = self.shared.wake_lock.lock();
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn run(shared: Arc<Shared>) {
    loop {
        if shared.stop.load(Ordering::Acquire) {
            return;
        }

        let next_deadline = {
            let heap = shared.heap.lock().unwrap();
            heap.peek().map(|e| e.deadline_ns)
        };

        match next_deadline {
            None => {
                let guard = shared.wake_lock.lock();
                let deadline = Deadline::from_timeout_ms(1000).unwrap();
                let _ = shared.wake.wait_until(guard, deadline);
            }
            Some(deadline_ns) => {
                let now = monotonic_now_ns();
                if deadline_ns > now {
                    let guard = shared.wake_lock.lock();
                    let deadline = Deadline::from_nanos(deadline_ns);
                    let _ = shared.wake.wait_until(guard, deadline);
                } else {
                    fire_due(&shared, now);
                }
            }
        }
    }
}

fn fire_due(shared: &Shared, now: u64) {
    loop {
        let due = {
            let mut heap = shared.heap.lock().unwrap();
            match heap.peek() {
                Some(e) if e.deadline_ns <= now => heap.pop(),
                _ => None,
            }
        };
        let entry = match due {
            Some(e) => e,
            None => return,
        };
        if entry.cancelled.load(Ordering::Acquire) {
            continue;
        }
        if let Some(callback) = entry.callback.lock().unwrap().take() {
            callback();
        }
    }
}

/// The process-wide timer service backing bounded/cancellable channel
/// and select waits (§4.4, §4.7) — independent of any particular
/// [`crate::scheduler::Scheduler`], since a channel may be used from a
/// plain OS thread with no scheduler running at all. Per the design
/// notes' bound on global mutable state, this is the one extra instance
/// beyond the process-default scheduler and the zero-copy backend
/// registry; it is never shut down, so its thread runs for the life of
/// the process (the same tradeoff `env_logger`'s global logger makes).
static DEFAULT_TIMER: OnceLock<TimerService> = OnceLock::new();

pub fn default_timer() -> &'static TimerService {
    DEFAULT_TIMER.get_or_init(TimerService::start)
}

/// Park the calling coroutine (or block the calling OS thread) for
/// `duration`, using the default timer service to schedule the wake.
pub fn sleep(duration: std::time::Duration) {
    let blocker = Blocker::current();
    let deadline = Deadline::from_nanos(monotonic_now_ns() + duration.as_nanos() as u64);
    let woken_blocker = blocker.clone();
    default_timer().schedule_at(deadline, Box::new(move || woken_blocker.wake()));
    blocker.park();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn fires_after_its_deadline() {
        let service = TimerService::start();
        let (tx, rx) = channel();
        let deadline = Deadline::from_timeout_ms(10).unwrap();
        service.schedule_at(deadline, Box::new(move || tx.send(()).unwrap()));
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        service.shutdown();
    }

    #[test]
    fn cancelled_entry_does_not_fire() {
        let service = TimerService::start();
        let (tx, rx) = channel::<()>();
        let deadline = Deadline::from_timeout_ms(20).unwrap();
        let handle = service.schedule_at(deadline, Box::new(move || tx.send(()).unwrap()));
        handle.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        service.shutdown();
    }

    #[test]
    fn fires_in_deadline_order() {
        let service = TimerService::start();
        let (tx, rx) = channel();
        let tx2 = tx.clone();
        service.schedule_at(
            Deadline::from_timeout_ms(30).unwrap(),
            Box::new(move || tx2.send(2).unwrap()),
        );
        service.schedule_at(
            Deadline::from_timeout_ms(5).unwrap(),
            Box::new(move || tx.send(1).unwrap()),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 2);
        service.shutdown();
    }

    #[test]
    fn sleep_blocks_the_calling_thread_for_roughly_the_requested_duration() {
        let start = std::time::Instant::now();
        sleep(Duration::from_millis(15));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
