//! C6 — the work-stealing scheduler core.
//!
//! N worker OS threads, each with a fast slot for one pending callable, a
//! local LIFO deque of callables (stealable by peers from the head), a
//! process-wide growable inject ring, and a shared, mutex-guarded
//! intrusive coroutine ready FIFO. Grounded in the teacher's
//! `Processor`/`Scheduler` pair (`scheduler.rs`, and the richer
//! `runtime/processor.rs` found in the `redbaron-coio-rs`/`kingxsp-coio-rs`
//! forks), generalized from the teacher's single-purpose "run coroutines"
//! loop into the two-tier callable/coroutine model this spec calls for.

mod worker;

pub use worker::SchedulerHandle;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_deque::{Injector, Stealer, Worker as LocalDeque};

use crate::config::SchedulerConfig;
use crate::coroutine::{self, Handle as CoroHandle};
use crate::error::{Error, Result};
use crate::metrics::SchedulerSnapshot;
use crate::platform::sync::{Condvar, Mutex as PMutex};
use crate::platform::time::Deadline;
use crate::timer::TimerService;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct FastSlot(Mutex<Option<Task>>);

impl FastSlot {
    fn new() -> FastSlot {
        FastSlot(Mutex::new(None))
    }

    /// One-shot placement: succeeds only if the slot was empty.
    fn try_place(&self, task: Task) -> Option<Task> {
        let mut slot = self.0.lock().unwrap();
        if slot.is_some() {
            return Some(task);
        }
        *slot = Some(task);
        None
    }

    fn take(&self) -> Option<Task> {
        self.0.lock().unwrap().take()
    }
}

pub(crate) struct SchedulerMetrics {
    pub tasks_submitted: std::sync::atomic::AtomicU64,
    pub tasks_completed: std::sync::atomic::AtomicU64,
    pub steals_probes: std::sync::atomic::AtomicU64,
    pub steals_succeeded: std::sync::atomic::AtomicU64,
    pub steals_failures: std::sync::atomic::AtomicU64,
    pub fastpath_hits: std::sync::atomic::AtomicU64,
    pub fastpath_misses: std::sync::atomic::AtomicU64,
    pub inject_pulls: std::sync::atomic::AtomicU64,
}

impl SchedulerMetrics {
    fn new() -> SchedulerMetrics {
        use std::sync::atomic::AtomicU64;
        SchedulerMetrics {
            tasks_submitted: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            steals_probes: AtomicU64::new(0),
            steals_succeeded: AtomicU64::new(0),
            steals_failures: AtomicU64::new(0),
            fastpath_hits: AtomicU64::new(0),
            fastpath_misses: AtomicU64::new(0),
            inject_pulls: AtomicU64::new(0),
        }
    }
}

pub(crate) struct SchedulerShared {
    pub config: SchedulerConfig,
    pub fast_slots: Vec<FastSlot>,
    pub stealers: Vec<Stealer<Task>>,
    pub inject: Injector<Task>,
    pub ready: Mutex<std::collections::VecDeque<CoroHandle>>,
    pub park_lock: PMutex<()>,
    pub park_cv: Condvar,
    pub parked_count: AtomicUsize,
    pub stop: std::sync::atomic::AtomicBool,
    pub next_spawn: AtomicUsize,
    pub metrics: SchedulerMetrics,
    pub timer: TimerService,
    /// Finished coroutines pending release (§3's "Scheduler" data model):
    /// the worker loop drops a handle here instead of letting it go out of
    /// scope on the spot, so a caller inspecting a snapshot mid-shutdown
    /// can see what's still waiting to be freed.
    pub retire: Mutex<Vec<CoroHandle>>,
}

impl SchedulerShared {
    fn worker_count(&self) -> usize {
        self.fast_slots.len()
    }

    fn all_queues_empty(&self) -> bool {
        self.ready.lock().unwrap().is_empty()
            && self.inject.is_empty()
            && self.fast_slots.iter().all(|slot| slot.0.lock().unwrap().is_none())
    }
}

/// Owns the worker threads; dropping a `Scheduler` without calling
/// `shutdown` leaks the threads (mirrors the teacher: shutdown is always
/// explicit).
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
    threads: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Scheduler {
        let n = config.worker_threads.max(1);
        let mut locals = Vec::with_capacity(n);
        let mut stealers = Vec::with_capacity(n);
        let mut fast_slots = Vec::with_capacity(n);
        for _ in 0..n {
            let local = LocalDeque::new_lifo();
            stealers.push(local.stealer());
            locals.push(local);
            fast_slots.push(FastSlot::new());
        }

        let shared = Arc::new(SchedulerShared {
            config,
            fast_slots,
            stealers,
            inject: Injector::new(),
            ready: Mutex::new(std::collections::VecDeque::new()),
            park_lock: PMutex::new(()),
            park_cv: Condvar::new(),
            parked_count: AtomicUsize::new(0),
            stop: std::sync::atomic::AtomicBool::new(false),
            next_spawn: AtomicUsize::new(0),
            metrics: SchedulerMetrics::new(),
            timer: TimerService::start(),
            retire: Mutex::new(Vec::new()),
        });

        let mut threads = Vec::with_capacity(n);
        for (id, local) in locals.into_iter().enumerate() {
            let shared = shared.clone();
            let handle = std::thread::Builder::new()
                .name(format!("coro-rt-worker-{id}"))
                .spawn(move || worker::run(id, shared, local))
                .expect("failed to spawn scheduler worker thread");
            threads.push(handle);
        }

        Scheduler { shared, threads }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle::new(self.shared.clone())
    }

    /// Wait until every queue is empty (best-effort, racy against new
    /// submissions), or `timeout_ms` elapses.
    pub fn drain(&self, timeout_ms: i64) -> Result<()> {
        let deadline = Deadline::from_timeout_ms(timeout_ms);
        loop {
            if self.shared.all_queues_empty() {
                return Ok(());
            }
            if let Some(d) = deadline {
                if d.has_passed() {
                    return Err(Error::TimedOut);
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn shutdown(self) {
        self.shared.stop.store(true, Ordering::Release);
        {
            let _guard = self.shared.park_lock.lock();
            self.shared.park_cv.notify_all();
        }
        for thread in self.threads {
            let _ = thread.join();
        }
        // SAFETY: worker threads have joined, so the timer service is the
        // last remaining user of `shared`.
        if let Ok(shared) = Arc::try_unwrap(self.shared) {
            shared.timer.shutdown();
        }
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        worker::snapshot(&self.shared)
    }
}

static DEFAULT: OnceLock<Scheduler> = OnceLock::new();

/// The process-default scheduler (§6's crate-level surface), built from
/// `SchedulerConfig::default()` (which itself reads the `CORO_RT_*`
/// environment variables) the first time anything asks for it and
/// shared by every subsequent caller for the life of the process. Never
/// shut down: like the teacher's own lazily-initialized thread pools,
/// its worker threads simply end when the process does.
pub fn default() -> SchedulerHandle {
    DEFAULT
        .get_or_init(|| Scheduler::new(SchedulerConfig::default()))
        .handle()
}

pub(crate) fn enqueue_ready(shared: &Arc<SchedulerShared>, co: CoroHandle) {
    if !co.claim_ready_enqueue() {
        return;
    }
    shared.ready.lock().unwrap().push_back(co);
    let _guard = shared.park_lock.lock();
    shared.park_cv.notify_one();
}

/// Spawn a coroutine onto `shared`'s ready FIFO, binding it to this
/// scheduler so `park`/`unpark` know where to re-enqueue it.
pub(crate) fn spawn_co<F>(shared: &Arc<SchedulerShared>, f: F, stack_bytes: usize) -> CoroHandle
where
    F: FnOnce() + Send + 'static,
{
    let handle = SchedulerHandle::new(shared.clone());
    let co = coroutine::create(f, stack_bytes);
    co.bind_scheduler(handle);
    co.mark_ready();
    enqueue_ready(shared, co.clone());
    co
}
