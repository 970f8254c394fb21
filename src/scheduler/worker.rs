//! The per-worker run loop and the `SchedulerHandle` callers use to talk
//! to a running [`super::Scheduler`] (submit plain callables, spawn
//! coroutines, unpark a parked one). Grounded in the teacher's
//! `Scheduler::resume`/idle-park loop (`scheduler.rs`), rewritten around
//! `crossbeam_deque` in place of the teacher's own `deque` crate and
//! generalized into the six-step priority order §4.6 specifies.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_deque::{Steal, Worker as LocalDeque};
use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::coroutine::{Handle as CoroHandle, ResumeError, State};
use crate::metrics::SchedulerSnapshot;
use crate::platform::time::Deadline;

use super::{SchedulerShared, Task};

/// A cloneable reference to a running scheduler, bound into every
/// coroutine it spawns so `park`/`unpark` know where to re-enqueue.
#[derive(Clone)]
pub struct SchedulerHandle(Arc<SchedulerShared>);

impl SchedulerHandle {
    pub(crate) fn new(shared: Arc<SchedulerShared>) -> SchedulerHandle {
        SchedulerHandle(shared)
    }

    pub(crate) fn enqueue_ready(&self, co: CoroHandle) {
        super::enqueue_ready(&self.0, co);
    }

    /// Spawn a coroutine onto this scheduler.
    pub fn spawn<F>(&self, f: F) -> CoroHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let stack_bytes = self.0.config.default_stack_bytes;
        super::spawn_co(&self.0, f, stack_bytes)
    }

    /// Spawn a coroutine with an explicit stack size.
    pub fn spawn_with_stack<F>(&self, f: F, stack_bytes: usize) -> CoroHandle
    where
        F: FnOnce() + Send + 'static,
    {
        super::spawn_co(&self.0, f, stack_bytes)
    }

    /// Submit a plain callable (§4.6's `spawn(fn, arg)`): round-robins a
    /// target worker, tries its fast slot first, falls back to the
    /// global inject ring.
    pub fn submit<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = &self.0;
        shared
            .metrics
            .tasks_submitted
            .fetch_add(1, Ordering::Relaxed);

        let n = shared.worker_count();
        let target = shared.next_spawn.fetch_add(1, Ordering::Relaxed) % n;

        match shared.fast_slots[target].try_place(Box::new(f)) {
            None => {
                shared.metrics.fastpath_hits.fetch_add(1, Ordering::Relaxed);
            }
            Some(task) => {
                shared
                    .metrics
                    .fastpath_misses
                    .fetch_add(1, Ordering::Relaxed);
                shared.inject.push(task);
            }
        }

        let _guard = shared.park_lock.lock();
        shared.park_cv.notify_one();
    }

    pub fn timer(&self) -> &crate::timer::TimerService {
        &self.0.timer
    }

    pub fn config(&self) -> &crate::config::SchedulerConfig {
        &self.0.config
    }
}

impl PartialEq for SchedulerHandle {
    fn eq(&self, other: &SchedulerHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for SchedulerHandle {}

/// Body of one worker OS thread: loops the six-step priority order until
/// `shared.stop` is set.
pub(super) fn run(id: usize, shared: Arc<SchedulerShared>, local: LocalDeque<Task>) {
    loop {
        if shared.stop.load(Ordering::Acquire) {
            return;
        }

        if step(id, &shared, &local) {
            continue;
        }

        park_briefly(&shared);
    }
}

/// One iteration of the priority loop. Returns `true` if it did
/// anything (so the caller should immediately re-poll instead of
/// parking).
fn step(id: usize, shared: &Arc<SchedulerShared>, local: &LocalDeque<Task>) -> bool {
    // 1. Global ready FIFO.
    if let Some(co) = pop_ready(shared) {
        co.clear_ready_enqueued();
        run_coroutine(shared, co);
        return true;
    }

    // 2. This worker's own local deque (LIFO pop from the tail).
    if let Some(task) = local.pop() {
        run_task(shared, task);
        return true;
    }

    // 3. This worker's fast slot.
    if let Some(task) = shared.fast_slots[id].take() {
        run_task(shared, task);
        return true;
    }

    // 4. Steal from up to `steal_scan_max` peers in randomized order.
    if let Some(task) = steal_from_peers(id, shared, local) {
        run_task(shared, task);
        return true;
    }

    // 5. The global inject ring.
    loop {
        match shared.inject.steal() {
            Steal::Success(task) => {
                shared.metrics.inject_pulls.fetch_add(1, Ordering::Relaxed);
                run_task(shared, task);
                return true;
            }
            Steal::Retry => continue,
            Steal::Empty => break,
        }
    }

    false
}

fn pop_ready(shared: &Arc<SchedulerShared>) -> Option<CoroHandle> {
    shared.ready.lock().unwrap().pop_front()
}

fn run_coroutine(shared: &Arc<SchedulerShared>, co: CoroHandle) {
    match co.resume() {
        Ok(()) => {}
        Err(ResumeError::Panicked(payload)) => {
            // The coroutine already recorded it; resume() also returns it
            // so a caller driving `join` can observe it. The worker loop
            // itself just logs and moves on.
            drop(payload);
        }
        Err(ResumeError::AlreadyFinished) => {
            // The worker only ever resumes a coroutine it just popped off
            // its own ready FIFO, which is never FINISHED by construction.
            log::error!("worker resumed an already-finished coroutine");
        }
    }
    match co.state() {
        State::Finished => {
            shared
                .metrics
                .tasks_completed
                .fetch_add(1, Ordering::Relaxed);
            shared.retire.lock().unwrap().push(co);
        }
        State::Parked => {
            // Nothing to do: whoever eventually calls `unpark` re-enqueues it.
        }
        State::Suspended => {
            // Cooperative yield: go back on the tail of the ready FIFO.
            super::enqueue_ready(shared, co);
        }
        other => {
            log::warn!("coroutine left worker loop in unexpected state {:?}", other);
        }
    }
}

fn run_task(shared: &Arc<SchedulerShared>, task: Task) {
    task();
    shared
        .metrics
        .tasks_completed
        .fetch_add(1, Ordering::Relaxed);
}

fn steal_from_peers(
    id: usize,
    shared: &Arc<SchedulerShared>,
    local: &LocalDeque<Task>,
) -> Option<Task> {
    let n = shared.stealers.len();
    if n <= 1 {
        return None;
    }

    let mut order: Vec<usize> = (0..n).filter(|&i| i != id).collect();
    order.shuffle(&mut thread_rng());
    order.truncate(shared.config.steal_scan_max.min(order.len()));

    for victim in order {
        shared.metrics.steals_probes.fetch_add(1, Ordering::Relaxed);
        loop {
            match shared.stealers[victim].steal_batch_and_pop(local) {
                Steal::Success(task) => {
                    shared
                        .metrics
                        .steals_succeeded
                        .fetch_add(1, Ordering::Relaxed);
                    return Some(task);
                }
                Steal::Retry => continue,
                Steal::Empty => {
                    shared
                        .metrics
                        .steals_failures
                        .fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
        }
    }
    None
}

/// Park briefly on the shared condvar (step 6): a short timeout so work
/// enqueued just after this worker last checked is picked up promptly
/// rather than waiting for an explicit notify that may never come (e.g.
/// a coroutine unparked from a timer callback on another thread, which
/// does notify — but belt and braces against any missed-wakeup corner).
fn park_briefly(shared: &Arc<SchedulerShared>) {
    shared.parked_count.fetch_add(1, Ordering::AcqRel);
    {
        let guard = shared.park_lock.lock();
        let deadline = Deadline::from_timeout_ms(5).unwrap();
        let _ = shared.park_cv.wait_until(guard, deadline);
    }
    shared.parked_count.fetch_sub(1, Ordering::AcqRel);
}

pub(super) fn snapshot(shared: &Arc<SchedulerShared>) -> SchedulerSnapshot {
    use std::sync::atomic::Ordering::Relaxed;
    let m = &shared.metrics;
    SchedulerSnapshot {
        worker_count: shared.worker_count(),
        parked_count: shared.parked_count.load(Ordering::Acquire),
        tasks_submitted: m.tasks_submitted.load(Relaxed),
        tasks_completed: m.tasks_completed.load(Relaxed),
        steals_probes: m.steals_probes.load(Relaxed),
        steals_succeeded: m.steals_succeeded.load(Relaxed),
        steals_failures: m.steals_failures.load(Relaxed),
        fastpath_hits: m.fastpath_hits.load(Relaxed),
        fastpath_misses: m.fastpath_misses.load(Relaxed),
        inject_pulls: m.inject_pulls.load(Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::super::Scheduler;
    use crate::config::SchedulerConfig;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn spawned_coroutine_runs_to_completion() {
        let scheduler = Scheduler::new(SchedulerConfig::default().worker_threads(2));
        let handle = scheduler.handle();
        let (tx, rx) = channel();
        handle.spawn(move || {
            tx.send(42).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
        scheduler.drain(1000).unwrap();
        scheduler.shutdown();
    }

    #[test]
    fn submitted_task_runs_without_a_coroutine() {
        let scheduler = Scheduler::new(SchedulerConfig::default().worker_threads(2));
        let handle = scheduler.handle();
        let (tx, rx) = channel();
        handle.submit(move || {
            tx.send("ran").unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "ran");
        scheduler.shutdown();
    }

    #[test]
    fn many_coroutines_complete_and_snapshot_reflects_it() {
        let scheduler = Scheduler::new(SchedulerConfig::default().worker_threads(4));
        let handle = scheduler.handle();
        let (tx, rx) = channel();
        for i in 0..50 {
            let tx = tx.clone();
            handle.spawn(move || {
                tx.send(i).unwrap();
            });
        }
        let mut seen = Vec::new();
        for _ in 0..50 {
            seen.push(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());

        scheduler.drain(1000).unwrap();
        let snap = scheduler.snapshot();
        assert_eq!(snap.tasks_completed, 50);
        scheduler.shutdown();
    }

    #[test]
    fn nested_spawn_from_inside_a_coroutine_runs_on_the_same_scheduler() {
        let scheduler = Scheduler::new(SchedulerConfig::default().worker_threads(2));
        let handle = scheduler.handle();
        let (tx, rx) = channel();
        let inner_handle = handle.clone();
        handle.spawn(move || {
            let tx2 = tx.clone();
            inner_handle.spawn(move || {
                tx2.send("inner").unwrap();
            });
            tx.send("outer").unwrap();
        });
        let mut results = vec![
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        ];
        results.sort_unstable();
        assert_eq!(results, vec!["inner", "outer"]);
        scheduler.shutdown();
    }
}
