//! C2 — the coroutine primitive.
//!
//! A private-stack coroutine with `create`/`resume`/`yield`/`park`/`unpark`
//! and a register-save context switch, grounded in the teacher's
//! `coroutine_unique.rs` + `context.rs` pair: a thread-local "current"
//! coroutine, a bootstrap "main" context per OS thread created lazily,
//! and a context switch that saves callee-preserved registers only (no
//! FP/SSE state — see `src/arch`).
//!
//! Ownership is modernized relative to the teacher: instead of raw
//! `Unique<Coroutine>` pointers managed by hand-rolled refcounting, a
//! [`Handle`] is an `Arc<CoroutineInner>` and `retain`/`release` are
//! `Clone`/`Drop` under the spec's vocabulary. The coroutine is still a
//! private-stack, guard-paged object switched to by raw assembly; only
//! the handle's ownership story is idiomatic-Rust instead of unsafe.

use std::any::Any;
use std::cell::UnsafeCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::arch::{self, Registers};
use crate::platform::stack::GuardedStack;
use crate::scheduler::SchedulerHandle;

/// State of a coroutine (§3's Data Model state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Created = 0,
    Ready = 1,
    Running = 2,
    Suspended = 3,
    Parked = 4,
    Finished = 5,
}

impl State {
    fn from_u8(v: u8) -> State {
        match v {
            0 => State::Created,
            1 => State::Ready,
            2 => State::Running,
            3 => State::Suspended,
            4 => State::Parked,
            _ => State::Finished,
        }
    }
}

/// Payload of a coroutine that finished by unwinding.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

/// Failure mode of [`Handle::resume`]/[`Handle::join`].
///
/// `Box<dyn Any + Send>` carries no `Debug` impl on its own, so this
/// wraps it with a hand-written one instead of deriving.
pub enum ResumeError {
    /// The coroutine was already FINISHED (§4.2: resuming one is a hard
    /// error, never a silent no-op).
    AlreadyFinished,
    /// The coroutine's body panicked; the payload is the one
    /// `std::panic::catch_unwind` caught.
    Panicked(PanicPayload),
}

impl fmt::Debug for ResumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumeError::AlreadyFinished => f.write_str("AlreadyFinished"),
            ResumeError::Panicked(_) => f.write_str("Panicked(..)"),
        }
    }
}

impl fmt::Display for ResumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumeError::AlreadyFinished => write!(f, "coroutine is already finished"),
            ResumeError::Panicked(_) => write!(f, "coroutine panicked"),
        }
    }
}

impl std::error::Error for ResumeError {}

struct CoroutineInner {
    registers: UnsafeCell<Registers>,
    _stack: GuardedStack,
    state: AtomicU8,
    /// Guards "a coroutine is in at most one structural list" (§3): only
    /// the holder that flips this false→true may enqueue on the ready
    /// FIFO, and only the one that flips it true→false may believe it
    /// owns sole membership there.
    ready_enqueued: AtomicBool,
    name: Option<String>,
    scheduler: Mutex<Option<SchedulerHandle>>,
    body: Mutex<Option<Box<dyn FnOnce() + Send + 'static>>>,
    panic_payload: Mutex<Option<PanicPayload>>,
}

unsafe impl Send for CoroutineInner {}
unsafe impl Sync for CoroutineInner {}

/// A refcounted handle to a coroutine.
///
/// `Clone` is the spec's `retain`; `Drop` is `release`. A coroutine is
/// destroyed once its last handle drops and it has reached `Finished`
/// (in this implementation: once its last handle drops, full stop — a
/// handle dropped while still runnable simply means nobody can resume it
/// again, matching the spec's "destroyed when refcount reaches zero and
/// state is FINISHED" in spirit, since a scheduler-managed coroutine's
/// ready-queue membership itself holds a handle until it finishes).
#[derive(Clone)]
pub struct Handle(Arc<CoroutineInner>);

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("name", &self.0.name)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Handle {}

impl Handle {
    pub fn state(&self) -> State {
        State::from_u8(self.0.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: State) {
        self.0.state.store(state as u8, Ordering::Release);
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.state() == State::Finished
    }

    /// Take the panic payload, if this coroutine finished by unwinding.
    pub fn take_panic(&self) -> Option<PanicPayload> {
        self.0.panic_payload.lock().unwrap().take()
    }

    pub(crate) fn scheduler(&self) -> Option<SchedulerHandle> {
        self.0.scheduler.lock().unwrap().clone()
    }

    pub(crate) fn bind_scheduler(&self, scheduler: SchedulerHandle) {
        *self.0.scheduler.lock().unwrap() = Some(scheduler);
    }

    /// Mark a freshly created coroutine `Ready` before its first ready-FIFO
    /// enqueue, purely for state observability (`resume` itself accepts
    /// `Created` too).
    pub(crate) fn mark_ready(&self) {
        self.set_state(State::Ready);
    }

    /// Idempotent claim of "this handle is now on the ready FIFO".
    /// Returns `true` if the caller won the claim (and must enqueue it).
    pub(crate) fn claim_ready_enqueue(&self) -> bool {
        self.0
            .ready_enqueued
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Called by the scheduler right before it hands this coroutine to a
    /// worker to run, releasing the ready-FIFO membership claim.
    pub(crate) fn clear_ready_enqueued(&self) {
        self.0.ready_enqueued.store(false, Ordering::Release);
    }

    /// Resume this coroutine: precondition per §4.2.
    ///
    /// On success, returns `Ok(())` whether the coroutine suspended,
    /// parked, or finished cleanly; `Err` carries the panic payload if it
    /// finished by unwinding (also retrievable later via `take_panic`),
    /// or `AlreadyFinished` if the precondition itself was violated —
    /// resuming a FINISHED coroutine is a hard error, not a no-op.
    pub fn resume(&self) -> Result<(), ResumeError> {
        match self.state() {
            State::Finished => return Err(ResumeError::AlreadyFinished),
            State::Running => return Ok(()),
            _ => {}
        }

        Environment::with(|env| {
            let from: Option<Handle> = env.stack.last().cloned();
            self.set_state(State::Running);
            env.stack.push(self.clone());

            let to_regs: *const Registers = self.0.registers.get();
            match from {
                Some(ref from_handle) => unsafe {
                    let from_regs: *mut Registers = from_handle.0.registers.get();
                    arch::swap(&mut *from_regs, &*to_regs);
                },
                None => unsafe {
                    arch::swap(&mut env.main, &*to_regs);
                },
            }
        });

        if let Some(payload) = self.take_panic() {
            return Err(ResumeError::Panicked(payload));
        }
        Ok(())
    }

    /// Block until this coroutine reaches `Finished`, resuming it for as
    /// long as it keeps yielding (`Suspended`/`Parked` are both driven
    /// forward here — `Parked` only returns from `resume` once something
    /// else has `unpark`ed it and it has actually run again).
    pub fn join(&self) -> Result<(), ResumeError> {
        loop {
            match self.state() {
                State::Finished => return Ok(()),
                State::Suspended => self.resume()?,
                State::Parked | State::Created | State::Ready => {
                    // Not resumable from here without a scheduler driving
                    // the park/unpark handshake; spin-yield the OS thread.
                    std::thread::yield_now();
                }
                State::Running => unreachable!("cannot join a coroutine resuming itself"),
            }
        }
    }
}

/// Spawn a new coroutine in the `Created` state with a fresh guard-paged
/// stack. The coroutine has no scheduler back-reference until one is
/// bound via `bind_scheduler` (done automatically by `Scheduler::spawn_co`).
pub fn create<F>(f: F, stack_bytes: usize) -> Handle
where
    F: FnOnce() + Send + 'static,
{
    create_named(f, stack_bytes, None)
}

pub fn create_named<F>(f: F, stack_bytes: usize, name: Option<String>) -> Handle
where
    F: FnOnce() + Send + 'static,
{
    let stack = GuardedStack::new(stack_bytes).expect("failed to map a guard-paged coroutine stack");
    let stack_top = stack.end();

    let inner = Arc::new(CoroutineInner {
        registers: UnsafeCell::new(Registers::empty()),
        _stack: stack,
        state: AtomicU8::new(State::Created as u8),
        ready_enqueued: AtomicBool::new(false),
        name,
        scheduler: Mutex::new(None),
        body: Mutex::new(Some(Box::new(f))),
        panic_payload: Mutex::new(None),
    });

    // Leak one strong reference into the trampoline argument; the
    // trampoline reconstitutes it on first entry (`Arc::from_raw`),
    // balancing this leak exactly once.
    let trampoline_arg = Arc::into_raw(inner.clone()) as *mut u8;
    let registers = unsafe { arch::initialize_call_frame(stack_top, trampoline_arg) };
    unsafe {
        *inner.registers.get() = registers;
    }

    Handle(inner)
}

/// Current running coroutine on this OS thread, if any (`None` means the
/// calling context is the worker/main thread itself, not a coroutine).
pub fn current() -> Option<Handle> {
    Environment::with(|env| env.stack.last().cloned())
}

/// Yield the current coroutine back to whatever resumed it, leaving it
/// in state `Suspended` (re-enqueuing, if desired, is the scheduler's
/// job — see `scheduler::worker`).
pub fn sched() {
    yield_now(State::Suspended)
}

/// Yield the current coroutine into `Parked`: it is not placed on any
/// ready list by this call. Something else must call `unpark` to make it
/// resumable again.
pub fn park() {
    yield_now(State::Parked)
}

fn yield_now(state: State) {
    assert_ne!(state, State::Running, "cannot yield into the Running state");

    Environment::with(|env| {
        let current = match env.stack.pop() {
            Some(h) => h,
            None => return, // Yielding from the worker/main thread itself is a no-op.
        };
        current.set_state(state);

        let from_regs: *const Registers = current.0.registers.get();
        match env.stack.last() {
            Some(parent) => unsafe {
                let parent_regs: *mut Registers = parent.0.registers.get();
                arch::swap(&mut *(from_regs as *mut Registers), &*parent_regs.cast_const());
            },
            None => unsafe {
                arch::swap(&mut *(from_regs as *mut Registers), &env.main);
            },
        }
    });
}

/// Mark a `Parked` coroutine as ready to run again, enqueuing it on its
/// bound scheduler's ready FIFO. Idempotent via `ready_enqueued`.
pub fn unpark(co: &Handle) {
    debug_assert_eq!(co.state(), State::Parked, "unpark on a non-parked coroutine");
    co.set_state(State::Ready);
    if let Some(scheduler) = co.scheduler() {
        scheduler.enqueue_ready(co.clone());
    } else {
        log::warn!(
            "unpark called on coroutine {:?} with no bound scheduler; it will never run again",
            co.name()
        );
    }
}

/// Like [`unpark`], but a no-op (instead of an assertion failure) if `co`
/// is not currently `Parked`. [`crate::blocker::Blocker::wake`] uses this:
/// a bounded/cancellable wait may schedule a timer-driven wake that races
/// against the real completion's own wake, and the loser must not crash
/// the program for calling wake on an already-resumed coroutine.
pub(crate) fn unpark_if_parked(co: &Handle) {
    if co.state() == State::Parked {
        unpark(co);
    }
}

/// Entry point jumped to (via `ret`) the first time a freshly created
/// coroutine's context is switched into. Never returns: once the body
/// finishes (or panics), it parks itself forever so a scheduler bug that
/// resumes a finished coroutine doesn't run its stack frame twice.
#[no_mangle]
extern "C" fn coroutine_entry_trampoline(arg: *mut u8) -> ! {
    // SAFETY: balances the `Arc::into_raw` leak performed in `create_named`.
    let inner: Arc<CoroutineInner> = unsafe { Arc::from_raw(arg as *const CoroutineInner) };
    let handle = Handle(inner);

    Environment::with(|env| {
        debug_assert_eq!(env.stack.last(), Some(&handle));
    });

    let body = handle
        .0
        .body
        .lock()
        .unwrap()
        .take()
        .expect("coroutine entered with no body");

    let result = panic::catch_unwind(AssertUnwindSafe(body));

    match result {
        Ok(()) => {
            handle.set_state(State::Finished);
        }
        Err(payload) => {
            log::error!(
                "coroutine '{}' panicked",
                handle.name().unwrap_or("<unnamed>")
            );
            *handle.0.panic_payload.lock().unwrap() = Some(payload);
            handle.set_state(State::Finished);
        }
    }

    loop {
        yield_now(State::Finished);
    }
}

/// Per-OS-thread bookkeeping: the bootstrap "main" context and the chain
/// of coroutines currently resuming one another on this thread.
struct Environment {
    main: Registers,
    stack: Vec<Handle>,
}

impl Environment {
    fn with<R>(f: impl FnOnce(&mut Environment) -> R) -> R {
        ENVIRONMENT.with(|cell| {
            let mut env = cell.borrow_mut();
            f(&mut env)
        })
    }
}

thread_local! {
    static ENVIRONMENT: std::cell::RefCell<Environment> = std::cell::RefCell::new(Environment {
        main: Registers::empty(),
        stack: Vec::new(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn resume_runs_the_body_once() {
        let (tx, rx) = channel();
        let co = create(
            move || {
                tx.send(1).unwrap();
            },
            64 * 1024,
        );
        co.resume().unwrap();
        assert_eq!(rx.recv().unwrap(), 1);
        assert!(co.is_finished());
    }

    #[test]
    fn sched_suspends_and_resume_continues() {
        let (tx, rx) = channel();
        let co = create(
            move || {
                tx.send(1).unwrap();
                sched();
                tx.send(2).unwrap();
            },
            64 * 1024,
        );
        co.resume().unwrap();
        assert_eq!(rx.recv().unwrap(), 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(co.state(), State::Suspended);

        co.resume().unwrap();
        assert_eq!(rx.recv().unwrap(), 2);
        assert!(co.is_finished());
    }

    #[test]
    fn resuming_a_finished_coroutine_is_a_hard_error() {
        let co = create(move || {}, 64 * 1024);
        co.resume().unwrap();
        assert!(co.is_finished());
        match co.resume() {
            Err(ResumeError::AlreadyFinished) => {}
            other => panic!("expected AlreadyFinished, got {other:?}"),
        }
        assert!(co.is_finished());
    }

    #[test]
    fn panics_are_captured_not_propagated_to_resumer() {
        let co = create(
            move || {
                panic!("boom");
            },
            64 * 1024,
        );
        let result = co.resume();
        assert!(result.is_err());
        assert!(co.is_finished());
    }

    #[test]
    fn nested_spawn_and_resume_from_inside_a_coroutine() {
        let (tx, rx) = channel();
        let outer_tx = tx.clone();
        let outer = create(
            move || {
                outer_tx.send(1).unwrap();
                let inner_tx = tx.clone();
                let inner = create(
                    move || {
                        inner_tx.send(2).unwrap();
                    },
                    64 * 1024,
                );
                inner.resume().unwrap();
            },
            64 * 1024,
        );
        outer.resume().unwrap();
        assert_eq!(rx.recv().unwrap(), 1);
        assert_eq!(rx.recv().unwrap(), 2);
        assert!(outer.is_finished());
    }
}
