//! C7 — the channel engine.
//!
//! Rendezvous, buffered, conflated and unbounded channels all share one
//! mutex-guarded state machine and one pair of intrusive waiter-token
//! queues (§4.7). The teacher's own `sync::mpsc` is a thin, unfinished
//! wrapper over `std::sync::mpsc` with no rendezvous/conflated/unbounded
//! distinction and no waiter tokens at all, so this module is grounded
//! more directly in the teacher's general "one mutex, loop on spurious
//! wake" idiom (`sync/mutex.rs`, `sync/spinlock.rs`) than in
//! `sync/mpsc.rs` itself, generalized around [`crate::waiter::Waiter`]
//! and [`crate::wait::wait_for_terminal`].
//!
//! Rendezvous is modeled as a buffered ring of capacity zero: "room
//! available" (`count < capacity`) is always false, so a send can only
//! ever complete by a direct hand-off to a waiting receiver or by
//! parking a sender waiter — exactly the rendezvous contract. Conflated
//! is the one kind that never parks a sender, so it keeps its own
//! single-slot storage variant instead of sharing the ring.

pub mod descriptor;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::blocker::Blocker;
use crate::cancel::CancellationToken;
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::metrics::{ChannelCounters, ChannelSnapshot, MetricsEvent};
use crate::platform::time::{monotonic_now_ns, Deadline};
use crate::wait::wait_for_terminal;
use crate::waiter::{Outcome, Payload, Role, Waiter};
use crate::zerocopy::{BackendState, Capabilities};

/// Wire-constant channel kind (§6). `Buffered` carries its capacity;
/// `Rendezvous`/`Conflated` fix theirs (0 and 1 respectively).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Rendezvous,
    Buffered(usize),
    Conflated,
    Unbounded,
}

impl ChannelKind {
    pub fn wire(self) -> i32 {
        match self {
            ChannelKind::Rendezvous => 0,
            ChannelKind::Buffered(_) => 1,
            ChannelKind::Conflated => -1,
            ChannelKind::Unbounded => -2,
        }
    }

    /// `None` means unbounded; `Some(0)` means rendezvous (never has room).
    fn ring_capacity(self) -> Option<usize> {
        match self {
            ChannelKind::Rendezvous => Some(0),
            ChannelKind::Buffered(n) => Some(n),
            ChannelKind::Conflated => None, // uses `Storage::Conflated`, not a ring
            ChannelKind::Unbounded => None,
        }
    }
}

/// One entry on a waiter queue: the coordination token plus a typed cell
/// the eventual completer fills in (a sender waiter's cell already holds
/// its offered value; a receiver waiter's cell starts empty and is
/// filled by whichever send completes it).
struct QueuedWaiter<T> {
    waiter: Waiter,
    cell: Arc<Mutex<Option<T>>>,
}

/// Outcome of registering a select clause (§4.9 step 1) under this
/// channel's lock: either it completed on the spot, or a select-tagged
/// waiter now sits on this channel's queue for [`crate::select::Select`]
/// to park on alongside every other clause.
pub(crate) enum Registration {
    Immediate(Result<()>),
    Pending(Waiter),
}

enum Storage<T> {
    Ring(VecDeque<T>),
    Conflated(Option<T>),
}

struct MetricsPipe {
    sink: Sender<MetricsEvent>,
    emit_min_ops: u64,
    emit_min_ns: u64,
    prev_sends: u64,
    prev_recvs: u64,
    prev_bytes_sent: u64,
    prev_bytes_recv: u64,
    last_emit_ns: u64,
}

struct State<T> {
    storage: Storage<T>,
    sender_waiters: VecDeque<QueuedWaiter<T>>,
    receiver_waiters: VecDeque<QueuedWaiter<T>>,
    closed: bool,
    metrics_pipe: Option<MetricsPipe>,
}

impl<T> State<T> {
    fn count(&self) -> usize {
        match &self.storage {
            Storage::Ring(buf) => buf.len(),
            Storage::Conflated(slot) => slot.is_some() as usize,
        }
    }

    /// Pop queued waiters until one is still live (`Enqueued`) and claim
    /// it, discarding any stale entries a racing timeout/cancellation
    /// already claimed first.
    fn claim_next_live(queue: &mut VecDeque<QueuedWaiter<T>>) -> Option<QueuedWaiter<T>> {
        while let Some(qw) = queue.pop_front() {
            if qw.waiter.try_claim(Outcome::Ok) {
                return Some(qw);
            }
        }
        None
    }

    fn unlink(queue: &mut VecDeque<QueuedWaiter<T>>, target: &Waiter) {
        queue.retain(|qw| qw.waiter != *target);
    }
}

pub(crate) struct Inner<T> {
    kind: ChannelKind,
    state: Mutex<State<T>>,
    counters: ChannelCounters,
    capabilities: Capabilities,
    backend: Option<Box<dyn BackendState>>,
    cancel_slice: Duration,
    /// Strict-mode format-policy check (§4.8), set only by
    /// [`descriptor::descriptor_channel`]; `None`/`false` for every
    /// ordinary `Channel<T>`.
    pub(crate) format_policy: Option<crate::zerocopy::FormatPolicy>,
    pub(crate) strict_format: bool,
}

impl<T> Inner<T> {
    fn elem_sz() -> usize {
        std::mem::size_of::<T>()
    }

    pub(crate) fn snapshot(&self) -> ChannelSnapshot {
        let state = self.state.lock().unwrap();
        self.snapshot_locked(&state)
    }

    fn snapshot_locked(&self, state: &State<T>) -> ChannelSnapshot {
        self.counters.snapshot(
            self.kind.wire(),
            Self::elem_sz(),
            self.kind.ring_capacity().unwrap_or(0),
            state.count(),
            self.capabilities,
            state.closed,
        )
    }

    fn note_zref_sent(&self) {
        if self.capabilities.contains(Capabilities::ZERO_COPY) {
            self.counters.record_zref_sent();
            if let Some(backend) = &self.backend {
                backend.on_sent();
            }
        }
    }

    fn note_zref_received(&self) {
        if self.capabilities.contains(Capabilities::ZERO_COPY) {
            self.counters.record_zref_received();
            if let Some(backend) = &self.backend {
                backend.on_received();
            }
        }
    }

    fn note_zref_aborted_close(&self) {
        if self.capabilities.contains(Capabilities::ZERO_COPY) {
            self.counters.record_zref_aborted_close();
            if let Some(backend) = &self.backend {
                backend.on_aborted_close();
            }
        }
    }

    /// A direct sender/receiver hand-off completed with no buffering
    /// (§4.7's rendezvous counters). Only rendezvous channels bump this;
    /// a buffered channel landing in a ring slot is not a "match".
    fn note_rv_match(&self) {
        if self.kind == ChannelKind::Rendezvous {
            self.counters.record_rv_match();
            if self.capabilities.contains(Capabilities::ZERO_COPY) {
                self.counters.record_rv_zdesc_match();
            }
        }
    }

    /// A rendezvous wait ended without a match (timed out or cancelled).
    fn note_rv_cancel(&self) {
        if self.kind == ChannelKind::Rendezvous {
            self.counters.record_rv_cancel();
        }
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.closed = true;

        // Fail every queued sender fast with CLOSED (§4.7's Close),
        // rather than letting producers hang until their own deadline.
        let stale_senders: Vec<QueuedWaiter<T>> = state.sender_waiters.drain(..).collect();
        for qw in stale_senders {
            if qw.waiter.try_claim(Outcome::Closed) {
                self.note_zref_aborted_close();
                qw.waiter.wake();
            }
        }
        // Receivers wake too, so one parked on an empty channel observes
        // drain-then-CLOSED instead of waiting out its own deadline.
        let stale_receivers: Vec<QueuedWaiter<T>> = state.receiver_waiters.drain(..).collect();
        for qw in stale_receivers {
            if qw.waiter.try_claim(Outcome::Closed) {
                qw.waiter.wake();
            }
        }
    }
}

impl<T: Send + 'static> Inner<T> {
    fn maybe_emit_metrics(&self) {
        let emit = {
            let mut state = self.state.lock().unwrap();
            let totals = self.snapshot_locked(&state);
            let now = monotonic_now_ns();
            match &mut state.metrics_pipe {
                None => None,
                Some(pipe) => {
                    let delta_ops = (totals.total_sends - pipe.prev_sends)
                        + (totals.total_recvs - pipe.prev_recvs);
                    let due = delta_ops >= pipe.emit_min_ops
                        || now.saturating_sub(pipe.last_emit_ns) >= pipe.emit_min_ns;
                    if !due {
                        None
                    } else {
                        let event = MetricsEvent {
                            channel_kind: self.kind.wire(),
                            emitted_at_ns: now,
                            first_op_time_ns: totals.first_op_time_ns,
                            last_op_time_ns: totals.last_op_time_ns,
                            totals,
                            delta_sends: totals.total_sends - pipe.prev_sends,
                            delta_recvs: totals.total_recvs - pipe.prev_recvs,
                            delta_bytes_sent: totals.total_bytes_sent - pipe.prev_bytes_sent,
                            delta_bytes_recv: totals.total_bytes_recv - pipe.prev_bytes_recv,
                        };
                        pipe.prev_sends = totals.total_sends;
                        pipe.prev_recvs = totals.total_recvs;
                        pipe.prev_bytes_sent = totals.total_bytes_sent;
                        pipe.prev_bytes_recv = totals.total_bytes_recv;
                        pipe.last_emit_ns = now;
                        Some((pipe.sink.clone(), event))
                    }
                }
            }
        };
        if let Some((sink, event)) = emit {
            // Best-effort: a full or closed metrics pipe must never stall
            // the data path it's observing.
            let _ = sink.try_send(event);
        }
    }
}

/// The sending half of a channel. Cheap to clone; every clone shares the
/// same underlying state.
pub struct Sender<T>(pub(crate) Arc<Inner<T>>);

/// The receiving half of a channel. Cheap to clone; every clone shares
/// the same underlying state.
pub struct Receiver<T>(pub(crate) Arc<Inner<T>>);

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Sender<T> {
        Sender(self.0.clone())
    }
}
impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Receiver<T> {
        Receiver(self.0.clone())
    }
}

pub(crate) fn new_inner<T>(
    kind: ChannelKind,
    capabilities: Capabilities,
    backend: Option<Box<dyn BackendState>>,
    format_policy: Option<crate::zerocopy::FormatPolicy>,
    strict_format: bool,
    cancel_slice_ms: u64,
) -> Arc<Inner<T>> {
    let storage = match kind {
        ChannelKind::Conflated => Storage::Conflated(None),
        _ => Storage::Ring(VecDeque::new()),
    };
    Arc::new(Inner {
        kind,
        state: Mutex::new(State {
            storage,
            sender_waiters: VecDeque::new(),
            receiver_waiters: VecDeque::new(),
            closed: false,
            metrics_pipe: None,
        }),
        counters: ChannelCounters::new(),
        capabilities,
        backend,
        cancel_slice: Duration::from_millis(cancel_slice_ms.max(1)),
        format_policy,
        strict_format,
    })
}

/// Create a new channel of the given kind, polling for cancellation at
/// the process-default scheduler's configured `cancel_slice_ms` (§4.7,
/// §4.9 — the same knob [`crate::scheduler::worker`] applies to
/// work-stealing scan depth via `steal_scan_max`).
pub fn channel<T: Send + 'static>(kind: ChannelKind) -> (Sender<T>, Receiver<T>) {
    let cancel_slice_ms = crate::scheduler::default().config().cancel_slice_ms;
    let inner = new_inner(kind, Capabilities::empty(), None, None, false, cancel_slice_ms);
    (Sender(inner.clone()), Receiver(inner))
}

/// Create a channel whose cancellation poll slice is pinned to `cfg`
/// rather than the process-default scheduler's, for an embedder running
/// a coroutine or channel set against a scheduler it configured itself.
pub fn channel_with_config<T: Send + 'static>(
    kind: ChannelKind,
    cfg: &SchedulerConfig,
) -> (Sender<T>, Receiver<T>) {
    let inner = new_inner(
        kind,
        Capabilities::empty(),
        None,
        None,
        false,
        cfg.cancel_slice_ms,
    );
    (Sender(inner.clone()), Receiver(inner))
}

impl<T: Send + 'static> Sender<T> {
    pub fn send(&self, value: T) -> Result<()> {
        self.send_c(value, -1, None)
    }

    pub fn try_send(&self, value: T) -> Result<()> {
        self.send_c(value, 0, None)
    }

    pub fn send_timeout(&self, value: T, timeout_ms: i64) -> Result<()> {
        self.send_c(value, timeout_ms, None)
    }

    /// Cancellable, bounded send (§4.4, §4.7). `timeout_ms < 0` blocks
    /// until progress, close, or cancellation; `timeout_ms == 0` never
    /// blocks.
    pub fn send_c(
        &self,
        value: T,
        timeout_ms: i64,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let inner = &self.0;
        let mut state = inner.state.lock().unwrap();

        if state.closed {
            inner.counters.record_send_failure(Error::Closed);
            return Err(Error::Closed);
        }

        if let Some(qw) = State::claim_next_live(&mut state.receiver_waiters) {
            *qw.cell.lock().unwrap() = Some(value);
            drop(state);
            inner.note_rv_match();
            inner.counters.record_send(Inner::<T>::elem_sz());
            inner.note_zref_sent();
            qw.waiter.wake();
            inner.maybe_emit_metrics();
            return Ok(());
        }

        match &mut state.storage {
            Storage::Conflated(slot) => {
                *slot = Some(value);
                drop(state);
                inner.counters.record_send(Inner::<T>::elem_sz());
                inner.note_zref_sent();
                inner.maybe_emit_metrics();
                return Ok(());
            }
            Storage::Ring(buf) => {
                let has_room = match inner.kind.ring_capacity() {
                    None => true,
                    Some(cap) => buf.len() < cap,
                };
                if has_room {
                    buf.push_back(value);
                    drop(state);
                    inner.counters.record_send(Inner::<T>::elem_sz());
                    inner.note_zref_sent();
                    inner.maybe_emit_metrics();
                    return Ok(());
                }
            }
        }

        if timeout_ms == 0 {
            inner.counters.record_send_failure(Error::WouldBlock);
            return Err(Error::WouldBlock);
        }

        let cell = Arc::new(Mutex::new(Some(value)));
        let blocker = Blocker::current();
        let waiter = Waiter::new(blocker, Role::Sender, Payload::Empty);
        waiter.mark_enqueued();
        state.sender_waiters.push_back(QueuedWaiter {
            waiter: waiter.clone(),
            cell,
        });
        drop(state);

        let deadline = Deadline::from_timeout_ms(timeout_ms);
        let outcome = wait_for_terminal(&waiter, deadline, cancel, inner.cancel_slice, || {
            let mut state = inner.state.lock().unwrap();
            State::unlink(&mut state.sender_waiters, &waiter);
        });

        match outcome {
            Outcome::Ok => {
                inner.counters.record_send(Inner::<T>::elem_sz());
                inner.note_zref_sent();
                inner.maybe_emit_metrics();
                Ok(())
            }
            Outcome::Closed => {
                inner.counters.record_send_failure(Error::Closed);
                Err(Error::Closed)
            }
            Outcome::TimedOut => {
                inner.note_rv_cancel();
                inner.counters.record_send_failure(Error::TimedOut);
                Err(Error::TimedOut)
            }
            Outcome::Cancelled => {
                inner.note_rv_cancel();
                Err(Error::Cancelled)
            }
        }
    }

    pub fn close(&self) {
        self.0.close();
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        self.0.snapshot()
    }

    /// Register a send clause for [`crate::select::Select`] (§4.9 step
    /// 1): same immediate-completion checks as [`Sender::send_c`], but a
    /// miss installs a select-tagged waiter instead of parking here.
    pub(crate) fn select_register(
        &self,
        select: &Arc<crate::select::SelectShared>,
        idx: usize,
        blocker: Blocker,
        value: T,
    ) -> Registration {
        let inner = &self.0;
        let mut state = inner.state.lock().unwrap();

        if state.closed {
            inner.counters.record_send_failure(Error::Closed);
            return Registration::Immediate(Err(Error::Closed));
        }

        if let Some(qw) = State::claim_next_live(&mut state.receiver_waiters) {
            *qw.cell.lock().unwrap() = Some(value);
            drop(state);
            inner.note_rv_match();
            inner.counters.record_send(Inner::<T>::elem_sz());
            inner.note_zref_sent();
            qw.waiter.wake();
            inner.maybe_emit_metrics();
            return Registration::Immediate(Ok(()));
        }

        match &mut state.storage {
            Storage::Conflated(slot) => {
                *slot = Some(value);
                drop(state);
                inner.counters.record_send(Inner::<T>::elem_sz());
                inner.note_zref_sent();
                inner.maybe_emit_metrics();
                return Registration::Immediate(Ok(()));
            }
            Storage::Ring(buf) => {
                let has_room = match inner.kind.ring_capacity() {
                    None => true,
                    Some(cap) => buf.len() < cap,
                };
                if has_room {
                    buf.push_back(value);
                    drop(state);
                    inner.counters.record_send(Inner::<T>::elem_sz());
                    inner.note_zref_sent();
                    inner.maybe_emit_metrics();
                    return Registration::Immediate(Ok(()));
                }
            }
        }

        let waiter = Waiter::new_select_clause(blocker, idx, select.clone(), Payload::Empty);
        waiter.mark_enqueued();
        state.sender_waiters.push_back(QueuedWaiter {
            waiter: waiter.clone(),
            cell: Arc::new(Mutex::new(Some(value))),
        });
        Registration::Pending(waiter)
    }

    /// Cancel a clause this sender registered; only unlinks it if this
    /// call itself wins the token's ENQUEUED→CANCELLED race, mirroring
    /// [`wait_for_terminal`]'s `unlink` contract.
    pub(crate) fn select_cancel(&self, waiter: &Waiter) {
        if waiter.try_cancel() {
            let mut state = self.0.state.lock().unwrap();
            State::unlink(&mut state.sender_waiters, waiter);
        }
    }

    /// Attach a second channel as this channel's metrics-event sink
    /// (§4.7's optional metrics pipe). Reattaching replaces any previous
    /// pipe.
    pub fn attach_metrics_pipe(&self, sink: Sender<MetricsEvent>, emit_min_ops: u64, emit_min_ns: u64) {
        let mut state = self.0.state.lock().unwrap();
        let totals = self.0.snapshot_locked(&state);
        state.metrics_pipe = Some(MetricsPipe {
            sink,
            emit_min_ops,
            emit_min_ns,
            prev_sends: totals.total_sends,
            prev_recvs: totals.total_recvs,
            prev_bytes_sent: totals.total_bytes_sent,
            prev_bytes_recv: totals.total_bytes_recv,
            last_emit_ns: monotonic_now_ns(),
        });
    }
}

impl<T: Send + 'static> Receiver<T> {
    pub fn recv(&self) -> Result<T> {
        self.recv_c(-1, None)
    }

    pub fn try_recv(&self) -> Result<T> {
        self.recv_c(0, None)
    }

    pub fn recv_timeout(&self, timeout_ms: i64) -> Result<T> {
        self.recv_c(timeout_ms, None)
    }

    /// Cancellable, bounded receive (§4.4, §4.7).
    pub fn recv_c(&self, timeout_ms: i64, cancel: Option<&CancellationToken>) -> Result<T> {
        let inner = &self.0;
        let mut state = inner.state.lock().unwrap();

        match &mut state.storage {
            Storage::Conflated(slot) => {
                if let Some(value) = slot.take() {
                    drop(state);
                    inner.counters.record_recv(Inner::<T>::elem_sz());
                    inner.note_zref_received();
                    inner.maybe_emit_metrics();
                    return Ok(value);
                }
            }
            Storage::Ring(buf) => {
                if let Some(value) = buf.pop_front() {
                    // Room just opened up: admit one waiting sender.
                    let admitted = State::claim_next_live(&mut state.sender_waiters);
                    if let Some(qw) = admitted {
                        let sent = qw.cell.lock().unwrap().take();
                        if let (Storage::Ring(buf), Some(sent_value)) = (&mut state.storage, sent) {
                            buf.push_back(sent_value);
                        }
                        drop(state);
                        qw.waiter.wake();
                    } else {
                        drop(state);
                    }
                    inner.counters.record_recv(Inner::<T>::elem_sz());
                    inner.note_zref_received();
                    inner.maybe_emit_metrics();
                    return Ok(value);
                }
            }
        }

        // Nothing buffered (always true for a rendezvous channel, whose
        // ring never holds anything): a sender may already be parked
        // with nowhere to put its value, so try a direct hand-off before
        // falling through to closed/timeout/park.
        if let Some(qw) = State::claim_next_live(&mut state.sender_waiters) {
            let value = qw
                .cell
                .lock()
                .unwrap()
                .take()
                .expect("a claimed sender waiter must carry its offered value");
            inner.note_rv_match();
            drop(state);
            qw.waiter.wake();
            inner.counters.record_recv(Inner::<T>::elem_sz());
            inner.note_zref_received();
            inner.maybe_emit_metrics();
            return Ok(value);
        }

        if state.closed {
            inner.counters.record_recv_failure(Error::Closed);
            return Err(Error::Closed);
        }

        if timeout_ms == 0 {
            inner.counters.record_recv_failure(Error::WouldBlock);
            return Err(Error::WouldBlock);
        }

        let cell = Arc::new(Mutex::new(None));
        let blocker = Blocker::current();
        let waiter = Waiter::new(blocker, Role::Receiver, Payload::Empty);
        waiter.mark_enqueued();
        state.receiver_waiters.push_back(QueuedWaiter {
            waiter: waiter.clone(),
            cell: cell.clone(),
        });
        drop(state);

        let deadline = Deadline::from_timeout_ms(timeout_ms);
        let outcome = wait_for_terminal(&waiter, deadline, cancel, inner.cancel_slice, || {
            let mut state = inner.state.lock().unwrap();
            State::unlink(&mut state.receiver_waiters, &waiter);
        });

        match outcome {
            Outcome::Ok => {
                let value = cell
                    .lock()
                    .unwrap()
                    .take()
                    .expect("a claimed receiver waiter must carry a deposited value");
                inner.counters.record_recv(Inner::<T>::elem_sz());
                inner.note_zref_received();
                inner.maybe_emit_metrics();
                Ok(value)
            }
            Outcome::Closed => {
                inner.counters.record_recv_failure(Error::Closed);
                Err(Error::Closed)
            }
            Outcome::TimedOut => {
                inner.note_rv_cancel();
                inner.counters.record_recv_failure(Error::TimedOut);
                Err(Error::TimedOut)
            }
            Outcome::Cancelled => {
                inner.note_rv_cancel();
                Err(Error::Cancelled)
            }
        }
    }

    pub fn close(&self) {
        self.0.close();
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        self.0.snapshot()
    }

    /// Register a receive clause for [`crate::select::Select`] (§4.9
    /// step 1): same immediate-completion checks as [`Receiver::recv_c`],
    /// depositing straight into `cell` so the caller can read it back
    /// once it learns which clause won; a miss installs a select-tagged
    /// waiter sharing that same cell.
    pub(crate) fn select_register(
        &self,
        select: &Arc<crate::select::SelectShared>,
        idx: usize,
        blocker: Blocker,
        cell: Arc<Mutex<Option<T>>>,
    ) -> Registration {
        let inner = &self.0;
        let mut state = inner.state.lock().unwrap();

        match &mut state.storage {
            Storage::Conflated(slot) => {
                if let Some(value) = slot.take() {
                    drop(state);
                    inner.counters.record_recv(Inner::<T>::elem_sz());
                    inner.note_zref_received();
                    inner.maybe_emit_metrics();
                    *cell.lock().unwrap() = Some(value);
                    return Registration::Immediate(Ok(()));
                }
            }
            Storage::Ring(buf) => {
                if let Some(value) = buf.pop_front() {
                    let admitted = State::claim_next_live(&mut state.sender_waiters);
                    if let Some(qw) = admitted {
                        let sent = qw.cell.lock().unwrap().take();
                        if let (Storage::Ring(buf), Some(sent_value)) = (&mut state.storage, sent) {
                            buf.push_back(sent_value);
                        }
                        drop(state);
                        qw.waiter.wake();
                    } else {
                        drop(state);
                    }
                    inner.counters.record_recv(Inner::<T>::elem_sz());
                    inner.note_zref_received();
                    inner.maybe_emit_metrics();
                    *cell.lock().unwrap() = Some(value);
                    return Registration::Immediate(Ok(()));
                }
            }
        }

        if let Some(qw) = State::claim_next_live(&mut state.sender_waiters) {
            let value = qw
                .cell
                .lock()
                .unwrap()
                .take()
                .expect("a claimed sender waiter must carry its offered value");
            inner.note_rv_match();
            drop(state);
            qw.waiter.wake();
            inner.counters.record_recv(Inner::<T>::elem_sz());
            inner.note_zref_received();
            inner.maybe_emit_metrics();
            *cell.lock().unwrap() = Some(value);
            return Registration::Immediate(Ok(()));
        }

        if state.closed {
            inner.counters.record_recv_failure(Error::Closed);
            return Registration::Immediate(Err(Error::Closed));
        }

        let waiter = Waiter::new_select_clause(blocker, idx, select.clone(), Payload::Empty);
        waiter.mark_enqueued();
        state.receiver_waiters.push_back(QueuedWaiter {
            waiter: waiter.clone(),
            cell,
        });
        Registration::Pending(waiter)
    }

    /// Cancel a clause this receiver registered; see
    /// [`Sender::select_cancel`].
    pub(crate) fn select_cancel(&self, waiter: &Waiter) {
        if waiter.try_cancel() {
            let mut state = self.0.state.lock().unwrap();
            State::unlink(&mut state.receiver_waiters, waiter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration as StdDuration;

    #[test]
    fn rendezvous_send_waits_for_a_receiver() {
        let (tx, rx) = channel::<i32>(ChannelKind::Rendezvous);
        let handle = thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(20));
            assert_eq!(rx.recv().unwrap(), 7);
        });
        tx.send(7).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn buffered_send_does_not_block_while_room_remains() {
        let (tx, rx) = channel::<i32>(ChannelKind::Buffered(2));
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        assert_eq!(tx.try_send(3), Err(Error::WouldBlock));
        assert_eq!(rx.recv().unwrap(), 1);
        assert_eq!(rx.recv().unwrap(), 2);
    }

    #[test]
    fn buffered_capacity_one_second_send_blocks_until_drained() {
        let (tx, rx) = channel::<i32>(ChannelKind::Buffered(1));
        tx.send(1).unwrap();
        let tx2 = tx.clone();
        let handle = thread::spawn(move || {
            tx2.send(2).unwrap();
        });
        thread::sleep(StdDuration::from_millis(20));
        assert_eq!(rx.recv().unwrap(), 1);
        assert_eq!(rx.recv().unwrap(), 2);
        handle.join().unwrap();
    }

    #[test]
    fn conflated_send_overwrites_and_never_blocks() {
        let (tx, rx) = channel::<i32>(ChannelKind::Conflated);
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tx.send(3).unwrap();
        assert_eq!(rx.recv().unwrap(), 3);
    }

    #[test]
    fn unbounded_send_never_blocks() {
        let (tx, rx) = channel::<i32>(ChannelKind::Unbounded);
        for i in 0..10_000 {
            tx.send(i).unwrap();
        }
        for i in 0..10_000 {
            assert_eq!(rx.recv().unwrap(), i);
        }
    }

    #[test]
    fn recv_on_empty_timeout_zero_is_would_block() {
        let (_tx, rx) = channel::<i32>(ChannelKind::Buffered(1));
        assert_eq!(rx.try_recv(), Err(Error::WouldBlock));
        assert_eq!(rx.snapshot().recv_eagain, 1);
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let (tx, rx) = channel::<i32>(ChannelKind::Buffered(4));
        tx.send(1).unwrap();
        tx.close();
        assert_eq!(rx.recv().unwrap(), 1);
        assert_eq!(rx.recv(), Err(Error::Closed));
        assert_eq!(rx.snapshot().recv_epipe, 1);
    }

    #[test]
    fn close_wakes_a_blocked_sender_with_closed() {
        let (tx, _rx) = channel::<i32>(ChannelKind::Rendezvous);
        let tx2 = tx.clone();
        let handle = thread::spawn(move || tx2.send(1));
        thread::sleep(StdDuration::from_millis(20));
        tx.close();
        assert_eq!(handle.join().unwrap(), Err(Error::Closed));
    }

    #[test]
    fn send_timeout_on_a_stalled_rendezvous_times_out() {
        let (tx, _rx) = channel::<i32>(ChannelKind::Rendezvous);
        let result = tx.send_timeout(1, 20);
        assert_eq!(result, Err(Error::TimedOut));
        assert_eq!(tx.snapshot().send_etime, 1);
    }

    #[test]
    fn recv_c_observes_cancellation_before_a_far_off_deadline() {
        let (_tx, rx) = channel::<i32>(ChannelKind::Buffered(1));
        let token = CancellationToken::new();
        let t2 = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(30));
            t2.cancel();
        });
        let result = rx.recv_c(5_000, Some(&token));
        assert_eq!(result, Err(Error::Cancelled));
        handle.join().unwrap();
    }

    #[test]
    fn fifo_order_is_preserved_per_producer() {
        let (tx, rx) = channel::<i32>(ChannelKind::Buffered(8));
        for i in 0..8 {
            tx.send(i).unwrap();
        }
        for i in 0..8 {
            assert_eq!(rx.recv().unwrap(), i);
        }
    }

    #[test]
    fn counts_match_deltas_on_success() {
        let (tx, rx) = channel::<i32>(ChannelKind::Buffered(4));
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        rx.recv().unwrap();
        let snap = tx.snapshot();
        assert_eq!(snap.total_sends, 2);
        assert_eq!(snap.total_recvs, 1);
        assert_eq!(
            snap.total_bytes_sent,
            2 * std::mem::size_of::<i32>() as u64
        );
    }

    #[test]
    fn channel_with_config_honors_a_custom_cancel_slice_ms() {
        let cfg = crate::config::SchedulerConfig::default().cancel_slice_ms(200);
        let (_tx, rx) = channel_with_config::<i32>(ChannelKind::Buffered(1), &cfg);
        let token = CancellationToken::new();
        let t2 = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(10));
            t2.cancel();
        });
        let start = std::time::Instant::now();
        let result = rx.recv_c(-1, Some(&token));
        let elapsed = start.elapsed();
        assert_eq!(result, Err(Error::Cancelled));
        assert!(
            elapsed >= StdDuration::from_millis(150),
            "expected the configured 200ms cancel slice to gate detection, took {elapsed:?}"
        );
        handle.join().unwrap();
    }

    #[test]
    fn metrics_pipe_emits_once_the_op_threshold_is_reached() {
        let (tx, rx) = channel::<i32>(ChannelKind::Buffered(4));
        let (msink, mrx) = channel::<MetricsEvent>(ChannelKind::Buffered(8));
        tx.attach_metrics_pipe(msink, 2, u64::MAX);
        tx.send(1).unwrap();
        assert!(mrx.try_recv().is_err());
        tx.send(2).unwrap();
        let event = mrx.recv_timeout(1_000).unwrap();
        assert_eq!(event.delta_sends, 2);
        rx.recv().unwrap();
        rx.recv().unwrap();
    }
}
