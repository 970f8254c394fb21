//! C10 — metrics snapshots.
//!
//! Every counter a channel or scheduler keeps is a plain atomic, bumped
//! on the hot path with no lock beyond whatever the op already holds.
//! `snapshot` copies the whole block out in one read per field (the
//! teacher has no direct analogue — 2015-era `coroutine-rs` keeps no
//! counters at all — so this is grounded in the spec's §6 snapshot
//! record directly, laid out as the stable field order names it, and
//! wired the way the teacher wires its own `Options`/state structs:
//! plain public fields, a `Default`-free explicit constructor).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, RawCode};
use crate::platform::time::monotonic_now_ns;
use crate::zerocopy::Capabilities;

/// Live counters owned by one channel. Cheap to bump on every op;
/// `snapshot` is the only place that reads them all together, and even
/// that read is not atomic-as-a-whole (§4.10 calls scheduler stats
/// "best-effort; racy" — the same applies here for cross-field
/// consistency, though each individual field is exact).
#[derive(Debug, Default)]
pub struct ChannelCounters {
    pub total_sends: AtomicU64,
    pub total_recvs: AtomicU64,
    pub total_bytes_sent: AtomicU64,
    pub total_bytes_recv: AtomicU64,
    pub first_op_time_ns: AtomicU64,
    pub last_op_time_ns: AtomicU64,
    pub send_eagain: AtomicU64,
    pub send_etime: AtomicU64,
    pub send_epipe: AtomicU64,
    pub recv_eagain: AtomicU64,
    pub recv_etime: AtomicU64,
    pub recv_epipe: AtomicU64,
    pub zref_sent: AtomicU64,
    pub zref_received: AtomicU64,
    pub zref_aborted_close: AtomicU64,
    pub rv_matches: AtomicU64,
    pub rv_cancels: AtomicU64,
    pub rv_zdesc_matches: AtomicU64,
}

impl ChannelCounters {
    pub fn new() -> ChannelCounters {
        ChannelCounters::default()
    }

    fn stamp_op_time(&self) {
        let now = monotonic_now_ns();
        self.first_op_time_ns
            .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire)
            .ok();
        self.last_op_time_ns.store(now, Ordering::Release);
    }

    pub fn record_send(&self, bytes: usize) {
        self.total_sends.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_sent
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.stamp_op_time();
    }

    pub fn record_recv(&self, bytes: usize) {
        self.total_recvs.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_recv
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.stamp_op_time();
    }

    pub fn record_send_failure(&self, error: Error) {
        match error {
            Error::WouldBlock => {
                self.send_eagain.fetch_add(1, Ordering::Relaxed);
            }
            Error::TimedOut => {
                self.send_etime.fetch_add(1, Ordering::Relaxed);
            }
            Error::Closed => {
                self.send_epipe.fetch_add(1, Ordering::Relaxed);
            }
            other => log::debug!(
                "send failure has no dedicated counter: code={}",
                RawCode(other.code())
            ),
        }
    }

    pub fn record_recv_failure(&self, error: Error) {
        match error {
            Error::WouldBlock => {
                self.recv_eagain.fetch_add(1, Ordering::Relaxed);
            }
            Error::TimedOut => {
                self.recv_etime.fetch_add(1, Ordering::Relaxed);
            }
            Error::Closed => {
                self.recv_epipe.fetch_add(1, Ordering::Relaxed);
            }
            other => log::debug!(
                "recv failure has no dedicated counter: code={}",
                RawCode(other.code())
            ),
        }
    }

    pub fn record_zref_sent(&self) {
        self.zref_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_zref_received(&self) {
        self.zref_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_zref_aborted_close(&self) {
        self.zref_aborted_close.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rv_match(&self) {
        self.rv_matches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rv_cancel(&self) {
        self.rv_cancels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rv_zdesc_match(&self) {
        self.rv_zdesc_matches.fetch_add(1, Ordering::Relaxed);
    }

    fn load(field: &AtomicU64) -> u64 {
        field.load(Ordering::Relaxed)
    }

    /// Copy this counter block, plus the channel-level fields that live
    /// outside it, into a stable, snapshot-stamped record (§6).
    #[allow(clippy::too_many_arguments)]
    pub fn snapshot(
        &self,
        kind: i32,
        elem_sz: usize,
        capacity: usize,
        count: usize,
        capabilities: Capabilities,
        closed: bool,
    ) -> ChannelSnapshot {
        let first = Self::load(&self.first_op_time_ns);
        let last = Self::load(&self.last_op_time_ns);
        ChannelSnapshot {
            kind,
            elem_sz,
            capacity,
            count,
            capabilities: capabilities.bits(),
            closed,
            zref_mode: capabilities.contains(Capabilities::ZERO_COPY),
            ptr_mode: capabilities.contains(Capabilities::POINTER_DESCRIPTOR),
            total_sends: Self::load(&self.total_sends),
            total_recvs: Self::load(&self.total_recvs),
            total_bytes_sent: Self::load(&self.total_bytes_sent),
            total_bytes_recv: Self::load(&self.total_bytes_recv),
            first_op_time_ns: first,
            last_op_time_ns: last,
            send_eagain: Self::load(&self.send_eagain),
            send_etime: Self::load(&self.send_etime),
            send_epipe: Self::load(&self.send_epipe),
            recv_eagain: Self::load(&self.recv_eagain),
            recv_etime: Self::load(&self.recv_etime),
            recv_epipe: Self::load(&self.recv_epipe),
            zref_sent: Self::load(&self.zref_sent),
            zref_received: Self::load(&self.zref_received),
            zref_aborted_close: Self::load(&self.zref_aborted_close),
            rv_matches: Self::load(&self.rv_matches),
            rv_cancels: Self::load(&self.rv_cancels),
            rv_zdesc_matches: Self::load(&self.rv_zdesc_matches),
            duration_sec: if first == 0 {
                0.0
            } else {
                (last.saturating_sub(first)) as f64 / 1e9
            },
        }
    }

    /// Running totals since the last emitted metrics-pipe event, used by
    /// `delta_ops` in §4.7's emission threshold.
    pub fn ops_so_far(&self) -> u64 {
        Self::load(&self.total_sends) + Self::load(&self.total_recvs)
    }
}

/// Stable-field-order snapshot record (§6). `O(1)`: one atomic load per
/// field, taken under the channel's mutex by the caller so it is
/// internally consistent even though the counters themselves are not a
/// single atomic unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSnapshot {
    pub kind: i32,
    pub elem_sz: usize,
    pub capacity: usize,
    pub count: usize,
    pub capabilities: u32,
    pub closed: bool,
    pub zref_mode: bool,
    pub ptr_mode: bool,
    pub total_sends: u64,
    pub total_recvs: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_recv: u64,
    pub first_op_time_ns: u64,
    pub last_op_time_ns: u64,
    pub send_eagain: u64,
    pub send_etime: u64,
    pub send_epipe: u64,
    pub recv_eagain: u64,
    pub recv_etime: u64,
    pub recv_epipe: u64,
    pub zref_sent: u64,
    pub zref_received: u64,
    pub zref_aborted_close: u64,
    pub rv_matches: u64,
    pub rv_cancels: u64,
    pub rv_zdesc_matches: u64,
    pub duration_sec: f64,
}

/// A metrics-event record for the optional event pipe attached to a
/// channel (§6): totals as of `emitted_at_ns`, plus deltas since the
/// previous emission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsEvent {
    pub channel_kind: i32,
    pub emitted_at_ns: u64,
    pub first_op_time_ns: u64,
    pub last_op_time_ns: u64,
    pub totals: ChannelSnapshot,
    pub delta_sends: u64,
    pub delta_recvs: u64,
    pub delta_bytes_sent: u64,
    pub delta_bytes_recv: u64,
}

/// Per-field deltas and per-second rates between two snapshots of the
/// same channel (§4.10, §8's round-trip law).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    pub delta_sends: u64,
    pub delta_recvs: u64,
    pub delta_bytes_sent: u64,
    pub delta_bytes_recv: u64,
    pub sends_per_sec: f64,
    pub recvs_per_sec: f64,
    pub bytes_sent_per_sec: f64,
    pub bytes_recv_per_sec: f64,
}

/// A 1-microsecond floor on the sampling window so a `compute_rate` call
/// against two snapshots taken back-to-back never divides by zero
/// (§4.10).
const MIN_DURATION_SEC: f64 = 1e-6;

/// Per-second rates between `prev` and `curr`, using
/// `curr.last_op_time_ns - prev.last_op_time_ns` as the sampling window
/// (§4.10). Passing `prev = ChannelSnapshot::zeroed(...)` and `curr` a
/// channel's very first snapshot yields rates equal to totals over that
/// snapshot's own duration (§8's round-trip law).
pub fn compute_rate(prev: &ChannelSnapshot, curr: &ChannelSnapshot) -> RateSample {
    let delta_sends = curr.total_sends.saturating_sub(prev.total_sends);
    let delta_recvs = curr.total_recvs.saturating_sub(prev.total_recvs);
    let delta_bytes_sent = curr.total_bytes_sent.saturating_sub(prev.total_bytes_sent);
    let delta_bytes_recv = curr.total_bytes_recv.saturating_sub(prev.total_bytes_recv);

    let window_ns = curr.last_op_time_ns.saturating_sub(prev.last_op_time_ns);
    let window_sec = (window_ns as f64 / 1e9).max(MIN_DURATION_SEC);

    RateSample {
        delta_sends,
        delta_recvs,
        delta_bytes_sent,
        delta_bytes_recv,
        sends_per_sec: delta_sends as f64 / window_sec,
        recvs_per_sec: delta_recvs as f64 / window_sec,
        bytes_sent_per_sec: delta_bytes_sent as f64 / window_sec,
        bytes_recv_per_sec: delta_bytes_recv as f64 / window_sec,
    }
}

/// Best-effort, racy snapshot of one scheduler's atomics (§4.6's
/// "Metrics" list).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSnapshot {
    pub worker_count: usize,
    pub parked_count: usize,
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub steals_probes: u64,
    pub steals_succeeded: u64,
    pub steals_failures: u64,
    pub fastpath_hits: u64,
    pub fastpath_misses: u64,
    pub inject_pulls: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed_snapshot() -> ChannelSnapshot {
        ChannelSnapshot {
            kind: 0,
            elem_sz: 4,
            capacity: 0,
            count: 0,
            capabilities: 0,
            closed: false,
            zref_mode: false,
            ptr_mode: false,
            total_sends: 0,
            total_recvs: 0,
            total_bytes_sent: 0,
            total_bytes_recv: 0,
            first_op_time_ns: 0,
            last_op_time_ns: 0,
            send_eagain: 0,
            send_etime: 0,
            send_epipe: 0,
            recv_eagain: 0,
            recv_etime: 0,
            recv_epipe: 0,
            zref_sent: 0,
            zref_received: 0,
            zref_aborted_close: 0,
            rv_matches: 0,
            rv_cancels: 0,
            rv_zdesc_matches: 0,
            duration_sec: 0.0,
        }
    }

    #[test]
    fn snapshot_reflects_recorded_ops() {
        let counters = ChannelCounters::new();
        counters.record_send(4);
        counters.record_send(4);
        counters.record_recv(4);
        let snap = counters.snapshot(0, 4, 0, 0, Capabilities::empty(), false);
        assert_eq!(snap.total_sends, 2);
        assert_eq!(snap.total_bytes_sent, 8);
        assert_eq!(snap.total_recvs, 1);
        assert_eq!(snap.total_bytes_recv, 4);
    }

    #[test]
    fn first_op_time_is_stamped_once() {
        let counters = ChannelCounters::new();
        counters.record_send(4);
        let first = counters.first_op_time_ns.load(Ordering::Relaxed);
        counters.record_send(4);
        assert_eq!(counters.first_op_time_ns.load(Ordering::Relaxed), first);
        assert!(counters.last_op_time_ns.load(Ordering::Relaxed) >= first);
    }

    #[test]
    fn compute_rate_against_zeros_yields_totals_over_own_duration() {
        let counters = ChannelCounters::new();
        counters.record_send(4);
        counters.record_send(4);
        let curr = counters.snapshot(0, 4, 0, 0, Capabilities::empty(), false);
        let rate = compute_rate(&zeroed_snapshot(), &curr);
        assert_eq!(rate.delta_sends, 2);
        assert_eq!(rate.delta_bytes_sent, 8);
        assert!(rate.sends_per_sec > 0.0);
    }

    #[test]
    fn compute_rate_never_divides_by_zero() {
        let snap = zeroed_snapshot();
        let rate = compute_rate(&snap, &snap);
        assert_eq!(rate.sends_per_sec, 0.0);
    }

    #[test]
    fn failure_counters_are_keyed_by_error_kind() {
        let counters = ChannelCounters::new();
        counters.record_send_failure(Error::WouldBlock);
        counters.record_recv_failure(Error::Closed);
        let snap = counters.snapshot(0, 4, 0, 0, Capabilities::empty(), true);
        assert_eq!(snap.send_eagain, 1);
        assert_eq!(snap.recv_epipe, 1);
        assert_eq!(snap.send_etime, 0);
    }
}
