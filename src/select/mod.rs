//! C9 — the select multiplexer.
//!
//! One [`Select`] groups receive and send clauses across possibly
//! unrelated channels (possibly of different element types, hence the
//! `Box<dyn ClauseOp>` erasure) and waits for the first one to be ready
//! (§4.9). Grounded in the same waiter-token machinery [`crate::channel`]
//! already uses: every clause that cannot complete immediately installs
//! an ordinary select-tagged [`crate::waiter::Waiter`] on its own
//! channel's queue, and every registered clause shares one [`Blocker`]
//! so a completion on any of them wakes the same parked caller. The one
//! new piece of coordination is [`SelectShared`]: a single atomic "who
//! won" word every clause's waiter consults from inside
//! [`crate::waiter::Waiter::try_claim`] before it lets its own
//! channel-level claim count, so two clauses cannot both complete a
//! real transfer out of the same `wait` call.
//!
//! A clause that is ready the moment it registers is resolved right
//! there under its own channel's lock, before any other clause in the
//! same `Select` is even looked at — so at most one clause can ever
//! complete immediately, with source order (or, under
//! [`Select::randomized`], a shuffled order) deciding which one gets
//! first look. Only clauses that *park* ever race each other through
//! `SelectShared`, because only then can two independent channels both
//! try to complete a waiter concurrently from other threads.

use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::blocker::Blocker;
use crate::cancel::CancellationToken;
use crate::channel::{Receiver, Registration, Sender};
use crate::error::{Error, Result};
use crate::platform::time::Deadline;
use crate::wait::next_wake_deadline;
use crate::waiter::{Outcome, Waiter};

/// The cross-clause winner line (§4.9 step 3). `-1` means unclaimed;
/// otherwise the clause index that won.
pub struct SelectShared {
    winner: AtomicIsize,
}

impl SelectShared {
    fn new() -> SelectShared {
        SelectShared {
            winner: AtomicIsize::new(-1),
        }
    }

    /// Called from inside [`crate::waiter::Waiter::try_claim`], never
    /// directly by clause code.
    pub(crate) fn try_claim(&self, clause_idx: usize) -> bool {
        self.winner
            .compare_exchange(-1, clause_idx as isize, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn winner_index(&self) -> Option<usize> {
        let w = self.winner.load(Ordering::Acquire);
        if w < 0 {
            None
        } else {
            Some(w as usize)
        }
    }
}

trait ClauseOp: Send {
    fn register(&mut self, select: &Arc<SelectShared>, idx: usize, blocker: Blocker) -> Registration;
    fn cancel(&mut self);
}

struct RecvClauseImpl<T: Send + 'static> {
    rx: Receiver<T>,
    cell: Arc<Mutex<Option<T>>>,
    waiter: Option<Waiter>,
}

impl<T: Send + 'static> ClauseOp for RecvClauseImpl<T> {
    fn register(&mut self, select: &Arc<SelectShared>, idx: usize, blocker: Blocker) -> Registration {
        let reg = self.rx.select_register(select, idx, blocker, self.cell.clone());
        if let Registration::Pending(waiter) = &reg {
            self.waiter = Some(waiter.clone());
        }
        reg
    }

    fn cancel(&mut self) {
        if let Some(waiter) = &self.waiter {
            self.rx.select_cancel(waiter);
        }
    }
}

struct SendClauseImpl<T: Send + 'static> {
    tx: Sender<T>,
    value: Option<T>,
    waiter: Option<Waiter>,
}

impl<T: Send + 'static> ClauseOp for SendClauseImpl<T> {
    fn register(&mut self, select: &Arc<SelectShared>, idx: usize, blocker: Blocker) -> Registration {
        let value = self
            .value
            .take()
            .expect("a send clause is only ever registered once");
        let reg = self.tx.select_register(select, idx, blocker, value);
        if let Registration::Pending(waiter) = &reg {
            self.waiter = Some(waiter.clone());
        }
        reg
    }

    fn cancel(&mut self) {
        if let Some(waiter) = &self.waiter {
            self.tx.select_cancel(waiter);
        }
    }
}

/// A handle to a registered receive clause's destination slot. Valid to
/// read only after the owning [`Select::wait`] call returns that
/// clause's index as the winner.
pub struct RecvSlot<T>(Arc<Mutex<Option<T>>>);

impl<T> RecvSlot<T> {
    pub fn take(&self) -> Option<T> {
        self.0.lock().unwrap().take()
    }
}

/// A builder of channel clauses waited on together (§4.9). Clause
/// indices are assigned in registration order, starting at zero, and
/// are the same indices [`Select::wait`] reports back.
pub struct Select {
    clauses: Vec<Box<dyn ClauseOp>>,
    randomized: bool,
    cancel_slice_ms: u64,
}

impl Default for Select {
    fn default() -> Select {
        Select::new()
    }
}

impl Select {
    pub fn new() -> Select {
        Select {
            clauses: Vec::new(),
            randomized: false,
            cancel_slice_ms: crate::scheduler::default().config().cancel_slice_ms,
        }
    }

    /// Shuffle clause registration order instead of the default
    /// source-order-wins-ties policy (§4.9's fairness knob). Only
    /// affects which clause gets first look at an already-ready
    /// counterpart; once clauses park, the winner is whichever
    /// completes first regardless of this setting.
    pub fn randomized(mut self) -> Select {
        self.randomized = true;
        self
    }

    /// Pin the cancellation poll slice (§4.9 step 5) to `ms` instead of
    /// the process-default scheduler's configured value.
    pub fn cancel_slice_ms(mut self, ms: u64) -> Select {
        self.cancel_slice_ms = ms.max(1);
        self
    }

    /// Add a receive clause. Returns its index and a slot to read the
    /// received value from once this clause wins.
    pub fn recv<T: Send + 'static>(&mut self, rx: &Receiver<T>) -> (usize, RecvSlot<T>) {
        let cell = Arc::new(Mutex::new(None));
        let idx = self.clauses.len();
        self.clauses.push(Box::new(RecvClauseImpl {
            rx: rx.clone(),
            cell: cell.clone(),
            waiter: None,
        }));
        (idx, RecvSlot(cell))
    }

    /// Add a send clause offering `value`. Returns its index.
    pub fn send<T: Send + 'static>(&mut self, tx: &Sender<T>, value: T) -> usize {
        let idx = self.clauses.len();
        self.clauses.push(Box::new(SendClauseImpl {
            tx: tx.clone(),
            value: Some(value),
            waiter: None,
        }));
        idx
    }

    pub fn wait(&mut self, timeout_ms: i64) -> Result<usize> {
        self.wait_c(timeout_ms, None)
    }

    /// Run the 5-step algorithm (§4.9): register every clause, park if
    /// none was immediately ready, report the winner once one
    /// completes, and cancel the rest. `timeout_ms < 0` blocks
    /// indefinitely (subject to `cancel`); `timeout_ms == 0` never
    /// parks.
    pub fn wait_c(&mut self, timeout_ms: i64, cancel: Option<&CancellationToken>) -> Result<usize> {
        if self.clauses.is_empty() {
            return Err(Error::Invalid);
        }

        let select = Arc::new(SelectShared::new());
        let blocker = Blocker::current();

        let mut order: Vec<usize> = (0..self.clauses.len()).collect();
        if self.randomized {
            order.shuffle(&mut thread_rng());
        }

        // Step 1: register clauses in `order`. At most one can complete
        // immediately — the first one that does stops registration, so
        // no later clause is ever asked to complete a second, redundant
        // transfer out of the same call.
        let mut pending: Vec<(usize, Waiter)> = Vec::new();
        let mut immediate: Option<(usize, Result<()>)> = None;

        for &idx in &order {
            match self.clauses[idx].register(&select, idx, blocker.clone()) {
                Registration::Immediate(result) => {
                    immediate = Some((idx, result));
                    break;
                }
                Registration::Pending(waiter) => pending.push((idx, waiter)),
            }
        }

        if let Some((idx, result)) = immediate {
            self.cancel_pending(&pending, None);
            return result.map(|()| idx);
        }

        // Step 2: nothing ready yet.
        if timeout_ms == 0 {
            self.cancel_pending(&pending, None);
            return Err(Error::WouldBlock);
        }

        let deadline = Deadline::from_timeout_ms(timeout_ms);
        let cancel_slice = Duration::from_millis(self.cancel_slice_ms);

        loop {
            // Step 3/4: some channel completed a pending clause.
            if let Some(idx) = select.winner_index() {
                return self.finish(idx, &pending);
            }

            // Step 5: timeout or cancellation.
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    self.cancel_pending(&pending, None);
                    return Err(Error::Cancelled);
                }
            }
            if let Some(d) = deadline {
                if d.has_passed() {
                    self.cancel_pending(&pending, None);
                    return Err(Error::TimedOut);
                }
            }

            match next_wake_deadline(deadline, cancel.is_some(), cancel_slice) {
                Some(wake_at) => {
                    let handle = crate::timer::default_timer().schedule_at(wake_at, {
                        let blocker = blocker.clone();
                        Box::new(move || blocker.wake())
                    });
                    blocker.park();
                    handle.cancel();
                }
                None => blocker.park(),
            }
        }
    }

    fn finish(&mut self, winner_idx: usize, pending: &[(usize, Waiter)]) -> Result<usize> {
        let winner_waiter = pending
            .iter()
            .find(|(idx, _)| *idx == winner_idx)
            .map(|(_, waiter)| waiter.clone());
        self.cancel_pending(pending, Some(winner_idx));

        match winner_waiter.and_then(|w| w.outcome()) {
            Some(Outcome::Ok) => Ok(winner_idx),
            Some(Outcome::Closed) => Err(Error::Closed),
            _ => Err(Error::Cancelled),
        }
    }

    fn cancel_pending(&mut self, pending: &[(usize, Waiter)], except: Option<usize>) {
        for (idx, _) in pending {
            if Some(*idx) != except {
                self.clauses[*idx].cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{channel, ChannelKind};
    use std::thread;
    use std::time::Duration as StdDuration;

    #[test]
    fn immediate_recv_wins_without_parking() {
        let (tx, rx) = channel::<i32>(ChannelKind::Buffered(1));
        tx.send(7).unwrap();

        let mut sel = Select::new();
        let (idx, slot) = sel.recv(&rx);
        let winner = sel.wait(0).unwrap();
        assert_eq!(winner, idx);
        assert_eq!(slot.take(), Some(7));
    }

    #[test]
    fn first_registered_ready_clause_wins_ties() {
        let (tx_a, rx_a) = channel::<i32>(ChannelKind::Buffered(1));
        let (tx_b, rx_b) = channel::<i32>(ChannelKind::Buffered(1));
        tx_a.send(1).unwrap();
        tx_b.send(2).unwrap();

        let mut sel = Select::new();
        let (idx_a, slot_a) = sel.recv(&rx_a);
        let (_idx_b, _slot_b) = sel.recv(&rx_b);
        let winner = sel.wait(0).unwrap();
        assert_eq!(winner, idx_a);
        assert_eq!(slot_a.take(), Some(1));
        // The loser was never touched: its value is still there.
        assert_eq!(rx_b.try_recv(), Ok(2));
    }

    #[test]
    fn suspends_then_wakes_on_a_late_send() {
        let (tx, rx) = channel::<i32>(ChannelKind::Rendezvous);

        let mut sel = Select::new();
        let (idx, slot) = sel.recv(&rx);
        let handle = thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(20));
            tx.send(42).unwrap();
        });
        let winner = sel.wait(2_000).unwrap();
        assert_eq!(winner, idx);
        assert_eq!(slot.take(), Some(42));
        handle.join().unwrap();
    }

    #[test]
    fn send_clause_can_win_a_select() {
        let (tx, rx) = channel::<i32>(ChannelKind::Rendezvous);

        let mut sel = Select::new();
        let idx = sel.send(&tx, 99);
        let handle = thread::spawn(move || rx.recv().unwrap());
        let winner = sel.wait(2_000).unwrap();
        assert_eq!(winner, idx);
        assert_eq!(handle.join().unwrap(), 99);
    }

    #[test]
    fn times_out_when_nothing_becomes_ready() {
        let (_tx, rx) = channel::<i32>(ChannelKind::Rendezvous);
        let mut sel = Select::new();
        sel.recv(&rx);
        assert_eq!(sel.wait(20), Err(Error::TimedOut));
    }

    #[test]
    fn cancellation_wakes_a_parked_select() {
        let (_tx, rx) = channel::<i32>(ChannelKind::Rendezvous);
        let token = CancellationToken::new();
        let t2 = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(20));
            t2.cancel();
        });

        let mut sel = Select::new();
        sel.recv(&rx);
        assert_eq!(sel.wait_c(5_000, Some(&token)), Err(Error::Cancelled));
        handle.join().unwrap();
    }

    #[test]
    fn custom_cancel_slice_ms_gates_how_soon_cancellation_is_observed() {
        let (_tx, rx) = channel::<i32>(ChannelKind::Rendezvous);
        let token = CancellationToken::new();
        let t2 = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(10));
            t2.cancel();
        });

        let mut sel = Select::new().cancel_slice_ms(200);
        sel.recv(&rx);
        let start = std::time::Instant::now();
        assert_eq!(sel.wait_c(-1, Some(&token)), Err(Error::Cancelled));
        let elapsed = start.elapsed();
        assert!(
            elapsed >= StdDuration::from_millis(150),
            "expected the configured 200ms cancel slice to gate detection, took {elapsed:?}"
        );
        handle.join().unwrap();
    }

    #[test]
    fn a_closed_channel_clause_reports_closed() {
        let (tx, rx) = channel::<i32>(ChannelKind::Rendezvous);
        let handle = thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(20));
            tx.close();
        });

        let mut sel = Select::new();
        sel.recv(&rx);
        assert_eq!(sel.wait(2_000), Err(Error::Closed));
        handle.join().unwrap();
    }

    #[test]
    fn concurrent_completions_pick_exactly_one_winner() {
        // Two rendezvous channels, both parked on by the same select;
        // two other threads race to complete them at (nearly) the same
        // instant. Exactly one of the two sends should be the winner
        // the select reports, and the other sender should still observe
        // its own send complete separately (the loser clause is simply
        // not the one `wait` reports, not a transfer that never
        // happened — the loser's channel still has a live receiver
        // elsewhere in a real program; here we just prove only one
        // winner index comes back and only one slot is filled).
        let (tx_a, rx_a) = channel::<i32>(ChannelKind::Rendezvous);
        let (tx_b, rx_b) = channel::<i32>(ChannelKind::Rendezvous);

        let mut sel = Select::new();
        let (idx_a, slot_a) = sel.recv(&rx_a);
        let (idx_b, slot_b) = sel.recv(&rx_b);

        let ha = thread::spawn(move || tx_a.send(1));
        let hb = thread::spawn(move || tx_b.send(2));

        let winner = sel.wait(2_000).unwrap();
        assert!(winner == idx_a || winner == idx_b);
        if winner == idx_a {
            assert_eq!(slot_a.take(), Some(1));
            assert!(slot_b.take().is_none());
        } else {
            assert_eq!(slot_b.take(), Some(2));
            assert!(slot_a.take().is_none());
        }

        // The non-winning send is still sitting in the channel (a
        // rendezvous sender that lost the race keeps waiting; here we
        // just drain it so the spawned thread can finish).
        if winner == idx_a {
            assert_eq!(rx_b.recv().unwrap(), 2);
        } else {
            assert_eq!(rx_a.recv().unwrap(), 1);
        }

        ha.join().unwrap().ok();
        hb.join().unwrap().ok();
    }
}
