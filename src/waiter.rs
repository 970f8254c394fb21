//! C3 — the waiter token.
//!
//! A waiter token is constructed on a blocking caller's own stack frame
//! immediately before it links into a channel's waiter queue and parks.
//! Completion and cancellation race to claim it exactly once via CAS;
//! callers wrap the blocking call in a scope guard so every exit path —
//! including a panic unwinding through it — unlinks the token from
//! whatever queue it sits on and releases the blocker it holds.
//!
//! Grounded in the teacher's `sync::mpsc::Blocker`/`WaitToken` pair,
//! generalized here into the single state machine the whole channel
//! engine (C7) and the select multiplexer (C9) share.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::blocker::Blocker;
use crate::zerocopy::Descriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Init = 0,
    Enqueued = 1,
    Claimed = 2,
    Cancelled = 3,
}

impl Status {
    fn from_u8(v: u8) -> Status {
        match v {
            0 => Status::Init,
            1 => Status::Enqueued,
            2 => Status::Claimed,
            _ => Status::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
    SelectClause,
}

/// What a claimed waiter ends up carrying: for a sender waiter, the
/// value it offered is taken by the claimer; for a receiver waiter, the
/// claimer deposits a value here.
#[derive(Debug)]
pub enum Payload {
    Bytes(Vec<u8>),
    Descriptor(Descriptor),
    Empty,
}

/// Result recorded in a token at its terminal transition, read by the
/// blocked owner once it wakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Closed,
    Cancelled,
    TimedOut,
}

struct Inner {
    status: AtomicU8,
    blocker: Blocker,
    role: Role,
    select_clause: Option<(usize, Arc<crate::select::SelectShared>)>,
    payload: std::sync::Mutex<Option<Payload>>,
    outcome: std::sync::Mutex<Option<Outcome>>,
}

/// A shared handle to one waiter token. Cloned between the owner (who
/// parks) and whichever side eventually completes or cancels it.
#[derive(Clone)]
pub struct Waiter(Arc<Inner>);

impl Waiter {
    pub fn new(blocker: Blocker, role: Role, payload: Payload) -> Waiter {
        Waiter(Arc::new(Inner {
            status: AtomicU8::new(Status::Init as u8),
            blocker,
            role,
            select_clause: None,
            payload: std::sync::Mutex::new(Some(payload)),
            outcome: std::sync::Mutex::new(None),
        }))
    }

    pub fn new_select_clause(
        blocker: Blocker,
        clause_idx: usize,
        select: Arc<crate::select::SelectShared>,
        payload: Payload,
    ) -> Waiter {
        Waiter(Arc::new(Inner {
            status: AtomicU8::new(Status::Init as u8),
            blocker,
            role: Role::SelectClause,
            select_clause: Some((clause_idx, select)),
            payload: std::sync::Mutex::new(Some(payload)),
            outcome: std::sync::Mutex::new(None),
        }))
    }

    pub fn role(&self) -> Role {
        self.0.role
    }

    pub fn blocker(&self) -> &Blocker {
        &self.0.blocker
    }

    /// Wake whatever this token's owner is blocked on (coroutine unpark
    /// or thread condvar notify, see [`crate::blocker::Blocker`]).
    pub fn wake(&self) {
        self.0.blocker.wake();
    }

    pub fn select_clause(&self) -> Option<(usize, &Arc<crate::select::SelectShared>)> {
        self.0.select_clause.as_ref().map(|(i, s)| (*i, s))
    }

    pub fn status(&self) -> Status {
        Status::from_u8(self.0.status.load(Ordering::Acquire))
    }

    /// Mark this token ENQUEUED: called by the owner right after linking
    /// it into a channel's waiter queue, under that channel's lock.
    pub fn mark_enqueued(&self) {
        self.0
            .status
            .store(Status::Enqueued as u8, Ordering::Release);
    }

    /// Take the payload the waiter was constructed with (the sender's
    /// offered value, or an empty receiver slot).
    pub fn take_payload(&self) -> Option<Payload> {
        self.0.payload.lock().unwrap().take()
    }

    pub fn deposit_payload(&self, payload: Payload) {
        *self.0.payload.lock().unwrap() = Some(payload);
    }

    pub fn outcome(&self) -> Option<Outcome> {
        *self.0.outcome.lock().unwrap()
    }

    /// Single coordination point for completion: ENQUEUED → CLAIMED.
    /// Returns `true` if this call won the race.
    ///
    /// A select-clause token (§4.9) adds a second, cross-clause race on
    /// top of its own token CAS: winning the token only reserves this
    /// one channel's half of the hand-off, so a select-tagged waiter
    /// also has to win its [`crate::select::SelectShared`] before the
    /// claim counts. Losing that second race still consumes the token
    /// (it cannot be un-claimed) but is reported back as a loss so the
    /// caller treats it exactly like a stale/already-claimed entry and
    /// moves on to the next one.
    #[must_use]
    pub fn try_claim(&self, outcome: Outcome) -> bool {
        let won_token = self
            .0
            .status
            .compare_exchange(
                Status::Enqueued as u8,
                Status::Claimed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !won_token {
            return false;
        }
        if let Some((clause_idx, select)) = &self.0.select_clause {
            if !select.try_claim(*clause_idx) {
                *self.0.outcome.lock().unwrap() = Some(Outcome::Cancelled);
                return false;
            }
        }
        *self.0.outcome.lock().unwrap() = Some(outcome);
        true
    }

    /// Single coordination point for cancellation: ENQUEUED → CANCELLED.
    /// Returns `true` if this call won the race (and must therefore
    /// unlink the token from whatever queue it sits on).
    #[must_use]
    pub fn try_cancel(&self) -> bool {
        let won = self
            .0
            .status
            .compare_exchange(
                Status::Enqueued as u8,
                Status::Cancelled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            *self.0.outcome.lock().unwrap() = Some(Outcome::Cancelled);
        }
        won
    }
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Waiter) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Waiter {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocker::Blocker;

    fn dummy_blocker() -> Blocker {
        Blocker::current()
    }

    #[test]
    fn claim_wins_exactly_once() {
        let w = Waiter::new(dummy_blocker(), Role::Receiver, Payload::Empty);
        w.mark_enqueued();
        assert!(w.try_claim(Outcome::Ok));
        assert!(!w.try_claim(Outcome::Ok));
        assert_eq!(w.status(), Status::Claimed);
        assert_eq!(w.outcome(), Some(Outcome::Ok));
    }

    #[test]
    fn cancel_loses_once_claimed() {
        let w = Waiter::new(dummy_blocker(), Role::Sender, Payload::Empty);
        w.mark_enqueued();
        assert!(w.try_claim(Outcome::Ok));
        assert!(!w.try_cancel());
    }

    #[test]
    fn cancel_wins_when_nothing_claimed_it_first() {
        let w = Waiter::new(dummy_blocker(), Role::Sender, Payload::Empty);
        w.mark_enqueued();
        assert!(w.try_cancel());
        assert!(!w.try_claim(Outcome::Ok));
        assert_eq!(w.outcome(), Some(Outcome::Cancelled));
    }
}
