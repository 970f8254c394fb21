//! Shared blocking-wait loop for a published [`Waiter`] token.
//!
//! Every bounded or cancellable channel operation (§4.7) and the select
//! multiplexer (§4.9) reduce to the same shape once a waiter token is
//! linked into a queue: park, wake on either completion, a cancellation
//! poll slice, or a timeout, and loop on spurious wakeups until the
//! token reaches a terminal status. Factored out here instead of
//! duplicated in `channel` and `select`, grounded in the teacher's
//! condvar `wait_timeout` retry loops (`sync/mpsc.rs`) generalized to
//! cooperate with [`crate::cancel::CancellationToken`] and the process
//! timer instead of a plain OS condvar.

use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::platform::time::Deadline;
use crate::timer::default_timer;
use crate::waiter::{Outcome, Waiter};

/// Park `waiter`'s owner until its token reaches a terminal status, a
/// caller-supplied `deadline` passes, or `cancel` fires. Returns the
/// outcome the token (or this loop itself) settled on.
///
/// `unlink` is called at most once, exactly when this loop itself wins
/// the terminal transition (timeout or cancellation) via `try_cancel`;
/// it must remove the token from whatever waiter queue it sits on under
/// that channel's lock. When the channel's own completion path wins the
/// race instead, `unlink` is never called — the completer already
/// popped the token off the queue before claiming it.
pub(crate) fn wait_for_terminal(
    waiter: &Waiter,
    deadline: Option<Deadline>,
    cancel: Option<&CancellationToken>,
    cancel_slice: Duration,
    mut unlink: impl FnMut(),
) -> Outcome {
    loop {
        if let Some(outcome) = waiter.outcome() {
            return outcome;
        }

        if let Some(cancel) = cancel {
            if cancel.is_cancelled() {
                if waiter.try_cancel() {
                    unlink();
                }
                return waiter.outcome().unwrap_or(Outcome::Cancelled);
            }
        }
        if let Some(d) = deadline {
            if d.has_passed() {
                if waiter.try_cancel() {
                    unlink();
                    return Outcome::TimedOut;
                }
                return waiter.outcome().unwrap_or(Outcome::TimedOut);
            }
        }

        let next_wake = next_wake_deadline(deadline, cancel.is_some(), cancel_slice);
        match next_wake {
            Some(wake_at) => {
                let handle = default_timer().schedule_at(wake_at, {
                    let blocker = waiter.blocker().clone();
                    Box::new(move || blocker.wake())
                });
                waiter.blocker().park();
                handle.cancel();
            }
            None => waiter.blocker().park(),
        }
    }
}

pub(crate) fn next_wake_deadline(
    deadline: Option<Deadline>,
    has_cancel: bool,
    cancel_slice: Duration,
) -> Option<Deadline> {
    let slice_deadline = if has_cancel {
        Some(Deadline::from_nanos(
            crate::platform::time::monotonic_now_ns() + cancel_slice.as_nanos() as u64,
        ))
    } else {
        None
    };

    match (deadline, slice_deadline) {
        (Some(a), Some(b)) => Some(if a.as_nanos() < b.as_nanos() { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocker::Blocker;
    use crate::waiter::{Payload, Role};
    use std::thread;

    #[test]
    fn returns_immediately_once_claimed_before_waiting() {
        let w = Waiter::new(Blocker::current(), Role::Receiver, Payload::Empty);
        w.mark_enqueued();
        assert!(w.try_claim(Outcome::Ok));
        let outcome = wait_for_terminal(&w, None, None, Duration::from_millis(5), || {});
        assert_eq!(outcome, Outcome::Ok);
    }

    #[test]
    fn times_out_when_deadline_passes_with_no_completion() {
        let w = Waiter::new(Blocker::current(), Role::Receiver, Payload::Empty);
        w.mark_enqueued();
        let deadline = Deadline::from_timeout_ms(20).unwrap();
        let mut unlinked = false;
        let outcome = wait_for_terminal(&w, Some(deadline), None, Duration::from_millis(5), || {
            unlinked = true;
        });
        assert_eq!(outcome, Outcome::TimedOut);
        assert!(unlinked);
    }

    #[test]
    fn cancellation_wins_even_with_a_far_off_deadline() {
        let w = Waiter::new(Blocker::current(), Role::Receiver, Payload::Empty);
        w.mark_enqueued();
        let token = CancellationToken::new();
        let t2 = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            t2.cancel();
        });
        let deadline = Deadline::from_timeout_ms(5_000).unwrap();
        let outcome = wait_for_terminal(
            &w,
            Some(deadline),
            Some(&token),
            Duration::from_millis(5),
            || {},
        );
        assert_eq!(outcome, Outcome::Cancelled);
    }

    #[test]
    fn woken_by_completion_from_another_thread_observes_claimed() {
        let w = Waiter::new(Blocker::current(), Role::Receiver, Payload::Empty);
        w.mark_enqueued();
        let w2 = w.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            assert!(w2.try_claim(Outcome::Ok));
            w2.wake();
        });
        let outcome = wait_for_terminal(&w, None, None, Duration::from_millis(5), || {});
        assert_eq!(outcome, Outcome::Ok);
    }
}
