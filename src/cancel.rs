//! C4 — cancellation tokens.
//!
//! A flag with condvar-style wake-up and parent→child propagation. The
//! teacher has no direct analogue (the 2015-era coroutine crate predates
//! structured cancellation entirely), so this module is grounded instead
//! in the platform port's own `Mutex`/`Condvar` pair (`src/platform/sync.rs`)
//! plus the general shared-flag pattern used throughout the teacher's
//! `sync` module for close/shutdown flags.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::platform::time::Deadline;

struct Inner {
    triggered: AtomicBool,
    lock: Mutex<()>,
    condvar: std::sync::Condvar,
    children: Mutex<Vec<Weak<Inner>>>,
}

/// A cancellation token. Cloning shares the same underlying flag;
/// `child()` creates a new, independently triggerable token that is
/// also triggered whenever this one (or any of its ancestors) is.
#[derive(Clone)]
pub struct CancellationToken(Arc<Inner>);

impl Default for CancellationToken {
    fn default() -> CancellationToken {
        CancellationToken::new()
    }
}

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken(Arc::new(Inner {
            triggered: AtomicBool::new(false),
            lock: Mutex::new(()),
            condvar: std::sync::Condvar::new(),
            children: Mutex::new(Vec::new()),
        }))
    }

    /// Create a child token. Triggering `self` (directly, or via one of
    /// its own ancestors) triggers every live child transitively;
    /// triggering a child never propagates upward.
    pub fn child(&self) -> CancellationToken {
        let child = CancellationToken::new();
        self.0.children.lock().unwrap().push(Arc::downgrade(&child.0));
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.triggered.load(Ordering::Acquire)
    }

    /// Trigger this token: sets the flag, wakes any thread blocked in
    /// `wait_for`/`poll_wait`, and propagates to every live child.
    pub fn cancel(&self) {
        if self.0.triggered.swap(true, Ordering::AcqRel) {
            return; // Already triggered; propagation already happened once.
        }
        {
            let _guard = self.0.lock.lock().unwrap();
        }
        self.0.condvar.notify_all();

        let mut children = self.0.children.lock().unwrap();
        children.retain(|weak| {
            if let Some(child) = weak.upgrade() {
                CancellationToken(child).cancel();
                true
            } else {
                false
            }
        });
    }

    /// Block the *calling OS thread* until this token fires or `slice`
    /// elapses, whichever comes first. Used by channel ops to implement
    /// the `_c` cancellable variants: loop calling this between bounded
    /// condvar waits on the channel itself so cancellation is observed
    /// within one poll slice even while blocked on unrelated state.
    pub fn poll_wait(&self, slice: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let guard = self.0.lock.lock().unwrap();
        let (_guard, _result) = self
            .0
            .condvar
            .wait_timeout(guard, slice)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.is_cancelled()
    }

    /// Repeatedly poll in `slice`-sized steps until triggered or
    /// `deadline` passes. Returns `true` if cancellation fired first.
    pub fn wait_until_cancelled_or(&self, deadline: Option<Deadline>, slice: Duration) -> bool {
        loop {
            if self.is_cancelled() {
                return true;
            }
            if let Some(d) = deadline {
                if d.has_passed() {
                    return false;
                }
                let remaining = d.remaining();
                if self.poll_wait(slice.min(remaining)) {
                    return true;
                }
            } else if self.poll_wait(slice) {
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_observed_immediately() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_propagates_to_existing_children() {
        let parent = CancellationToken::new();
        let child = parent.child();
        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn child_created_after_parent_cancelled_is_born_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel();
        let child = parent.child();
        assert!(child.is_cancelled());
    }

    #[test]
    fn cancel_does_not_propagate_upward() {
        let parent = CancellationToken::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn poll_wait_returns_promptly_once_triggered_from_another_thread() {
        let token = CancellationToken::new();
        let t2 = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            t2.cancel();
        });
        let fired = token.wait_until_cancelled_or(None, Duration::from_millis(5));
        assert!(fired);
        handle.join().unwrap();
    }
}
