//! `coro_rt` — a user-space M:N coroutine runtime with a work-stealing
//! scheduler and message-passing channels.
//!
//! The runtime is ten components (C1–C10), each in its own module:
//! a platform port (`platform`, `arch`), the coroutine primitive
//! (`coroutine`), the waiter token shared by channels and select
//! (`waiter`), a cancellation token (`cancel`), a timer service
//! (`timer`), the work-stealing scheduler (`scheduler`), the channel
//! engine (`channel`), the zero-copy descriptor backend (`zerocopy`),
//! the select multiplexer (`select`), and metrics (`metrics`). `config`
//! and `error` carry the tunables and the error taxonomy every other
//! module shares; `wait` and `blocker` factor out the park/wake loop
//! the channel and select code would otherwise duplicate.
//!
//! Most programs only need three entry points:
//!
//! ```no_run
//! use coro_rt::channel::{channel, ChannelKind};
//! use coro_rt::scheduler::Scheduler;
//! use coro_rt::config::SchedulerConfig;
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default());
//! let handle = scheduler.handle();
//! let (tx, rx) = channel::<i32>(ChannelKind::Rendezvous);
//!
//! handle.spawn(move || {
//!     tx.send(7).unwrap();
//! });
//! handle.spawn(move || {
//!     assert_eq!(rx.recv().unwrap(), 7);
//! });
//!
//! scheduler.drain(1_000).unwrap();
//! scheduler.shutdown();
//! ```

pub mod arch;
pub mod blocker;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod coroutine;
pub mod error;
pub mod metrics;
pub mod platform;
pub mod scheduler;
pub mod select;
pub mod timer;
pub(crate) mod wait;
pub mod waiter;
pub mod zerocopy;

#[cfg(test)]
mod tests;

pub use cancel::CancellationToken;
pub use channel::{channel, ChannelKind, Receiver, Sender};
pub use error::{Error, Result};
pub use scheduler::{Scheduler, SchedulerHandle};
pub use select::Select;

/// A generic channel of the given [`ChannelKind`]. Exists only as a
/// type alias so a type signature can write `Channel<T>` instead of
/// naming both halves — construction is always through [`channel`],
/// which returns the `(Sender<T>, Receiver<T>)` pair.
pub type Channel<T> = (Sender<T>, Receiver<T>);
