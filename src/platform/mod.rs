//! C1 — platform port.
//!
//! Everything the rest of the runtime needs from the host OS funnels
//! through this module: a monotonic clock, mutex/condvar primitives with
//! a deadline-based wait, and a guard-paged stack allocator. No other
//! module reaches for `libc` or `std::time` directly.

pub mod stack;
pub mod sync;
pub mod time;

pub use self::stack::{GuardedStack, StackError};
pub use self::sync::{Mutex, MutexGuard, WaitTimeoutResult};
pub use self::time::{monotonic_now_ns, Deadline};
