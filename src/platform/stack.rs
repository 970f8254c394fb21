//! Guard-paged private stacks (§4.1, §4.2 invariants, §8 property 8).
//!
//! Grounded in the teacher's `stack_protected.rs`: map an anonymous,
//! page-rounded region, then `mprotect` its lowest page `PROT_NONE` so a
//! downward-growing stack that overflows its usable region faults
//! deterministically instead of corrupting a neighboring allocation.
//! The teacher delegated the `mmap` half to the (now unmaintained)
//! `mmap` crate; this module owns both halves directly through `libc`.

use std::io;
use std::ptr;

#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("mmap failed while allocating a {requested_bytes}-byte stack: {source}")]
    Map {
        requested_bytes: usize,
        #[source]
        source: io::Error,
    },
    #[error("mprotect failed while guarding the low page of a stack: {source}")]
    Guard {
        #[source]
        source: io::Error,
    },
}

fn page_size() -> usize {
    // SAFETY: sysconf with _SC_PAGESIZE never fails on a sane host.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// An owned, guard-paged stack mapping.
///
/// `start()` is the guard page's address (the lowest page of the
/// mapping, per §4.2's invariant that it must be the lowest page so a
/// downward-growing stack faults deterministically); `end()` is one byte
/// past the high end, i.e. where a fresh stack pointer should be seeded.
#[derive(Debug)]
pub struct GuardedStack {
    base: *mut libc::c_void,
    mapped_len: usize,
    usable_len: usize,
    page_size: usize,
}

unsafe impl Send for GuardedStack {}

impl GuardedStack {
    /// Allocate a stack with at least `requested_bytes` of usable space,
    /// rounded up to a whole number of pages, plus one extra guard page.
    pub fn new(requested_bytes: usize) -> Result<GuardedStack, StackError> {
        let page_size = page_size();
        let usable_len = round_up(requested_bytes.max(page_size), page_size);
        let mapped_len = usable_len + page_size;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapped_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };

        if base == libc::MAP_FAILED {
            return Err(StackError::Map {
                requested_bytes,
                source: io::Error::last_os_error(),
            });
        }

        // The stack grows from the high end of the mapping downward, so
        // the guard page sits at the *low* end: base..base+page_size.
        let rc = unsafe { libc::mprotect(base, page_size, libc::PROT_NONE) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::munmap(base, mapped_len);
            }
            return Err(StackError::Guard { source: err });
        }

        Ok(GuardedStack {
            base,
            mapped_len,
            usable_len,
            page_size,
        })
    }

    /// Low end of the *usable* (non-guard) region.
    pub fn start(&self) -> *mut u8 {
        unsafe { (self.base as *mut u8).add(self.page_size) }
    }

    /// One byte past the high end of the mapping; the initial stack
    /// pointer for a freshly created coroutine.
    pub fn end(&self) -> *mut u8 {
        unsafe { (self.base as *mut u8).add(self.mapped_len) }
    }

    pub fn usable_len(&self) -> usize {
        self.usable_len
    }
}

impl Drop for GuardedStack {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base, self.mapped_len);
        }
    }
}

fn round_up(value: usize, multiple: usize) -> usize {
    (value + multiple - 1) / multiple * multiple
}
