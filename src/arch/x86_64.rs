//! x86_64 System V register save area and call-frame setup.
//!
//! The actual register save/restore lives in `src/asm/x86_64/swap.S`,
//! compiled and linked by `build.rs`. This module only owns the layout
//! `Registers` must agree with that assembly on (a single `u64`: the
//! saved stack pointer) and the logic that primes a fresh stack so its
//! first `swap` lands in [`coroutine_trampoline`].

/// Saved machine state for a suspended coroutine.
///
/// Only the stack pointer is kept in Rust-visible state; the six
/// callee-saved GPRs live on the coroutine's own stack between the push
/// in `swap_context` and the matching pop on resume.
#[derive(Debug)]
#[repr(C)]
pub struct Registers {
    rsp: u64,
}

impl Registers {
    pub const fn empty() -> Registers {
        Registers { rsp: 0 }
    }
}

extern "C" {
    // Defined in src/asm/x86_64/swap.S.
    fn swap_context(prev_rsp_slot: *mut u64, next_rsp: u64);
}

/// Switch the executing context from `from` to `to`.
///
/// # Safety
/// `to` must refer to a context previously produced by [`initialize_call_frame`]
/// (or a prior `swap` into the same stack) that is not currently running on
/// any other OS thread.
pub unsafe fn swap(from: &mut Registers, to: &Registers) {
    swap_context(&mut from.rsp as *mut u64, to.rsp);
}

/// Build the initial register state for a brand-new coroutine stack.
///
/// `stack_top` must be the (non-inclusive) high end of the usable stack
/// region, 16-byte aligned or better; this function takes care of the
/// System-V call-frame alignment requirement (`rsp % 16 == 8` at the
/// entry of the first function reached after `ret`).
///
/// `trampoline_arg` is threaded through to [`coroutine_trampoline`] via
/// `r12` and ends up as the sole argument to `coroutine_entry_trampoline`
/// (see `src/coroutine/mod.rs`).
pub unsafe fn initialize_call_frame(stack_top: *mut u8, trampoline_arg: *mut u8) -> Registers {
    extern "C" {
        fn coroutine_trampoline();
    }

    // 7 saved u64 slots: r15, r14, r13, r12, rbx, rbp, return-address.
    const FRAME_WORDS: usize = 7;

    let top = (stack_top as usize) & !0xF; // 16-byte align.
    let top = top - 8; // rsp%16==8 at the trampoline's entry, matching a `call`-site.
    let base = (top - FRAME_WORDS * 8) as *mut u64;

    // Layout, low to high address: r15, r14, r13, r12, rbx, rbp, retaddr.
    std::ptr::write(base.add(0), 0); // r15
    std::ptr::write(base.add(1), 0); // r14
    std::ptr::write(base.add(2), 0); // r13
    std::ptr::write(base.add(3), trampoline_arg as u64); // r12
    std::ptr::write(base.add(4), 0); // rbx
    std::ptr::write(base.add(5), 0); // rbp
    std::ptr::write(base.add(6), coroutine_trampoline as usize as u64); // return address

    Registers { rsp: base as u64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registers_have_null_rsp() {
        assert_eq!(Registers::empty().rsp, 0);
    }
}
