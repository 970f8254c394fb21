//! Per-architecture register-save context switch.
//!
//! This is the only part of the runtime that needs architecture-specific
//! assembly; everything above `arch` talks to the small [`Registers`] /
//! `swap` surface only.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use self::x86_64::{swap, Registers, initialize_call_frame};
    } else {
        compile_error!(
            "coro-rt's context switch is implemented for x86_64 only; \
             src/arch/x86_64.rs is the template for adding another architecture"
        );
    }
}
