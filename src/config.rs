//! Tunables (§6), overridable by environment variable at process-default
//! scheduler creation, mirroring the teacher's `Options`/`Builder` pair
//! (default stack size off `Options::default`, overridden per-spawn by
//! `Builder::stack_size`).

use std::env;

pub const DEFAULT_CANCEL_SLICE_MS: u64 = 5;
pub const DEFAULT_STEAL_SCAN_MAX: usize = 4;
pub const DEFAULT_UNBOUNDED_INIT_CAP: usize = 32;
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Scheduler-wide tunables. Constructed once, at process-default
/// scheduler creation or at an explicit `Scheduler::with_config`.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub worker_threads: usize,
    pub cancel_slice_ms: u64,
    pub steal_scan_max: usize,
    pub default_stack_bytes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> SchedulerConfig {
        SchedulerConfig {
            worker_threads: env_usize("CORO_RT_WORKERS", num_cpus_hint()),
            cancel_slice_ms: env_u64("CORO_RT_CANCEL_SLICE_MS", DEFAULT_CANCEL_SLICE_MS),
            steal_scan_max: env_usize("CORO_RT_STEAL_SCAN_MAX", DEFAULT_STEAL_SCAN_MAX),
            default_stack_bytes: env_usize("CORO_RT_STACK_KB", DEFAULT_STACK_SIZE / 1024) * 1024,
        }
    }
}

impl SchedulerConfig {
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n.max(1);
        self
    }

    pub fn cancel_slice_ms(mut self, ms: u64) -> Self {
        self.cancel_slice_ms = ms.max(1);
        self
    }

    pub fn steal_scan_max(mut self, n: usize) -> Self {
        self.steal_scan_max = n.max(1);
        self
    }

    pub fn default_stack_bytes(mut self, n: usize) -> Self {
        self.default_stack_bytes = n;
        self
    }
}

// Avoids a hard dependency on `num_cpus` from library code; the dev-dependency
// is reserved for demos/tests exercising "one worker per core" explicitly.
fn num_cpus_hint() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnboundedConfig {
    pub initial_segment_capacity: usize,
}

impl UnboundedConfig {
    pub fn new() -> Self {
        UnboundedConfig {
            initial_segment_capacity: env_usize(
                "CORO_RT_UNBOUNDED_INIT_CAP",
                DEFAULT_UNBOUNDED_INIT_CAP,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_nonzero() {
        let cfg = SchedulerConfig::default();
        assert!(cfg.worker_threads >= 1);
        assert!(cfg.cancel_slice_ms >= 1);
        assert!(cfg.steal_scan_max >= 1);
        assert!(cfg.default_stack_bytes >= 4096);
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = SchedulerConfig::default().worker_threads(2).cancel_slice_ms(10);
        assert_eq!(cfg.worker_threads, 2);
        assert_eq!(cfg.cancel_slice_ms, 10);
    }
}
