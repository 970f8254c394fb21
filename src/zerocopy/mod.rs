//! C8 — the zero-copy descriptor backend.
//!
//! A descriptor `{addr,len,region_id,offset,flags}` moves through a
//! small vtable-based backend registry without ever copying the bytes
//! it points to; ownership of the payload always stays with whichever
//! caller registered the region. Grounded in the teacher's `Options`
//! builder-and-registry idiom (a global, lazily-populated table keyed by
//! name, handed out as small `Copy` ids) generalized from "stack size
//! presets" to "zero-copy backend implementations."

pub mod region;
pub mod zref;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};

bitflags::bitflags! {
    /// Capability bits (§6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        const ZERO_COPY = 0b01;
        const POINTER_DESCRIPTOR = 0b10;
    }
}

/// `{addr, len, region_id, offset, flags}` (§3). The runtime never reads
/// or frees the bytes at `addr`; it only moves this small struct between
/// a sender and a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub addr: usize,
    pub len: usize,
    pub region_id: u64,
    pub offset: usize,
    pub flags: u32,
}

/// Optional format-policy match mask checked at send time in strict mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatPolicy {
    pub dtype: u32,
    pub elem_bits: u32,
    pub alignment: u32,
    pub stride: u32,
    pub dims: u32,
}

impl FormatPolicy {
    pub fn matches(&self, other: &FormatPolicy) -> bool {
        self == other
    }
}

/// A zero-copy backend implementation: attach/detach lifecycle plus the
/// four transfer operations a channel delegates to once bound.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called when a channel enables this backend; returns opaque
    /// per-channel state threaded back into every other call.
    fn attach(&self, opts: &BackendOptions) -> Box<dyn BackendState>;
}

/// Per-channel state owned by a backend between `attach` and `detach`.
///
/// "Counters are updated via shared helpers so every backend reports
/// identical statistics" (§4.8): the channel engine always bumps its own
/// `zref_sent`/`zref_received`/`zref_aborted_close` counters itself, and
/// calls these hooks afterwards purely so a backend may mirror them into
/// backend-private bookkeeping if it keeps any. Default no-ops: most
/// backends have nothing of their own to track.
pub trait BackendState: Send + Sync {
    fn detach(&self);

    fn on_sent(&self) {}
    fn on_received(&self) {}
    fn on_aborted_close(&self) {}
}

#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    pub strict_format: bool,
    pub policy: Option<FormatPolicy>,
}

struct Registry {
    backends: RwLock<HashMap<&'static str, Arc<dyn Backend>>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        let reg = Registry {
            backends: RwLock::new(HashMap::new()),
        };
        reg.backends
            .write()
            .unwrap()
            .insert("zref", Arc::new(zref::ZrefBackend::new()));
        reg
    })
}

/// Register a custom backend, making it selectable by name on a channel.
/// The default in-tree "zref" backend is always pre-registered.
pub fn register_backend(backend: Arc<dyn Backend>) {
    registry()
        .backends
        .write()
        .unwrap()
        .insert(backend.name(), backend);
}

pub fn lookup_backend(name: &str) -> Result<Arc<dyn Backend>> {
    registry()
        .backends
        .read()
        .unwrap()
        .get(name)
        .cloned()
        .ok_or(Error::NotSupported)
}

pub(crate) fn default_config() -> SchedulerConfig {
    SchedulerConfig::default()
}

static DEFAULT_REGIONS: OnceLock<region::RegionTable> = OnceLock::new();

/// The process-wide region table backing the free-function
/// `region_*` API (§4.8). An embedder that wants an isolated table
/// constructs its own [`region::RegionTable`] directly instead.
pub fn default_regions() -> &'static region::RegionTable {
    DEFAULT_REGIONS.get_or_init(region::RegionTable::new)
}

pub fn region_register(base: usize, len: usize, metadata: Option<region::RegionMetadata>) -> u64 {
    default_regions().register(base, len, metadata.unwrap_or_default())
}

pub fn region_incref(id: u64) -> bool {
    default_regions().incref(id)
}

pub fn region_decref(id: u64) {
    default_regions().decref(id)
}

/// Blocks until `id`'s refcount reaches zero, then removes it.
pub fn region_deregister(id: u64) {
    default_regions().deregister(id)
}

pub fn region_bounds(id: u64) -> Option<(usize, usize)> {
    default_regions().bounds(id)
}

pub fn region_metadata(id: u64) -> Option<region::RegionMetadata> {
    default_regions().metadata(id)
}
