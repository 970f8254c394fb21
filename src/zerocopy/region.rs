//! Region table: `{base, len, refcount, deregistering, metadata}` (§3).
//!
//! A region is a caller-owned memory extent the runtime never reads or
//! frees; descriptors reference it by id. `region_deregister` blocks
//! until the refcount drops to zero so an in-flight descriptor can never
//! outlive the memory it points at.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::platform::sync::Condvar;

/// Optional descriptor-format metadata carried alongside a region,
/// checked against a channel's `FormatPolicy` in strict mode.
#[derive(Debug, Clone, Default)]
pub struct RegionMetadata {
    pub dtype: u32,
    pub elem_bits: u32,
    pub alignment: u32,
    pub stride: u32,
    pub dims: Vec<usize>,
}

struct RegionEntry {
    base: usize,
    len: usize,
    refcount: AtomicU64,
    deregistering: AtomicBool,
    metadata: RegionMetadata,
}

/// Owns the mapping from region id to its entry. One instance lives on
/// the process-default zero-copy backend state; embedders wanting an
/// isolated table construct their own.
pub struct RegionTable {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Arc<RegionEntry>>>,
    drained: Condvar,
}

impl Default for RegionTable {
    fn default() -> RegionTable {
        RegionTable::new()
    }
}

impl RegionTable {
    pub fn new() -> RegionTable {
        RegionTable {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
            drained: Condvar::new(),
        }
    }

    pub fn register(&self, base: usize, len: usize, metadata: RegionMetadata) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(RegionEntry {
            base,
            len,
            refcount: AtomicU64::new(0),
            deregistering: AtomicBool::new(false),
            metadata,
        });
        self.entries.lock().unwrap().insert(id, entry);
        id
    }

    pub fn incref(&self, id: u64) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(&id) {
            Some(entry) if !entry.deregistering.load(Ordering::Acquire) => {
                entry.refcount.fetch_add(1, Ordering::AcqRel);
                true
            }
            _ => false,
        }
    }

    pub fn decref(&self, id: u64) {
        let entry = {
            let entries = self.entries.lock().unwrap();
            entries.get(&id).cloned()
        };
        if let Some(entry) = entry {
            let prev = entry.refcount.fetch_sub(1, Ordering::AcqRel);
            if prev == 1 {
                let _guard = self.entries.lock().unwrap();
                self.drained.notify_all();
            }
        }
    }

    /// Blocks until `id`'s refcount reaches zero, then removes it.
    pub fn deregister(&self, id: u64) {
        let entry = {
            let entries = self.entries.lock().unwrap();
            entries.get(&id).cloned()
        };
        let entry = match entry {
            Some(e) => e,
            None => return,
        };
        entry.deregistering.store(true, Ordering::Release);

        loop {
            if entry.refcount.load(Ordering::Acquire) == 0 {
                break;
            }
            let guard = self.entries.lock().unwrap();
            if entry.refcount.load(Ordering::Acquire) == 0 {
                break;
            }
            let _ = self.drained.wait(guard);
        }

        self.entries.lock().unwrap().remove(&id);
    }

    pub fn bounds(&self, id: u64) -> Option<(usize, usize)> {
        self.entries
            .lock()
            .unwrap()
            .get(&id)
            .map(|e| (e.base, e.len))
    }

    pub fn metadata(&self, id: u64) -> Option<RegionMetadata> {
        self.entries
            .lock()
            .unwrap()
            .get(&id)
            .map(|e| e.metadata.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incref_decref_roundtrip() {
        let table = RegionTable::new();
        let id = table.register(0x1000, 4096, RegionMetadata::default());
        assert!(table.incref(id));
        table.decref(id);
        table.deregister(id);
        assert!(table.bounds(id).is_none());
    }

    #[test]
    fn deregister_blocks_until_refcount_zero() {
        let table = Arc::new(RegionTable::new());
        let id = table.register(0x2000, 4096, RegionMetadata::default());
        assert!(table.incref(id));

        let t2 = table.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            t2.decref(id);
        });

        table.deregister(id);
        handle.join().unwrap();
        assert!(table.bounds(id).is_none());
    }

    #[test]
    fn incref_after_deregistering_fails() {
        let table = RegionTable::new();
        let id = table.register(0x3000, 4096, RegionMetadata::default());
        table.deregister(id);
        assert!(!table.incref(id));
    }
}
