//! In-process monitor store.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{MonitorStore, StoreResult, WatchDescriptor, upsert};

/// Monitor store kept in memory.
///
/// Counts every write so callers can observe persistence traffic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<WatchDescriptor>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing descriptors, as if loaded from disk.
    pub fn with_descriptors(descriptors: Vec<WatchDescriptor>) -> Self {
        Self {
            entries: Mutex::new(descriptors),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of save/delete calls received.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl MonitorStore for MemoryStore {
    fn list_monitors(&self) -> StoreResult<Vec<WatchDescriptor>> {
        Ok(self.entries.lock().clone())
    }

    fn save_monitor(&self, descriptor: &WatchDescriptor) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        upsert(&mut self.entries.lock(), descriptor);
        Ok(())
    }

    fn delete_monitor(&self, descriptor: &WatchDescriptor) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().retain(|d| !d.same_key(descriptor));
        Ok(())
    }
}
