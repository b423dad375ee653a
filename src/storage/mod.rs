//! Durable storage for watch descriptors.
//!
//! The registry only talks to storage through [`MonitorStore`], so the
//! backing engine can be swapped without touching watch logic.

mod error;
mod json;
mod memory;

pub use error::{StoreError, StoreResult};
pub use json::JsonFileStore;
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Serialized form of a watch, enough to rebuild it after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchDescriptor {
    pub path: PathBuf,
    pub recursive: bool,
    /// Qualified callback identifier, `<module-path>.<TypeName>`.
    pub callback: String,
}

impl WatchDescriptor {
    /// Whether both descriptors name the same `(path, callback)` key.
    pub fn same_key(&self, other: &WatchDescriptor) -> bool {
        self.path == other.path && self.callback == other.callback
    }
}

/// Narrow persistence interface used by the watch registry.
///
/// Writes are synchronous and last-writer-wins.
pub trait MonitorStore: Send + Sync {
    /// Every persisted descriptor.
    fn list_monitors(&self) -> StoreResult<Vec<WatchDescriptor>>;

    /// Insert or replace the descriptor with the same `(path, callback)` key.
    fn save_monitor(&self, descriptor: &WatchDescriptor) -> StoreResult<()>;

    /// Remove the descriptor with the same `(path, callback)` key, if any.
    fn delete_monitor(&self, descriptor: &WatchDescriptor) -> StoreResult<()>;
}

/// Upsert `descriptor` into `entries` by key.
pub(crate) fn upsert(entries: &mut Vec<WatchDescriptor>, descriptor: &WatchDescriptor) {
    match entries.iter_mut().find(|d| d.same_key(descriptor)) {
        Some(existing) => existing.recursive = descriptor.recursive,
        None => entries.push(descriptor.clone()),
    }
}
