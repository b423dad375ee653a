//! Monitor store persisted as a single JSON document.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{MonitorStore, StoreError, StoreResult, WatchDescriptor, upsert};

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default = "default_format")]
    format: u32,
    #[serde(default)]
    monitors: Vec<WatchDescriptor>,
}

fn default_format() -> u32 {
    1
}

impl StoreFile {
    fn empty() -> Self {
        Self {
            format: default_format(),
            monitors: Vec::new(),
        }
    }
}

/// JSON file backed monitor store.
///
/// Every write rewrites the whole file through a temporary sibling that is
/// atomically renamed over the target.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> StoreResult<StoreFile> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoreFile::empty()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if content.trim().is_empty() {
            return Ok(StoreFile::empty());
        }

        serde_json::from_str(&content).map_err(|source| StoreError::Corrupted {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, file: &StoreFile) -> StoreResult<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|source| StoreError::Io {
            path: parent.clone(),
            source,
        })?;

        let json = serde_json::to_vec_pretty(file)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(|source| StoreError::Io {
            path: parent.clone(),
            source,
        })?;
        tmp.write_all(&json).map_err(|source| StoreError::Io {
            path: tmp.path().to_path_buf(),
            source,
        })?;
        tmp.persist(&self.path).map_err(|e| StoreError::Persist {
            path: self.path.clone(),
            reason: e.error.to_string(),
        })?;
        Ok(())
    }
}

impl MonitorStore for JsonFileStore {
    fn list_monitors(&self) -> StoreResult<Vec<WatchDescriptor>> {
        let _guard = self.lock.lock();
        Ok(self.read()?.monitors)
    }

    fn save_monitor(&self, descriptor: &WatchDescriptor) -> StoreResult<()> {
        let _guard = self.lock.lock();
        let mut file = self.read()?;
        upsert(&mut file.monitors, descriptor);
        self.write(&file)
    }

    fn delete_monitor(&self, descriptor: &WatchDescriptor) -> StoreResult<()> {
        let _guard = self.lock.lock();
        let mut file = self.read()?;
        let before = file.monitors.len();
        file.monitors.retain(|d| !d.same_key(descriptor));
        if file.monitors.len() == before {
            return Ok(());
        }
        self.write(&file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn descriptor(path: &str, callback: &str, recursive: bool) -> WatchDescriptor {
        WatchDescriptor {
            path: PathBuf::from(path),
            recursive,
            callback: callback.to_string(),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(temp_dir.path().join("monitors.json"));
        assert!(store.list_monitors().unwrap().is_empty());
    }

    #[test]
    fn test_descriptors_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("monitors.json");

        {
            let store = JsonFileStore::new(&path);
            store
                .save_monitor(&descriptor("/data/alice", "a.Catalog", false))
                .unwrap();
            store
                .save_monitor(&descriptor("/data/alice", "b.Geoserver", true))
                .unwrap();
            store
                .save_monitor(&descriptor("/data/alice", "a.Catalog", true))
                .unwrap();
        }

        let reopened = JsonFileStore::new(&path);
        let monitors = reopened.list_monitors().unwrap();
        assert_eq!(monitors.len(), 2);
        assert!(monitors.iter().all(|d| d.recursive));

        reopened
            .delete_monitor(&descriptor("/data/alice", "b.Geoserver", true))
            .unwrap();
        let monitors = reopened.list_monitors().unwrap();
        assert_eq!(monitors, vec![descriptor("/data/alice", "a.Catalog", true)]);
    }

    #[test]
    fn test_corrupted_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("monitors.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(
            store.list_monitors(),
            Err(StoreError::Corrupted { .. })
        ));
    }
}
