//! A single observed path bound to a callback.

use crossbeam_channel::{Receiver, unbounded};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::event::EventTranslator;
use super::{FsCallback, WatchError};
use crate::storage::WatchDescriptor;

/// Live observation of one path.
///
/// Each running watch owns a notify watcher and a delivery thread that
/// translates native events and hands them to the callback.
pub struct Watch {
    path: PathBuf,
    callback: Arc<dyn FsCallback>,
    callback_name: String,
    state: Mutex<WatchState>,
}

struct WatchState {
    recursive: bool,
    running: Option<Running>,
}

struct Running {
    watcher: RecommendedWatcher,
    delivery: JoinHandle<()>,
}

impl Watch {
    /// Create a watch for an existing path. Not started.
    pub fn new(
        path: impl Into<PathBuf>,
        recursive: bool,
        callback: Arc<dyn FsCallback>,
    ) -> Result<Self, WatchError> {
        let path = path.into();
        if !path.exists() {
            return Err(WatchError::PathMissing { path });
        }
        Ok(Self::restore(path, recursive, callback))
    }

    /// Rebuild a watch from persisted state without checking the path.
    ///
    /// Used at startup: a vanished path yields a degraded watch instead of
    /// an error.
    pub fn restore(path: impl Into<PathBuf>, recursive: bool, callback: Arc<dyn FsCallback>) -> Self {
        let callback_name = callback.qualified_name().to_string();
        Self {
            path: path.into(),
            callback,
            callback_name,
            state: Mutex::new(WatchState {
                recursive,
                running: None,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Qualified name of the callback, part of the identity key.
    pub fn callback_name(&self) -> &str {
        &self.callback_name
    }

    pub fn callback(&self) -> Arc<dyn FsCallback> {
        Arc::clone(&self.callback)
    }

    pub fn recursive(&self) -> bool {
        self.state.lock().recursive
    }

    /// Whether the OS-level watch is established and delivering.
    pub fn is_alive(&self) -> bool {
        self.state
            .lock()
            .running
            .as_ref()
            .is_some_and(|r| !r.delivery.is_finished())
    }

    pub fn descriptor(&self) -> WatchDescriptor {
        WatchDescriptor {
            path: self.path.clone(),
            recursive: self.recursive(),
            callback: self.callback_name.clone(),
        }
    }

    /// Start delivering events.
    ///
    /// Fails when already running or when the OS watch cannot be
    /// established; in the latter case the watch stays stopped.
    pub fn start(&self) -> Result<(), WatchError> {
        let mut state = self.state.lock();
        if state.running.is_some() {
            let msg = WatchError::AlreadyRunning {
                path: self.path.clone(),
                callback: self.callback_name.clone(),
            };
            tracing::error!("[watch] {msg}");
            return Err(msg);
        }

        let running = self.spawn(state.recursive)?;
        state.running = Some(running);
        crate::debug_event!(
            "watch",
            "started",
            "{} ({}, recursive={})",
            self.path.display(),
            self.callback_name,
            state.recursive
        );
        Ok(())
    }

    fn spawn(&self, recursive: bool) -> Result<Running, WatchError> {
        if !self.path.exists() {
            return Err(WatchError::PathMissing {
                path: self.path.clone(),
            });
        }

        let (tx, rx) = unbounded();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&self.path, mode)
            .map_err(|e| WatchError::PathWatchFailed {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let root = self.path.clone();
        let callback = Arc::clone(&self.callback);
        let delivery = std::thread::Builder::new()
            .name(format!("watch:{}", self.path.display()))
            .spawn(move || deliver(rx, &root, recursive, callback.as_ref()))
            .map_err(|source| WatchError::DeliveryThread {
                path: self.path.clone(),
                source,
            })?;

        Ok(Running { watcher, delivery })
    }

    /// Stop delivering events and wait for the delivery thread to exit.
    ///
    /// Returns whether the watch was running.
    pub fn stop(&self) -> bool {
        let running = self.state.lock().running.take();
        match running {
            Some(running) => {
                Self::shutdown(running);
                crate::debug_event!("watch", "stopped", "{}", self.path.display());
                true
            }
            None => false,
        }
    }

    fn shutdown(running: Running) {
        let Running { watcher, delivery } = running;
        // Dropping the watcher drops the channel sender, which ends the
        // delivery loop.
        drop(watcher);
        if delivery.thread().id() == std::thread::current().id() {
            return;
        }
        if delivery.join().is_err() {
            tracing::error!("[watch] delivery thread panicked");
        }
    }

    /// Change recursion. The OS watch is restarted with the new mode.
    pub fn set_recursive(&self, recursive: bool) -> Result<(), WatchError> {
        let previous = {
            let mut state = self.state.lock();
            if state.recursive == recursive {
                return Ok(());
            }
            state.recursive = recursive;
            state.running.take()
        };
        if let Some(running) = previous {
            Self::shutdown(running);
        }
        self.start()
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("path", &self.path)
            .field("callback", &self.callback_name)
            .field("recursive", &self.recursive())
            .field("alive", &self.is_alive())
            .finish()
    }
}

fn deliver(
    rx: Receiver<notify::Result<Event>>,
    root: &Path,
    recursive: bool,
    callback: &dyn FsCallback,
) {
    let mut translator = EventTranslator::new(root, recursive);
    for res in rx.iter() {
        match res {
            Ok(event) => {
                for fs_event in translator.translate(&event) {
                    crate::debug_event!("watch", "event", "{fs_event:?}");
                    fs_event.deliver(callback);
                }
            }
            Err(e) => {
                tracing::error!("[watch] file watch error on {}: {e}", root.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        created: Mutex<Vec<PathBuf>>,
        log: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn note(&self, kind: &str, path: &Path) {
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            self.log
                .lock()
                .push(format!("{kind} {}", name.unwrap_or_default()));
        }
    }

    impl FsCallback for Recorder {
        fn qualified_name(&self) -> &str {
            "stacksync::tests.Recorder"
        }
        fn on_created(&self, path: &Path) {
            self.note("created", path);
            self.created.lock().push(path.to_path_buf());
        }
        fn on_deleted(&self, path: &Path) {
            self.note("deleted", path);
        }
        fn on_modified(&self, _path: &Path) {}
    }

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_new_requires_existing_path() {
        let result = Watch::new("/nonexistent/stacksync", false, Arc::new(Recorder::default()));
        assert!(matches!(result, Err(WatchError::PathMissing { .. })));
    }

    #[test]
    fn test_start_twice_fails() {
        let temp_dir = TempDir::new().unwrap();
        let watch = Watch::new(temp_dir.path(), false, Arc::new(Recorder::default())).unwrap();

        watch.start().unwrap();
        assert!(watch.is_alive());
        assert!(matches!(
            watch.start(),
            Err(WatchError::AlreadyRunning { .. })
        ));

        assert!(watch.stop());
        assert!(!watch.is_alive());
        assert!(!watch.stop());
    }

    #[test]
    fn test_restored_watch_on_missing_path_is_degraded() {
        let watch = Watch::restore("/nonexistent/stacksync", true, Arc::new(Recorder::default()));
        assert!(watch.start().is_err());
        assert!(!watch.is_alive());
        assert!(watch.recursive());
    }

    #[test]
    fn test_delivers_created_files() {
        let temp_dir = TempDir::new().unwrap();
        let recorder = Arc::new(Recorder::default());
        let watch = Watch::new(temp_dir.path(), false, recorder.clone()).unwrap();
        watch.start().unwrap();

        let file = temp_dir.path().join("roads.shp");
        std::fs::write(&file, b"shp").unwrap();

        assert!(wait_for(|| recorder.created.lock().iter().any(|p| p.ends_with("roads.shp"))));
        watch.stop();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_rename_delivers_one_pair() {
        let temp_dir = TempDir::new().unwrap();
        let from = temp_dir.path().join("a.shp");
        std::fs::write(&from, b"shp").unwrap();

        let recorder = Arc::new(Recorder::default());
        let watch = Watch::new(temp_dir.path(), false, recorder.clone()).unwrap();
        watch.start().unwrap();

        std::fs::rename(&from, temp_dir.path().join("b.shp")).unwrap();
        assert!(wait_for(|| recorder.log.lock().len() >= 2));
        // Give a duplicate pair time to show up
        std::thread::sleep(Duration::from_millis(300));
        watch.stop();

        assert_eq!(*recorder.log.lock(), vec!["deleted a.shp", "created b.shp"]);
    }

    #[test]
    fn test_set_recursive_restarts() {
        let temp_dir = TempDir::new().unwrap();
        let watch = Watch::new(temp_dir.path(), false, Arc::new(Recorder::default())).unwrap();
        watch.start().unwrap();

        watch.set_recursive(true).unwrap();
        assert!(watch.recursive());
        assert!(watch.is_alive());
        assert!(watch.descriptor().recursive);
    }
}
