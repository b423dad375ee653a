//! Process-wide registry of active watches.
//!
//! Watches are keyed by `(path, callback name)`; at most one watch exists
//! per key. Every mutation is mirrored synchronously to a
//! [`MonitorStore`] so watches can be rebuilt after a restart.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{CallbackRef, CallbackResolver, RegistryError, Watch};
use crate::storage::MonitorStore;

type WatchMap = HashMap<PathBuf, HashMap<String, Arc<Watch>>>;

/// Registry of active watches, mirrored to a durable store.
pub struct WatchRegistry {
    store: Arc<dyn MonitorStore>,
    resolver: Arc<CallbackResolver>,
    /// path -> callback name -> watch
    monitors: Mutex<WatchMap>,
}

impl WatchRegistry {
    pub fn new(store: Arc<dyn MonitorStore>, resolver: Arc<CallbackResolver>) -> Self {
        Self {
            store,
            resolver,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &Arc<CallbackResolver> {
        &self.resolver
    }

    /// Load every persisted watch and start it.
    ///
    /// Watches whose path vanished stay registered in a degraded state and
    /// are retried by [`WatchRegistry::reconcile`]. Descriptors whose
    /// callback cannot be resolved are skipped but kept in the store.
    pub fn start(&self) -> Result<usize, RegistryError> {
        let descriptors = self.store.list_monitors()?;
        let mut loaded = 0;

        for descriptor in descriptors {
            let callback = match self
                .resolver
                .resolve(&CallbackRef::name(descriptor.callback.as_str()))
            {
                Ok(callback) => callback,
                Err(e) => {
                    tracing::error!(
                        "[registry] cannot restore watch on {}: {e}",
                        descriptor.path.display()
                    );
                    continue;
                }
            };

            let mut monitors = self.monitors.lock();
            let by_callback = monitors.entry(descriptor.path.clone()).or_default();
            if by_callback.contains_key(&descriptor.callback) {
                crate::debug_event!(
                    "registry",
                    "duplicate descriptor",
                    "{} ({})",
                    descriptor.path.display(),
                    descriptor.callback
                );
                continue;
            }

            let watch = Arc::new(Watch::restore(
                descriptor.path.clone(),
                descriptor.recursive,
                callback,
            ));
            if let Err(e) = watch.start() {
                tracing::warn!("[registry] restored watch is degraded: {e}");
            }
            by_callback.insert(descriptor.callback.clone(), watch);
            loaded += 1;
        }

        crate::log_event!("registry", "started", "{loaded} watches restored");
        Ok(loaded)
    }

    /// Register a watch on `path` for `callback`, or return the existing one.
    ///
    /// An existing non-recursive watch is upgraded when `recursive` is
    /// requested; recursion is never downgraded. Returns `Ok(None)` when the
    /// path does not exist or the OS watch cannot start.
    pub fn register(
        &self,
        path: impl AsRef<Path>,
        recursive: bool,
        callback: &CallbackRef,
    ) -> Result<Option<Arc<Watch>>, RegistryError> {
        let path = path.as_ref();
        let callback = self.resolver.resolve(callback)?;
        let key = callback.qualified_name().to_string();

        let mut monitors = self.monitors.lock();

        if let Some(existing) = monitors.get(path).and_then(|m| m.get(&key)).cloned() {
            // Restarting joins the delivery thread, which may itself be
            // waiting on this lock.
            drop(monitors);
            if recursive && !existing.recursive() && !self.upgrade(&existing, &key)? {
                return Ok(None);
            }
            return Ok(Some(existing));
        }

        let watch = match Watch::new(path, recursive, callback) {
            Ok(watch) => Arc::new(watch),
            Err(e) => {
                tracing::warn!(
                    "[registry] failed to start monitoring {} with {key}: {e}",
                    path.display()
                );
                return Ok(None);
            }
        };

        if let Err(e) = watch.start() {
            tracing::warn!(
                "[registry] failed to start monitoring {} with {key}: {e}",
                path.display()
            );
            return Ok(None);
        }

        if let Err(e) = self.store.save_monitor(&watch.descriptor()) {
            drop(monitors);
            watch.stop();
            return Err(e.into());
        }

        monitors
            .entry(path.to_path_buf())
            .or_default()
            .insert(key.clone(), Arc::clone(&watch));

        crate::log_event!(
            "registry",
            "registered",
            "{} ({key}, recursive={recursive})",
            path.display()
        );
        Ok(Some(watch))
    }

    /// Restart `watch` recursively and persist it, unless it was
    /// unregistered meanwhile. Returns whether it is still registered.
    fn upgrade(&self, watch: &Arc<Watch>, key: &str) -> Result<bool, RegistryError> {
        if let Err(e) = watch.set_recursive(true) {
            tracing::warn!(
                "[registry] recursive restart of {} failed, watch is degraded: {e}",
                watch.path().display()
            );
        }

        {
            let monitors = self.monitors.lock();
            let current = monitors.get(watch.path()).and_then(|m| m.get(key));
            if current.is_some_and(|c| Arc::ptr_eq(c, watch)) {
                self.store.save_monitor(&watch.descriptor())?;
            } else {
                drop(monitors);
                watch.stop();
                crate::debug_event!(
                    "registry",
                    "upgrade dropped, unregistered meanwhile",
                    "{} ({key})",
                    watch.path().display()
                );
                return Ok(false);
            }
        }

        crate::log_event!(
            "registry",
            "upgraded to recursive",
            "{} ({})",
            watch.path().display(),
            watch.callback_name()
        );
        Ok(true)
    }

    /// Stop and forget the watch on `path` for `callback`.
    ///
    /// Returns whether a watch was found, live or only persisted.
    pub fn unregister(
        &self,
        path: impl AsRef<Path>,
        callback: &CallbackRef,
    ) -> Result<bool, RegistryError> {
        let path = path.as_ref();
        let callback = self.resolver.resolve(callback)?;
        let key = callback.qualified_name();

        let watch = {
            let mut monitors = self.monitors.lock();
            let removed = monitors.get_mut(path).and_then(|m| m.remove(key));
            if monitors.get(path).is_some_and(|m| m.is_empty()) {
                monitors.remove(path);
            }
            removed
        };
        let Some(watch) = watch else {
            return self.forget_persisted(path, key);
        };

        watch.stop();
        self.store.delete_monitor(&watch.descriptor())?;
        crate::log_event!("registry", "unregistered", "{} ({key})", path.display());
        Ok(true)
    }

    /// Drop a descriptor that was persisted but never loaded, e.g. by a
    /// one-shot process that did not call [`WatchRegistry::start`].
    fn forget_persisted(&self, path: &Path, key: &str) -> Result<bool, RegistryError> {
        let persisted = self
            .store
            .list_monitors()?
            .into_iter()
            .find(|d| d.path == path && d.callback == key);
        let Some(descriptor) = persisted else {
            return Ok(false);
        };
        self.store.delete_monitor(&descriptor)?;
        crate::log_event!("registry", "unregistered (not loaded)", "{} ({key})", path.display());
        Ok(true)
    }

    /// Retry every watch that is not alive. Returns how many recovered.
    pub fn reconcile(&self) -> usize {
        let degraded: Vec<Arc<Watch>> = self
            .watches()
            .into_iter()
            .filter(|w| !w.is_alive())
            .collect();

        let mut recovered = 0;
        for watch in degraded {
            if !watch.path().exists() {
                crate::debug_event!("registry", "still missing", "{}", watch.path().display());
                continue;
            }
            watch.stop();
            match watch.start() {
                Ok(()) => {
                    recovered += 1;
                    crate::log_event!("registry", "recovered", "{}", watch.path().display());
                }
                Err(e) => tracing::warn!("[registry] reconcile failed: {e}"),
            }
        }
        recovered
    }

    /// Look up the watch for a key.
    pub fn get(&self, path: impl AsRef<Path>, callback_name: &str) -> Option<Arc<Watch>> {
        self.monitors
            .lock()
            .get(path.as_ref())
            .and_then(|m| m.get(callback_name))
            .cloned()
    }

    /// Snapshot of every registered watch.
    pub fn watches(&self) -> Vec<Arc<Watch>> {
        self.monitors
            .lock()
            .values()
            .flat_map(|m| m.values().cloned())
            .collect()
    }

    /// Whether any watch is registered on `path`.
    pub fn contains_path(&self, path: impl AsRef<Path>) -> bool {
        self.monitors.lock().contains_key(path.as_ref())
    }

    pub fn len(&self) -> usize {
        self.monitors.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every watch without touching the store.
    pub fn shutdown(&self) {
        let watches: Vec<Arc<Watch>> = {
            let mut monitors = self.monitors.lock();
            monitors
                .drain()
                .flat_map(|(_, m)| m.into_values())
                .collect()
        };
        let count = watches.len();
        for watch in watches {
            watch.stop();
        }
        crate::log_event!("registry", "shutdown", "{count} watches stopped");
    }
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("watches", &self.len())
            .finish()
    }
}
