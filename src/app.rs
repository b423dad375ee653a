//! Process-wide services, built once and passed down explicitly.

use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinError;

use crate::config::{ConfigError, HandlersFragment, Settings};
use crate::events::DispatchError;
use crate::handlers::{Catalog, FileSystem, Geoserver, HandlerContext, HandlerError, HandlerFactory};
use crate::storage::{JsonFileStore, MonitorStore, StoreError};
use crate::tasks::TaskPool;
use crate::watcher::{
    CallbackResolutionError, CallbackResolver, FsCallback, NamedCallback, RegistryError,
    WatchRegistry,
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resolution(#[from] CallbackResolutionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Handler {name} failed to resync: {source}")]
    Resync {
        name: String,
        #[source]
        source: HandlerError,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Monitor store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The single registry, factory and worker pool of the process.
pub struct AppContext {
    pub settings: Settings,
    pub store: Arc<dyn MonitorStore>,
    pub resolver: Arc<CallbackResolver>,
    pub registry: Arc<WatchRegistry>,
    pub pool: TaskPool,
    pub factory: Arc<HandlerFactory>,
}

impl AppContext {
    /// Build from settings, persisting watches to the configured JSON file.
    pub fn build(settings: Settings, runtime: Handle) -> Result<Self, AppError> {
        let store: Arc<dyn MonitorStore> =
            Arc::new(JsonFileStore::new(&settings.monitoring.store_path));
        let fragments = settings.handler_fragments()?;
        Self::assemble(settings, runtime, store, fragments)
    }

    /// Build from explicit parts.
    pub fn assemble(
        settings: Settings,
        runtime: Handle,
        store: Arc<dyn MonitorStore>,
        fragments: Vec<HandlersFragment>,
    ) -> Result<Self, AppError> {
        let resolver = Arc::new(CallbackResolver::new());
        let registry = Arc::new(WatchRegistry::new(
            Arc::clone(&store),
            Arc::clone(&resolver),
        ));
        let pool = TaskPool::new(runtime, settings.tasks.workers);
        let context = HandlerContext {
            registry: Arc::clone(&registry),
            pool: pool.clone(),
            retry: settings.tasks.retry_policy(),
        };
        let factory = Arc::new(HandlerFactory::new(fragments, context));

        let weak = Arc::downgrade(&factory);
        register_callback::<Catalog>(&resolver, &weak, "Catalog")?;
        register_callback::<FileSystem>(&resolver, &weak, "FileSystem")?;
        register_callback::<Geoserver>(&resolver, &weak, "Geoserver")?;

        Ok(Self {
            settings,
            store,
            resolver,
            registry,
            pool,
            factory,
        })
    }

    /// Restore persisted watches, then let every active handler resync.
    ///
    /// A failing resync is logged and reported after the others ran.
    pub fn start(&self) -> Result<(), AppError> {
        self.registry.start()?;

        let mut first_failure = None;
        for handler in self.factory.get_active_handlers() {
            if let Err(source) = handler.resync() {
                tracing::error!("[app] resync of {} failed: {source}", handler.name());
                first_failure.get_or_insert(AppError::Resync {
                    name: handler.name().to_string(),
                    source,
                });
            }
        }

        crate::log_event!(
            "app",
            "started",
            "{} watches, {} active handlers",
            self.registry.len(),
            self.factory.get_active_handlers().len()
        );
        first_failure.map_or(Ok(()), Err)
    }

    /// Run until Ctrl-C, retrying degraded watches on the configured interval.
    pub async fn serve(&self) -> std::io::Result<()> {
        let mut ticker = tokio::time::interval(self.settings.monitoring.reconcile_interval());
        // The first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let registry = Arc::clone(&self.registry);
                    let recovered = tokio::task::spawn_blocking(move || registry.reconcile()).await;
                    let recovered = joined("reconcile", recovered).unwrap_or(0);
                    if recovered > 0 {
                        crate::log_event!("app", "reconciled", "{recovered} watches recovered");
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    crate::log_event!("app", "shutting down");
                    break;
                }
            }
        }

        let registry = Arc::clone(&self.registry);
        // Stopping joins delivery threads
        joined("shutdown", tokio::task::spawn_blocking(move || registry.shutdown()).await);
        Ok(())
    }
}

/// The value of a finished blocking task, or `None` after logging why it
/// did not finish.
fn joined<T>(what: &str, result: Result<T, JoinError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if e.is_panic() => {
            tracing::error!("[app] {what} panicked: {e}");
            None
        }
        Err(e) => {
            tracing::error!("[app] {what} did not complete: {e}");
            None
        }
    }
}

/// Resolve callbacks of kind `T` through the factory's handler `name`.
fn register_callback<T: NamedCallback>(
    resolver: &CallbackResolver,
    factory: &Weak<HandlerFactory>,
    name: &'static str,
) -> Result<(), CallbackResolutionError> {
    let factory = Weak::clone(factory);
    resolver.register_type::<T, _>(move || -> Option<Arc<dyn FsCallback>> {
        factory.upgrade()?.get_handler(name)?.as_fs_callback()
    })
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .field("factory", &self.factory)
            .finish()
    }
}
