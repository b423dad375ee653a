//! Configuration-driven handler instantiation and ordering.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    Catalog, FileSystem, Geoserver, Handler, HandlerConfig, HandlerContext, HandlerError, Nginx,
    Thredds,
};
use crate::config::HandlersFragment;

/// Builds a handler from its name, configuration and shared context.
pub type HandlerConstructor = Arc<
    dyn Fn(&str, &HandlerConfig, &HandlerContext) -> Result<Arc<dyn Handler>, HandlerError>
        + Send
        + Sync,
>;

/// Lazily creates, caches and orders handlers.
///
/// Configuration is merged once at construction and never reloaded. An
/// entry of `None` in the cache records a name that yields no handler.
pub struct HandlerFactory {
    configs: IndexMap<String, HandlerConfig>,
    constructors: HashMap<String, HandlerConstructor>,
    context: HandlerContext,
    handlers: RwLock<HashMap<String, Option<Arc<dyn Handler>>>>,
}

impl HandlerFactory {
    /// Factory over the built-in handler kinds.
    pub fn new(fragments: Vec<HandlersFragment>, context: HandlerContext) -> Self {
        Self::with_constructors(fragments, context, builtin_constructors())
    }

    /// Factory over an explicit set of recognized kinds.
    pub fn with_constructors(
        fragments: Vec<HandlersFragment>,
        context: HandlerContext,
        constructors: HashMap<String, HandlerConstructor>,
    ) -> Self {
        let configs = merge_fragments(fragments);
        crate::log_event!(
            "factory",
            "handlers config",
            "{}",
            configs
                .iter()
                .map(|(name, cfg)| format!("{name} [{}]", cfg.active))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Self {
            configs,
            constructors,
            context,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Merged configuration in encounter order.
    pub fn configs(&self) -> &IndexMap<String, HandlerConfig> {
        &self.configs
    }

    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    pub fn is_recognized(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Cached handler for `name`, creating it on first use.
    pub fn get_handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        if let Some(cached) = self.handlers.read().get(name) {
            return cached.clone();
        }

        let handler = self.instantiate(name);
        self.handlers
            .write()
            .entry(name.to_string())
            .or_insert(handler)
            .clone()
    }

    /// Create the handler for `name`, replacing any cached instance.
    ///
    /// Yields `None` unless `name` is recognized and configured active.
    pub fn create_handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        let handler = self.instantiate(name);
        self.handlers
            .write()
            .insert(name.to_string(), handler.clone());
        handler
    }

    /// Every configured handler that yields an instance, by ascending
    /// priority. Equal priorities keep configuration order.
    pub fn get_active_handlers(&self) -> Vec<Arc<dyn Handler>> {
        let mut handlers: Vec<Arc<dyn Handler>> = self
            .configs
            .keys()
            .filter_map(|name| self.get_handler(name))
            .collect();
        handlers.sort_by_key(|h| h.priority());
        handlers
    }

    fn instantiate(&self, name: &str) -> Option<Arc<dyn Handler>> {
        let config = self.configs.get(name)?;
        if !config.active {
            return None;
        }
        let Some(constructor) = self.constructors.get(name) else {
            tracing::warn!("[factory] unrecognized handler {name}, ignoring");
            return None;
        };

        match constructor(name, config, &self.context) {
            Ok(handler) => {
                crate::debug_event!("factory", "created", "{name}");
                Some(handler)
            }
            Err(e) => {
                tracing::error!("[factory] cannot create handler {name}: {e}");
                None
            }
        }
    }
}

/// Merge handler fragments, keeping the first definition of each name.
pub fn merge_fragments(fragments: Vec<HandlersFragment>) -> IndexMap<String, HandlerConfig> {
    let mut merged = IndexMap::new();
    for fragment in fragments {
        if fragment.is_empty() {
            tracing::warn!("[factory] handlers configuration is empty");
            continue;
        }
        for (name, config) in fragment {
            if merged.contains_key(&name) {
                tracing::warn!("[factory] ignoring a duplicate handler configuration for {name}");
            } else {
                merged.insert(name, config);
            }
        }
    }
    merged
}

/// Wrap a closure as a [`HandlerConstructor`].
pub fn handler_constructor<F>(build: F) -> HandlerConstructor
where
    F: Fn(&str, &HandlerConfig, &HandlerContext) -> Result<Arc<dyn Handler>, HandlerError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(build)
}

fn builtin_constructors() -> HashMap<String, HandlerConstructor> {
    let table: [(&str, HandlerConstructor); 5] = [
        (
            "Catalog",
            handler_constructor(|name, config, ctx| {
                Ok(Arc::new(Catalog::new(name, config, ctx.clone())?))
            }),
        ),
        (
            "FileSystem",
            handler_constructor(|name, config, ctx| {
                Ok(Arc::new(FileSystem::new(name, config, ctx.clone())?))
            }),
        ),
        (
            "Geoserver",
            handler_constructor(|name, config, ctx| {
                Ok(Arc::new(Geoserver::new(name, config, ctx.clone())?))
            }),
        ),
        (
            "Nginx",
            handler_constructor(|name, config, _ctx| Ok(Arc::new(Nginx::new(name, config)))),
        ),
        (
            "Thredds",
            handler_constructor(|name, config, _ctx| Ok(Arc::new(Thredds::new(name, config)))),
        ),
    ];
    table
        .into_iter()
        .map(|(name, constructor)| (name.to_string(), constructor))
        .collect()
}

impl std::fmt::Debug for HandlerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerFactory")
            .field("configured", &self.configs.keys().collect::<Vec<_>>())
            .finish()
    }
}
