//! Backend synchronization handlers.
//!
//! Each handler keeps one backend consistent with user, permission and
//! filesystem events. The [`HandlerFactory`] turns configuration into
//! cached handler instances and orders them for dispatch.
//!
//! # Architecture
//!
//! ```text
//! HandlerFactory (config -> cached Arc<dyn Handler>)
//!   │
//!   ├─ FileSystem  (user layout, WPS output mirror)
//!   ├─ Geoserver   (workspaces, shapefile publishing via task chains)
//!   ├─ Catalog     (user workspace monitoring)
//!   └─ Nginx, Thredds
//! ```

mod catalog;
mod config;
mod error;
mod factory;
mod filesystem;
mod geoserver;
mod passive;

pub use catalog::Catalog;
pub use config::HandlerConfig;
pub use error::HandlerError;
pub use factory::{HandlerConstructor, HandlerFactory, handler_constructor, merge_fragments};
pub use filesystem::FileSystem;
pub use geoserver::{Geoserver, GeoserverClient, GeoserverOp, classify_response};
pub use passive::{Nginx, Thredds};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::tasks::{RetryPolicy, TaskPool};
use crate::watcher::{FsCallback, WatchRegistry};

/// A permission change on a service resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub service_name: String,
    pub resource_full_name: String,
    /// Permission name, e.g. `read` or `write`.
    pub name: String,
    /// `allow` or `deny`.
    pub access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subject = match (&self.user, &self.group) {
            (Some(user), _) => format!("user {user}"),
            (None, Some(group)) => format!("group {group}"),
            (None, None) => "anonymous".to_string(),
        };
        write!(
            f,
            "{}-{} on {}:{} for {subject}",
            self.name, self.access, self.service_name, self.resource_full_name
        )
    }
}

/// Shared services handed to every handler at construction.
#[derive(Clone, Debug)]
pub struct HandlerContext {
    pub registry: Arc<WatchRegistry>,
    pub pool: TaskPool,
    /// Policy for retryable chain steps.
    pub retry: RetryPolicy,
}

/// Synchronization logic for one backend.
///
/// Operations run synchronously on the dispatching thread; an `Err` is the
/// failure of that synchronous part. Work submitted as task chains reports
/// through logs only.
pub trait Handler: Send + Sync {
    /// Configured handler name.
    fn name(&self) -> &str;

    fn priority(&self) -> i64;

    fn user_created(&self, user: &str) -> Result<(), HandlerError>;

    fn user_deleted(&self, user: &str) -> Result<(), HandlerError>;

    fn permission_created(&self, permission: &Permission) -> Result<(), HandlerError>;

    fn permission_deleted(&self, permission: &Permission) -> Result<(), HandlerError>;

    /// Re-establish whatever the handler keeps running, e.g. watches.
    fn resync(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// The handler as a filesystem callback, for handlers that receive
    /// filesystem events.
    fn as_fs_callback(self: Arc<Self>) -> Option<Arc<dyn FsCallback>> {
        None
    }
}

impl std::fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name())
            .field("priority", &self.priority())
            .finish()
    }
}
