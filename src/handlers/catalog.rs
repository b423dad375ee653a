//! Catalog indexing hooks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Handler, HandlerConfig, HandlerContext, HandlerError, Permission};
use crate::watcher::{CallbackRef, FsCallback, NamedCallback};

/// Monitors each user's workspace so the catalog index can follow file
/// changes.
pub struct Catalog {
    name: String,
    priority: i64,
    workspace_dir: PathBuf,
    context: HandlerContext,
}

impl NamedCallback for Catalog {
    const QUALIFIED_NAME: &'static str = crate::qualified_name!("Catalog");
}

impl Catalog {
    pub fn new(
        name: &str,
        config: &HandlerConfig,
        context: HandlerContext,
    ) -> Result<Self, HandlerError> {
        Ok(Self {
            name: name.to_string(),
            priority: config.priority,
            workspace_dir: config.require_workspace_dir(name)?,
            context,
        })
    }

    pub fn user_workspace_dir(&self, user: &str) -> PathBuf {
        self.workspace_dir.join(user)
    }
}

impl Handler for Catalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    fn user_created(&self, user: &str) -> Result<(), HandlerError> {
        let dir = self.user_workspace_dir(user);
        if self
            .context
            .registry
            .register(&dir, true, &CallbackRef::of::<Catalog>())?
            .is_none()
        {
            tracing::warn!("[catalog] workspace of {user} is not monitored");
        }
        Ok(())
    }

    fn user_deleted(&self, user: &str) -> Result<(), HandlerError> {
        self.context
            .registry
            .unregister(self.user_workspace_dir(user), &CallbackRef::of::<Catalog>())?;
        Ok(())
    }

    fn permission_created(&self, permission: &Permission) -> Result<(), HandlerError> {
        crate::debug_event!("catalog", "permission created (ignored)", "{permission}");
        Ok(())
    }

    fn permission_deleted(&self, permission: &Permission) -> Result<(), HandlerError> {
        crate::debug_event!("catalog", "permission deleted (ignored)", "{permission}");
        Ok(())
    }

    fn as_fs_callback(self: Arc<Self>) -> Option<Arc<dyn FsCallback>> {
        Some(self)
    }
}

impl FsCallback for Catalog {
    fn qualified_name(&self) -> &str {
        Self::QUALIFIED_NAME
    }

    fn on_created(&self, path: &Path) {
        crate::log_event!("catalog", "created", "{}", path.display());
    }

    fn on_deleted(&self, path: &Path) {
        crate::log_event!("catalog", "deleted", "{}", path.display());
    }

    fn on_modified(&self, path: &Path) {
        crate::log_event!("catalog", "modified", "{}", path.display());
    }
}
