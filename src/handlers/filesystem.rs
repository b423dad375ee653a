//! User directory layout and public WPS output mirroring.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{Handler, HandlerConfig, HandlerContext, HandlerError, Permission};
use crate::watcher::{CallbackRef, FsCallback, NamedCallback};

const NOTEBOOKS_DIR: &str = "notebooks";
const PUBLIC_WPS_OUTPUTS: &str = "public/wpsoutputs";

/// Keeps the on-disk workspace layout in sync with users.
///
/// Work is synchronous, so failures reach the caller of the dispatch.
pub struct FileSystem {
    name: String,
    priority: i64,
    workspace_dir: PathBuf,
    jupyterhub_user_data_dir: PathBuf,
    wps_outputs_dir: PathBuf,
    context: HandlerContext,
}

impl NamedCallback for FileSystem {
    const QUALIFIED_NAME: &'static str = crate::qualified_name!("FileSystem");
}

impl FileSystem {
    pub fn new(
        name: &str,
        config: &HandlerConfig,
        context: HandlerContext,
    ) -> Result<Self, HandlerError> {
        Ok(Self {
            name: name.to_string(),
            priority: config.priority,
            workspace_dir: config.require_workspace_dir(name)?,
            jupyterhub_user_data_dir: config.require_path(name, "jupyterhub_user_data_dir")?,
            wps_outputs_dir: config.require_path(name, "wps_outputs_dir")?,
            context,
        })
    }

    pub fn user_workspace_dir(&self, user: &str) -> PathBuf {
        self.workspace_dir.join(user)
    }

    pub fn public_wps_outputs_dir(&self) -> PathBuf {
        self.workspace_dir.join(PUBLIC_WPS_OUTPUTS)
    }

    /// Mirror location of a WPS output, if `path` lies under the outputs dir.
    fn public_target(&self, path: &Path) -> Option<PathBuf> {
        let relative = path.strip_prefix(&self.wps_outputs_dir).ok()?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(self.public_wps_outputs_dir().join(relative))
    }

    fn ensure_notebooks_link(&self, user: &str) -> Result<(), HandlerError> {
        let link = self.user_workspace_dir(user).join(NOTEBOOKS_DIR);
        let source = self.jupyterhub_user_data_dir.join(user);

        match fs::symlink_metadata(&link) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let current = fs::read_link(&link).map_err(|e| HandlerError::io(&link, e))?;
                if current == source {
                    return Ok(());
                }
                crate::debug_event!("filesystem", "replacing stale link", "{}", link.display());
                fs::remove_file(&link).map_err(|e| HandlerError::io(&link, e))?;
            }
            Ok(_) => {
                return Err(HandlerError::Layout {
                    path: link,
                    reason: "failed to create symlinked directory: a real entry is in the way"
                        .to_string(),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(HandlerError::io(&link, e)),
        }

        symlink_dir(&source, &link).map_err(|e| HandlerError::io(&link, e))
    }

    fn mirror_output(&self, source: &Path, target: &Path) -> io::Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::remove_file(target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::hard_link(source, target)
    }
}

#[cfg(unix)]
fn symlink_dir(source: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, link)
}

#[cfg(windows)]
fn symlink_dir(source: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(source, link)
}

#[cfg(unix)]
fn set_user_dir_mode(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_user_dir_mode(_path: &Path) -> io::Result<()> {
    Ok(())
}

impl Handler for FileSystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    fn user_created(&self, user: &str) -> Result<(), HandlerError> {
        let user_dir = self.user_workspace_dir(user);
        match fs::create_dir(&user_dir) {
            Ok(()) => crate::log_event!("filesystem", "created user dir", "{}", user_dir.display()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                crate::debug_event!("filesystem", "user dir exists", "{}", user_dir.display());
            }
            Err(e) => return Err(HandlerError::io(&user_dir, e)),
        }
        set_user_dir_mode(&user_dir).map_err(|e| HandlerError::io(&user_dir, e))?;

        self.ensure_notebooks_link(user)
    }

    fn user_deleted(&self, user: &str) -> Result<(), HandlerError> {
        let user_dir = self.user_workspace_dir(user);
        match fs::remove_dir_all(&user_dir) {
            Ok(()) => {
                crate::log_event!("filesystem", "removed user dir", "{}", user_dir.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                crate::debug_event!("filesystem", "no user dir", "{}", user_dir.display());
                Ok(())
            }
            Err(e) => Err(HandlerError::io(&user_dir, e)),
        }
    }

    fn permission_created(&self, permission: &Permission) -> Result<(), HandlerError> {
        crate::debug_event!("filesystem", "permission created (ignored)", "{permission}");
        Ok(())
    }

    fn permission_deleted(&self, permission: &Permission) -> Result<(), HandlerError> {
        crate::debug_event!("filesystem", "permission deleted (ignored)", "{permission}");
        Ok(())
    }

    /// Start mirroring WPS outputs.
    fn resync(&self) -> Result<(), HandlerError> {
        if self
            .context
            .registry
            .register(&self.wps_outputs_dir, true, &CallbackRef::of::<FileSystem>())?
            .is_none()
        {
            tracing::warn!(
                "[filesystem] WPS outputs at {} are not monitored",
                self.wps_outputs_dir.display()
            );
        }
        Ok(())
    }

    fn as_fs_callback(self: Arc<Self>) -> Option<Arc<dyn FsCallback>> {
        Some(self)
    }
}

impl FsCallback for FileSystem {
    fn qualified_name(&self) -> &str {
        Self::QUALIFIED_NAME
    }

    fn on_created(&self, path: &Path) {
        if !path.is_file() {
            return;
        }
        let Some(target) = self.public_target(path) else {
            return;
        };
        match self.mirror_output(path, &target) {
            Ok(()) => crate::debug_event!("filesystem", "linked", "{}", target.display()),
            Err(e) => tracing::warn!(
                "[filesystem] cannot link {} to {}: {e}",
                path.display(),
                target.display()
            ),
        }
    }

    fn on_deleted(&self, path: &Path) {
        let Some(target) = self.public_target(path) else {
            return;
        };
        match fs::remove_file(&target) {
            Ok(()) => crate::debug_event!("filesystem", "unlinked", "{}", target.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("[filesystem] cannot remove {}: {e}", target.display()),
        }
    }

    fn on_modified(&self, _path: &Path) {}
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::tasks::{RetryPolicy, TaskPool};
    use crate::watcher::{CallbackResolver, WatchRegistry};
    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    use tempfile::TempDir;

    struct Fixture {
        _temp_dir: TempDir,
        _runtime: tokio::runtime::Runtime,
        workspace_dir: PathBuf,
        jupyterhub_dir: PathBuf,
        wps_dir: PathBuf,
        handler: FileSystem,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let workspace_dir = temp_dir.path().join("user_workspaces");
        let jupyterhub_dir = temp_dir.path().join("jupyterhub_user_data");
        let wps_dir = temp_dir.path().join("wpsoutputs");
        for dir in [&workspace_dir, &jupyterhub_dir, &wps_dir] {
            fs::create_dir(dir).unwrap();
        }

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let context = HandlerContext {
            registry: Arc::new(WatchRegistry::new(
                Arc::new(MemoryStore::new()),
                Arc::new(CallbackResolver::new()),
            )),
            pool: TaskPool::new(runtime.handle().clone(), 1),
            retry: RetryPolicy::once(),
        };

        let mut config = HandlerConfig {
            active: true,
            workspace_dir: Some(workspace_dir.clone()),
            ..HandlerConfig::default()
        };
        config.extra.insert(
            "jupyterhub_user_data_dir".to_string(),
            toml::Value::String(jupyterhub_dir.display().to_string()),
        );
        config.extra.insert(
            "wps_outputs_dir".to_string(),
            toml::Value::String(wps_dir.display().to_string()),
        );

        let handler = FileSystem::new("FileSystem", &config, context).unwrap();
        Fixture {
            _temp_dir: temp_dir,
            _runtime: runtime,
            workspace_dir,
            jupyterhub_dir,
            wps_dir,
            handler,
        }
    }

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_user_workspace_layout() {
        let fx = fixture();
        let user_dir = fx.workspace_dir.join("alice");
        let link = user_dir.join(NOTEBOOKS_DIR);
        let expected = fx.jupyterhub_dir.join("alice");

        fx.handler.user_created("alice").unwrap();
        assert_eq!(mode(&user_dir), 0o755);
        assert_eq!(fs::read_link(&link).unwrap(), expected);

        // Missing link is recreated and the mode corrected
        fs::remove_file(&link).unwrap();
        fs::set_permissions(&user_dir, fs::Permissions::from_mode(0o777)).unwrap();
        fx.handler.user_created("alice").unwrap();
        assert_eq!(mode(&user_dir), 0o755);
        assert_eq!(fs::read_link(&link).unwrap(), expected);

        // A link pointing elsewhere is replaced
        fs::remove_file(&link).unwrap();
        std::os::unix::fs::symlink("/wrong_source_dir", &link).unwrap();
        fx.handler.user_created("alice").unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), expected);

        // A real directory in the way is an error
        fs::remove_file(&link).unwrap();
        fs::create_dir(&link).unwrap();
        let err = fx.handler.user_created("alice").unwrap_err();
        assert!(matches!(err, HandlerError::Layout { .. }), "{err}");

        fx.handler.user_deleted("alice").unwrap();
        assert!(!user_dir.exists());
        fx.handler.user_deleted("alice").unwrap();
    }

    #[test]
    fn test_missing_workspace_root_fails() {
        let fx = fixture();
        fs::remove_dir(&fx.workspace_dir).unwrap();

        let err = fx.handler.user_created("alice").unwrap_err();
        assert!(matches!(err, HandlerError::Io { .. }), "{err}");
        assert!(!fx.workspace_dir.join("alice").exists());
    }

    #[test]
    fn test_public_output_mirroring() {
        let fx = fixture();
        let output = fx.wps_dir.join("weaver/test/output.txt");
        fs::create_dir_all(output.parent().unwrap()).unwrap();
        fs::write(&output, "result").unwrap();

        let mirrored = fx
            .handler
            .public_wps_outputs_dir()
            .join("weaver/test/output.txt");

        fx.handler.on_created(&output);
        assert_eq!(fs::metadata(&mirrored).unwrap().nlink(), 2);

        // An unrelated file at the target is replaced
        fs::remove_file(&mirrored).unwrap();
        fs::write(&mirrored, "stale").unwrap();
        fx.handler.on_created(&output);
        assert_eq!(fs::metadata(&mirrored).unwrap().nlink(), 2);
        assert_eq!(fs::read_to_string(&mirrored).unwrap(), "result");

        fx.handler.on_deleted(&output);
        assert!(!mirrored.exists());

        // Directories are not mirrored
        let weaver_dir = fx.handler.public_wps_outputs_dir().join("weaver");
        fs::remove_dir_all(&weaver_dir).unwrap();
        fx.handler.on_created(&fx.wps_dir.join("weaver"));
        assert!(!weaver_dir.exists());
    }
}
