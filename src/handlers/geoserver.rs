//! Geoserver synchronization.
//!
//! Each user gets a Geoserver workspace backed by a directory-of-shapefiles
//! datastore at `<workspace_dir>/<user>/shapefile_datastore`. Shapefiles
//! appearing in that directory are published as feature types once all
//! their sibling files are present.

use async_trait::async_trait;
use regex::Regex;
use reqwest::RequestBuilder;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::{Handler, HandlerConfig, HandlerContext, HandlerError, Permission};
use crate::tasks::{BackendError, Chain, RetryPolicy, TaskError, TaskStep};
use crate::watcher::{CallbackRef, FsCallback, NamedCallback};

const SHAPEFILE_DIR: &str = "shapefile_datastore";
const SHAPEFILE_SIBLINGS: [&str; 3] = ["prj", "dbf", "shx"];
/// Mount point of the user workspaces inside the Geoserver container.
const CONTAINER_WORKSPACES: &str = "/user_workspaces";
const DATASTORE_TYPE: &str = "Directory of spatial files (shapefiles)";
const WGS84_WKT: &str = concat!(
    r#"GEOGCS["WGS 84", DATUM["World Geodetic System 1984", "#,
    r#"SPHEROID["WGS 84", 6378137.0, 298.257223563, AUTHORITY["EPSG","7030"]], "#,
    r#"AUTHORITY["EPSG","6326"]], PRIMEM["Greenwich", 0.0, AUTHORITY["EPSG","8901"]], "#,
    r#"UNIT["degree", 0.017453292519943295], AXIS["Geodetic longitude", EAST], "#,
    r#"AXIS["Geodetic latitude", NORTH], AUTHORITY["EPSG","4326"]]"#
);

static ALREADY_EXISTS: OnceLock<Option<Regex>> = OnceLock::new();
static WORKSPACE_NOT_FOUND: OnceLock<Option<Regex>> = OnceLock::new();

fn body_matches(cell: &'static OnceLock<Option<Regex>>, pattern: &str, body: &str) -> bool {
    cell.get_or_init(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(body))
}

/// Classify a Geoserver response.
///
/// Geoserver answers a duplicate workspace with 401 and an HTML page, so
/// the body decides whether a 401 is an authentication failure.
pub fn classify_response(operation: &str, status: u16, body: &str) -> Result<(), TaskError> {
    let rejected = |detail: String| -> Result<(), TaskError> {
        Err(BackendError::new(operation, detail).into())
    };

    match status {
        200 | 201 => {
            crate::debug_event!("geoserver", "success", "{operation}");
            Ok(())
        }
        401 if body_matches(&ALREADY_EXISTS, "Workspace &#39;.*&#39; already exists", body) => {
            tracing::warn!("[geoserver] {operation}: workspace already exists");
            Ok(())
        }
        401 => rejected("missing valid authentication credentials".to_string()),
        403 if operation == "remove_workspace" => {
            rejected("`recurse` must be `true` to delete a workspace".to_string())
        }
        404 if body_matches(&WORKSPACE_NOT_FOUND, "Workspace &#39;.*&#39; not found", body) => {
            rejected("workspace not found".to_string())
        }
        404 if body.contains("No such data store") => rejected("datastore not found".to_string()),
        404 if body.contains("No such feature type") => {
            rejected("feature type not found".to_string())
        }
        500 => rejected(body.trim().to_string()),
        other => rejected(format!("HTTP error code [{other}]")),
    }
}

/// Thin client over the Geoserver REST API.
pub struct GeoserverClient {
    api_url: String,
    http: reqwest::Client,
    admin_user: Option<String>,
    admin_password: Option<String>,
}

impl GeoserverClient {
    pub fn new(
        url: &str,
        timeout: Duration,
        admin_user: Option<String>,
        admin_password: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_url: format!("{}/rest", url.trim_end_matches('/')),
            http,
            admin_user,
            admin_password,
        })
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<(), TaskError> {
        let request = match &self.admin_user {
            Some(user) => request.basic_auth(user, self.admin_password.as_ref()),
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            tracing::error!("[geoserver] {operation}: connection to Geoserver failed: {e}");
            TaskError::transport(operation, e)
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TaskError::transport(operation, e))?;

        classify_response(operation, status, &body)
    }

    pub async fn create_workspace(&self, workspace: &str) -> Result<(), TaskError> {
        let payload = json!({"workspace": {"name": workspace, "isolated": "True"}});
        let request = self
            .http
            .post(format!("{}/workspaces/", self.api_url))
            .json(&payload);
        self.send("create_workspace", request).await
    }

    /// Remove a workspace with all its datastores and layers.
    pub async fn remove_workspace(&self, workspace: &str) -> Result<(), TaskError> {
        let request = self
            .http
            .delete(format!("{}/workspaces/{workspace}?recurse=true", self.api_url));
        self.send("remove_workspace", request).await
    }

    /// Create an empty datastore. Connection parameters are set by
    /// [`GeoserverClient::configure_datastore`].
    pub async fn create_datastore(&self, workspace: &str, datastore: &str) -> Result<(), TaskError> {
        let payload = json!({
            "dataStore": {
                "name": datastore,
                "type": DATASTORE_TYPE,
                "connectionParameters": {"entry": []},
            }
        });
        let request = self
            .http
            .post(format!("{}/workspaces/{workspace}/datastores", self.api_url))
            .json(&payload);
        self.send("create_datastore", request).await
    }

    /// Point a datastore at a directory as seen from the Geoserver container.
    pub async fn configure_datastore(
        &self,
        workspace: &str,
        datastore: &str,
        datastore_path: &str,
    ) -> Result<(), TaskError> {
        let entry = |key: &str, value: &str| json!({"$": value, "@key": key});
        let payload = json!({
            "dataStore": {
                "name": datastore,
                "type": DATASTORE_TYPE,
                "connectionParameters": {
                    "entry": [
                        entry("charset", "UTF-8"),
                        entry("filetype", "shapefile"),
                        entry("create spatial index", "true"),
                        entry("memory mapped buffer", "true"),
                        entry("timezone", "GMT"),
                        entry("enable spatial index", "true"),
                        entry("namespace", &format!("http://{datastore}")),
                        entry("cache and reuse memory maps", "true"),
                        entry("url", &format!("file://{datastore_path}")),
                        entry("fstype", "shape"),
                    ]
                },
            }
        });
        let request = self
            .http
            .put(format!(
                "{}/workspaces/{workspace}/datastores/{datastore}",
                self.api_url
            ))
            .json(&payload);
        self.send("configure_datastore", request).await
    }

    /// Publish a shapefile by creating its feature type.
    pub async fn publish_shapefile(
        &self,
        workspace: &str,
        datastore: &str,
        shapefile: &str,
    ) -> Result<(), TaskError> {
        let payload = json!({
            "featureType": {
                "name": shapefile,
                "nativeCRS": WGS84_WKT,
                "srs": "EPSG:4326",
                "projectionPolicy": "REPROJECT_TO_DECLARED",
                "maxFeatures": 5000,
                "numDecimals": 6,
            }
        });
        let request = self
            .http
            .post(format!(
                "{}/workspaces/{workspace}/datastores/{datastore}/featuretypes",
                self.api_url
            ))
            .json(&payload);
        self.send("publish_shapefile", request).await
    }

    /// Remove a feature type and its layer.
    pub async fn remove_shapefile(
        &self,
        workspace: &str,
        datastore: &str,
        shapefile: &str,
    ) -> Result<(), TaskError> {
        let request = self.http.delete(format!(
            "{}/workspaces/{workspace}/datastores/{datastore}/featuretypes/{shapefile}?recurse=true",
            self.api_url
        ));
        self.send("remove_shapefile", request).await
    }
}

/// Remote operations performed as chain steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoserverOp {
    CreateWorkspace { workspace: String },
    /// Create then configure the user's datastore.
    CreateDatastore { workspace: String },
    RemoveWorkspace { workspace: String },
    /// Check that the `.prj`, `.dbf` and `.shx` siblings exist.
    ValidateShapefile { workspace: String, shapefile: String },
    PublishShapefile { workspace: String, shapefile: String },
    RemoveShapefile { workspace: String, shapefile: String },
}

impl GeoserverOp {
    pub fn name(&self) -> &'static str {
        match self {
            GeoserverOp::CreateWorkspace { .. } => "create_workspace",
            GeoserverOp::CreateDatastore { .. } => "create_datastore",
            GeoserverOp::RemoveWorkspace { .. } => "remove_workspace",
            GeoserverOp::ValidateShapefile { .. } => "validate_shapefile",
            GeoserverOp::PublishShapefile { .. } => "publish_shapefile",
            GeoserverOp::RemoveShapefile { .. } => "remove_shapefile",
        }
    }
}

struct GeoserverStep {
    op: GeoserverOp,
    client: Arc<GeoserverClient>,
    workspace_dir: PathBuf,
}

#[async_trait]
impl TaskStep for GeoserverStep {
    fn name(&self) -> &str {
        self.op.name()
    }

    async fn run(&self) -> Result<(), TaskError> {
        match &self.op {
            GeoserverOp::CreateWorkspace { workspace } => {
                self.client.create_workspace(workspace).await
            }
            GeoserverOp::CreateDatastore { workspace } => {
                let datastore = datastore_name(workspace);
                self.client.create_datastore(workspace, &datastore).await?;
                self.client
                    .configure_datastore(workspace, &datastore, &container_datastore_dir(workspace))
                    .await
            }
            GeoserverOp::RemoveWorkspace { workspace } => {
                self.client.remove_workspace(workspace).await
            }
            GeoserverOp::ValidateShapefile {
                workspace,
                shapefile,
            } => {
                let dir = shapefile_dir(&self.workspace_dir, workspace);
                for ext in SHAPEFILE_SIBLINGS {
                    let sibling = dir.join(format!("{shapefile}.{ext}"));
                    if !sibling.is_file() {
                        tracing::warn!(
                            "[geoserver] shapefile is incomplete: missing {}",
                            sibling.display()
                        );
                        return Err(TaskError::precondition(
                            self.op.name(),
                            format!("missing {}", sibling.display()),
                        ));
                    }
                }
                crate::debug_event!("geoserver", "shapefile is valid", "{shapefile}");
                Ok(())
            }
            GeoserverOp::PublishShapefile {
                workspace,
                shapefile,
            } => {
                self.client
                    .publish_shapefile(workspace, &datastore_name(workspace), shapefile)
                    .await
            }
            GeoserverOp::RemoveShapefile {
                workspace,
                shapefile,
            } => {
                self.client
                    .remove_shapefile(workspace, &datastore_name(workspace), shapefile)
                    .await
            }
        }
    }
}

fn shapefile_dir(workspace_dir: &Path, user: &str) -> PathBuf {
    workspace_dir.join(user).join(SHAPEFILE_DIR)
}

/// Datastore name inside Geoserver; it does not exist on disk.
fn datastore_name(workspace: &str) -> String {
    format!("shapefile_datastore_{workspace}")
}

fn container_datastore_dir(user: &str) -> String {
    format!("{CONTAINER_WORKSPACES}/{user}/{SHAPEFILE_DIR}")
}

/// Workspace and shapefile name for `<...>/<user>/shapefile_datastore/<name>.shp`.
pub(crate) fn shapefile_info(path: &Path) -> Option<(String, String)> {
    if path.extension()? != "shp" {
        return None;
    }
    let shapefile = path.file_stem()?.to_str()?;
    let workspace = path.parent()?.parent()?.file_name()?.to_str()?;
    Some((workspace.to_string(), shapefile.to_string()))
}

/// Keeps Geoserver workspaces and published layers in sync.
pub struct Geoserver {
    name: String,
    priority: i64,
    workspace_dir: PathBuf,
    client: Arc<GeoserverClient>,
    context: HandlerContext,
}

impl NamedCallback for Geoserver {
    const QUALIFIED_NAME: &'static str = crate::qualified_name!("Geoserver");
}

impl Geoserver {
    pub fn new(
        name: &str,
        config: &HandlerConfig,
        context: HandlerContext,
    ) -> Result<Self, HandlerError> {
        let url = config.require_url(name)?;
        let workspace_dir = config.require_workspace_dir(name)?;
        let client = GeoserverClient::new(
            url,
            config.timeout(),
            config.extra_str("admin_user").map(str::to_string),
            config.extra_str("admin_password").map(str::to_string),
        )
        .map_err(|source| HandlerError::Client {
            handler: name.to_string(),
            source,
        })?;

        Ok(Self {
            name: name.to_string(),
            priority: config.priority,
            workspace_dir,
            client: Arc::new(client),
            context,
        })
    }

    /// The user's shapefile datastore directory on disk.
    pub fn shapefile_dir(&self, user: &str) -> PathBuf {
        shapefile_dir(&self.workspace_dir, user)
    }

    fn step(&self, op: GeoserverOp) -> GeoserverStep {
        GeoserverStep {
            op,
            client: Arc::clone(&self.client),
            workspace_dir: self.workspace_dir.clone(),
        }
    }

    fn submit(&self, chain: Chain) {
        // Fire and forget: the pool logs the outcome.
        drop(self.context.pool.submit(chain));
    }
}

impl Handler for Geoserver {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i64 {
        self.priority
    }

    fn user_created(&self, user: &str) -> Result<(), HandlerError> {
        let dir = self.shapefile_dir(user);
        if dir.is_dir() {
            crate::debug_event!("geoserver", "datastore dir exists", "{}", dir.display());
        } else {
            std::fs::create_dir_all(&dir).map_err(|e| HandlerError::io(&dir, e))?;
        }

        let retry = &self.context.retry;
        let workspace = user.to_string();
        self.submit(
            Chain::new(format!("geoserver workspace {user}"))
                .then(
                    self.step(GeoserverOp::CreateWorkspace {
                        workspace: workspace.clone(),
                    }),
                    retry.clone(),
                )
                .then(
                    self.step(GeoserverOp::CreateDatastore { workspace }),
                    retry.clone(),
                ),
        );

        crate::log_event!("geoserver", "monitoring datastore", "{user}");
        if self
            .context
            .registry
            .register(&dir, true, &CallbackRef::of::<Geoserver>())?
            .is_none()
        {
            tracing::warn!("[geoserver] datastore of {user} is not monitored");
        }
        Ok(())
    }

    fn user_deleted(&self, user: &str) -> Result<(), HandlerError> {
        self.submit(
            Chain::new(format!("geoserver remove workspace {user}")).then(
                self.step(GeoserverOp::RemoveWorkspace {
                    workspace: user.to_string(),
                }),
                self.context.retry.clone(),
            ),
        );

        crate::log_event!("geoserver", "stop monitoring datastore", "{user}");
        self.context
            .registry
            .unregister(self.shapefile_dir(user), &CallbackRef::of::<Geoserver>())?;
        Ok(())
    }

    fn permission_created(&self, permission: &Permission) -> Result<(), HandlerError> {
        crate::debug_event!("geoserver", "permission created (ignored)", "{permission}");
        Ok(())
    }

    fn permission_deleted(&self, permission: &Permission) -> Result<(), HandlerError> {
        crate::debug_event!("geoserver", "permission deleted (ignored)", "{permission}");
        Ok(())
    }

    fn as_fs_callback(self: Arc<Self>) -> Option<Arc<dyn FsCallback>> {
        Some(self)
    }
}

impl FsCallback for Geoserver {
    fn qualified_name(&self) -> &str {
        Self::QUALIFIED_NAME
    }

    fn on_created(&self, path: &Path) {
        let Some((workspace, shapefile)) = shapefile_info(path) else {
            return;
        };
        crate::log_event!("geoserver", "publishing", "{}", path.display());

        let retry = &self.context.retry;
        self.submit(
            Chain::new(format!("geoserver publish {workspace}:{shapefile}"))
                .then(
                    self.step(GeoserverOp::ValidateShapefile {
                        workspace: workspace.clone(),
                        shapefile: shapefile.clone(),
                    }),
                    retry.clone(),
                )
                .then(
                    self.step(GeoserverOp::PublishShapefile {
                        workspace,
                        shapefile,
                    }),
                    retry.clone(),
                ),
        );
    }

    fn on_deleted(&self, path: &Path) {
        let Some((workspace, shapefile)) = shapefile_info(path) else {
            return;
        };
        self.submit(
            Chain::new(format!("geoserver remove {workspace}:{shapefile}"))
                .then(
                    self.step(GeoserverOp::RemoveShapefile {
                        workspace,
                        shapefile,
                    }),
                    RetryPolicy::once(),
                )
                .best_effort(),
        );
    }

    fn on_modified(&self, _path: &Path) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::tasks::TaskPool;
    use crate::watcher::{CallbackResolver, WatchRegistry};
    use std::fs;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EXISTS_BODY: &str =
        "<html><body>Workspace &#39;alice&#39; already exists</body></html>";

    fn rejection(result: Result<(), TaskError>) -> BackendError {
        match result {
            Err(TaskError::Backend(e)) => e,
            other => panic!("expected a backend rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_success_and_duplicate() {
        assert!(classify_response("create_workspace", 200, "").is_ok());
        assert!(classify_response("create_workspace", 201, "").is_ok());
        assert!(classify_response("create_workspace", 401, EXISTS_BODY).is_ok());
    }

    #[test]
    fn test_classify_rejections() {
        let e = rejection(classify_response("create_workspace", 401, "Unauthorized"));
        assert!(e.detail.contains("credentials"));
        assert_eq!(e.operation, "create_workspace");

        let e = rejection(classify_response("remove_workspace", 403, ""));
        assert!(e.detail.contains("recurse"));

        let e = rejection(classify_response(
            "create_datastore",
            404,
            "Workspace &#39;bob&#39; not found",
        ));
        assert_eq!(e.detail, "workspace not found");

        let e = rejection(classify_response("publish_shapefile", 404, "No such data store: x"));
        assert_eq!(e.detail, "datastore not found");

        let e = rejection(classify_response("remove_shapefile", 404, "No such feature type: y"));
        assert_eq!(e.detail, "feature type not found");

        let e = rejection(classify_response("publish_shapefile", 500, " bad CRS \n"));
        assert_eq!(e.detail, "bad CRS");

        let e = rejection(classify_response("create_workspace", 403, ""));
        assert_eq!(e.detail, "HTTP error code [403]");
    }

    #[test]
    fn test_shapefile_info() {
        let path = Path::new("/data/user_workspaces/alice/shapefile_datastore/roads.shp");
        assert_eq!(
            shapefile_info(path),
            Some(("alice".to_string(), "roads".to_string()))
        );
        assert_eq!(
            shapefile_info(Path::new("/data/user_workspaces/alice/shapefile_datastore/roads.dbf")),
            None
        );
    }

    #[tokio::test]
    async fn test_client_duplicate_workspace_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/geoserver/rest/workspaces/"))
            .respond_with(ResponseTemplate::new(401).set_body_string(EXISTS_BODY))
            .mount(&server)
            .await;

        let client = GeoserverClient::new(
            &format!("{}/geoserver", server.uri()),
            Duration::from_secs(5),
            Some("admin".to_string()),
            Some("geoserver".to_string()),
        )
        .unwrap();

        assert!(client.create_workspace("alice").await.is_ok());
    }

    #[tokio::test]
    async fn test_client_unreachable_is_retryable() {
        let client =
            GeoserverClient::new("http://127.0.0.1:9", Duration::from_secs(2), None, None).unwrap();

        let err = client.remove_workspace("alice").await.unwrap_err();
        assert!(matches!(err, TaskError::Transport { .. }), "{err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_validate_waits_for_siblings() {
        let temp_dir = TempDir::new().unwrap();
        let dir = shapefile_dir(temp_dir.path(), "alice");
        fs::create_dir_all(&dir).unwrap();
        for ext in ["shp", "prj", "dbf"] {
            fs::write(dir.join(format!("roads.{ext}")), b"").unwrap();
        }

        let step = GeoserverStep {
            op: GeoserverOp::ValidateShapefile {
                workspace: "alice".to_string(),
                shapefile: "roads".to_string(),
            },
            client: Arc::new(
                GeoserverClient::new("http://127.0.0.1:9", Duration::from_secs(1), None, None)
                    .unwrap(),
            ),
            workspace_dir: temp_dir.path().to_path_buf(),
        };

        let err = step.run().await.unwrap_err();
        assert!(matches!(err, TaskError::Precondition { .. }));

        fs::write(dir.join("roads.shx"), b"").unwrap();
        assert!(step.run().await.is_ok());
    }

    async fn wait_for_request(server: &MockServer, http_method: &str, url_path: &str) -> bool {
        for _ in 0..100 {
            let seen = server.received_requests().await.unwrap_or_default();
            if seen
                .iter()
                .any(|r| r.method.as_str() == http_method && r.url.path() == url_path)
            {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_user_created_provisions_and_publishes() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("alice")).unwrap();

        let resolver = Arc::new(CallbackResolver::new());
        let registry = Arc::new(WatchRegistry::new(
            Arc::new(MemoryStore::new()),
            Arc::clone(&resolver),
        ));
        let context = HandlerContext {
            registry: Arc::clone(&registry),
            pool: TaskPool::new(tokio::runtime::Handle::current(), 2),
            retry: RetryPolicy::exponential(5, Duration::from_millis(20), Duration::from_millis(200))
                .with_jitter(false),
        };

        let config = HandlerConfig {
            active: true,
            priority: 1,
            url: Some(server.uri()),
            workspace_dir: Some(temp_dir.path().to_path_buf()),
            ..HandlerConfig::default()
        };
        let geoserver = Arc::new(Geoserver::new("Geoserver", &config, context).unwrap());
        let weak = Arc::downgrade(&geoserver);
        resolver
            .register_type::<Geoserver, _>(move || {
                weak.upgrade().map(|g| g as Arc<dyn FsCallback>)
            })
            .unwrap();

        geoserver.user_created("alice").unwrap();

        let dir = geoserver.shapefile_dir("alice");
        assert!(dir.is_dir());
        let watch = registry.get(&dir, Geoserver::QUALIFIED_NAME).unwrap();
        assert!(watch.recursive());

        assert!(wait_for_request(&server, "POST", "/rest/workspaces/").await);
        assert!(
            wait_for_request(
                &server,
                "PUT",
                "/rest/workspaces/alice/datastores/shapefile_datastore_alice"
            )
            .await
        );

        for ext in ["prj", "dbf", "shx", "shp"] {
            fs::write(dir.join(format!("roads.{ext}")), b"").unwrap();
        }
        assert!(
            wait_for_request(
                &server,
                "POST",
                "/rest/workspaces/alice/datastores/shapefile_datastore_alice/featuretypes"
            )
            .await
        );

        geoserver.user_deleted("alice").unwrap();
        assert!(registry.get(&dir, Geoserver::QUALIFIED_NAME).is_none());
        assert!(wait_for_request(&server, "DELETE", "/rest/workspaces/alice").await);
    }
}
