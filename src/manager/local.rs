//! Local-mode manager: owns the container backend, mapping, pool queue and
//! storage, and runs the sandbox lifecycle.
//!
//! There are no locks in here. Consistency under concurrent use comes from
//! the stores: the in-memory ones assume a single manager, the Redis ones
//! make each single operation atomic across managers.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::rpc::{error_payload, CreateRequest};
use super::SandboxManagerApi;
use crate::backend::{ContainerBackend, ContainerSpec, DockerBackend, VolumeBinding};
use crate::client;
use crate::collections::{ContainerMapping, PoolQueue, Stores};
use crate::config::{BackendConfig, Config, ManagerSettings};
use crate::error::{ManagerError, Result};
use crate::model::{ContainerModel, ContainerStatus, Endpoints};
use crate::registry::{SandboxRegistry, SandboxType};
use crate::storage::{LocalStorage, Storage};

/// Stop timeout used while releasing.
const RELEASE_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Stop timeout used by [`SandboxManagerApi::stop`].
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Workspace path inside every container.
const WORKSPACE_DIR: &str = "/workspace";

/// Environment variable carrying the runtime token into the container.
const TOKEN_ENV: &str = "SECRET_TOKEN";

/// Collaborators of a [`LocalManager`].
pub struct LocalManagerParts {
    /// Manager settings.
    pub settings: ManagerSettings,
    /// Backend settings.
    pub backend_config: BackendConfig,
    /// Populated sandbox registry.
    pub registry: Arc<SandboxRegistry>,
    /// Container backend.
    pub backend: Arc<dyn ContainerBackend>,
    /// Mapping and pool stores.
    pub stores: Stores,
    /// Workspace storage.
    pub storage: Arc<dyn Storage>,
}

/// Manager running sandboxes on a backend it owns.
pub struct LocalManager {
    settings: ManagerSettings,
    backend_config: BackendConfig,
    registry: Arc<SandboxRegistry>,
    backend: Arc<dyn ContainerBackend>,
    containers: Arc<dyn ContainerMapping>,
    sessions: Arc<dyn ContainerMapping>,
    pool: Arc<dyn PoolQueue>,
    storage: Arc<dyn Storage>,
}

impl LocalManager {
    /// Builds a Docker-backed manager from `config`.
    ///
    /// # Errors
    ///
    /// Returns error if Docker or the configured stores are unreachable, or
    /// if the default sandbox type is not registered.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let registry = SandboxRegistry::with_builtins(&config.manager.image_tag)?;
        let backend = DockerBackend::connect(config.backend.host.clone()).await?;
        let stores = Stores::from_config(config.redis.as_ref())?;

        Self::new(LocalManagerParts {
            settings: config.manager.clone(),
            backend_config: config.backend.clone(),
            registry: Arc::new(registry),
            backend: Arc::new(backend),
            stores,
            storage: Arc::new(LocalStorage::new()),
        })
        .await
    }

    /// Assembles a manager and pre-creates `pool_size` warm containers.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSandboxType` if the default type is not registered.
    pub async fn new(parts: LocalManagerParts) -> Result<Self> {
        if !parts.registry.contains(&parts.settings.default_type) {
            return Err(ManagerError::unknown_sandbox_type(
                parts.settings.default_type.as_str(),
            ));
        }

        let manager = Self {
            settings: parts.settings,
            backend_config: parts.backend_config,
            registry: parts.registry,
            backend: parts.backend,
            containers: parts.stores.containers,
            sessions: parts.stores.sessions,
            pool: parts.stores.pool,
            storage: parts.storage,
        };
        manager.warm_pool().await;
        Ok(manager)
    }

    /// The registry this manager creates sandboxes from.
    pub fn registry(&self) -> &SandboxRegistry {
        &self.registry
    }

    /// Number of warm containers currently queued.
    pub async fn pool_len(&self) -> usize {
        self.pool.size().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read pool size");
            0
        })
    }

    /// Recent logs of a sandbox's container.
    pub async fn get_logs(&self, identity: &str, tail: Option<usize>) -> Option<String> {
        let model = self.get_info(identity).await?;
        self.backend
            .get_logs(&model.container_id, tail)
            .await
            .unwrap_or_else(|e| {
                warn!(container = %model.container_name, error = %e, "Failed to read logs");
                None
            })
    }

    fn container_key(&self, session_id: &str) -> String {
        format!("{}{}", self.settings.container_prefix, session_id)
    }

    fn session_key(&self, session_id: &str, user_id: &str) -> String {
        format!("{}{}:{}", self.settings.session_prefix, session_id, user_id)
    }

    fn session_mount_dir(&self, session_id: &str) -> PathBuf {
        Path::new(&self.settings.default_mount_dir).join(session_id)
    }

    fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.tool_timeout_secs)
    }

    async fn warm_pool(&self) {
        if self.settings.pool_size == 0 {
            return;
        }
        info!(pool_size = self.settings.pool_size, "Pre-creating pool containers");
        for _ in 0..self.settings.pool_size {
            if let Err(e) = self.top_up().await {
                warn!(error = %e, "Failed to pre-create pool container");
                break;
            }
        }
    }

    /// Adds one fresh default-type container to the pool if it is below
    /// `pool_size`.
    async fn top_up(&self) -> Result<()> {
        if self.pool.size().await? >= self.settings.pool_size {
            return Ok(());
        }

        let request = CreateRequest::of_type(self.settings.default_type.clone());
        let Some(name) = self.create(request).await? else {
            warn!("Pool top-up could not create a container");
            return Ok(());
        };
        let model = self
            .lookup(&name)
            .await?
            .ok_or_else(|| ManagerError::store(format!("{name} vanished from the mapping")))?;

        self.pool.enqueue(serde_json::to_value(&model)?).await?;
        debug!(container = %name, "Container added to pool");
        Ok(())
    }

    /// Dequeues pool entries until one is current and running. `Ok(None)`
    /// when `pool_size + 1` attempts produced nothing usable.
    async fn take_from_pool(&self) -> Result<Option<String>> {
        let default_type = &self.settings.default_type;
        let current_image = self
            .registry
            .image_by_type(default_type)
            .ok_or_else(|| ManagerError::unknown_sandbox_type(default_type.as_str()))?
            .to_string();

        for attempt in 0..=self.settings.pool_size {
            self.top_up().await?;

            let Some(entry) = self.pool.dequeue().await? else {
                debug!(attempt, "Pool is empty");
                continue;
            };
            let candidate: ContainerModel = serde_json::from_value(entry)?;

            if candidate.version != current_image {
                info!(
                    container = %candidate.container_name,
                    version = %candidate.version,
                    current = %current_image,
                    "Discarding outdated pool container"
                );
                self.release(&candidate.container_name).await;
                continue;
            }

            match self.backend.inspect(&candidate.container_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(container = %candidate.container_name, "Pool container no longer exists");
                    self.release(&candidate.container_name).await;
                    continue;
                }
                Err(e) => {
                    warn!(
                        container = %candidate.container_name,
                        error = %e,
                        "Failed to inspect pool container"
                    );
                    self.release(&candidate.container_name).await;
                    continue;
                }
            }

            match self.backend.get_status(&candidate.container_id).await {
                Ok(Some(status)) if status.is_running() => {
                    info!(container = %candidate.container_name, "Container taken from pool");
                    return Ok(Some(candidate.container_name));
                }
                other => {
                    warn!(
                        container = %candidate.container_name,
                        status = ?other,
                        "Pool container is not running"
                    );
                    self.release(&candidate.container_name).await;
                }
            }
        }

        Ok(None)
    }

    /// Mapping lookup by raw identity, then by the derived container key.
    async fn lookup(&self, identity: &str) -> Result<Option<ContainerModel>> {
        let entry = match self.containers.get(identity).await? {
            Some(entry) => Some(entry),
            None => self.containers.get(&self.container_key(identity)).await?,
        };
        entry
            .map(serde_json::from_value)
            .transpose()
            .map_err(ManagerError::from)
    }

    async fn launch(
        &self,
        sandbox_type: &SandboxType,
        session_id: &str,
        container_name: String,
        mount_dir: PathBuf,
        storage_path: Option<String>,
        mut environment: BTreeMap<String, String>,
    ) -> Result<String> {
        let config = self
            .registry
            .config_by_type(sandbox_type)
            .ok_or_else(|| ManagerError::unknown_sandbox_type(sandbox_type.as_str()))?;

        tokio::fs::create_dir_all(&mount_dir).await?;
        if let Some(storage_path) = &storage_path {
            if let Err(e) = self.storage.download_folder(storage_path, &mount_dir).await {
                warn!(storage_path = %storage_path, error = %e, "Failed to restore workspace");
            }
        }
        let mut volumes = vec![VolumeBinding {
            host: mount_dir.to_string_lossy().into_owned(),
            container: WORKSPACE_DIR.to_string(),
            readonly: false,
        }];
        volumes.extend(self.settings.readonly_mounts.iter().map(|mount| VolumeBinding {
            host: mount.host.clone(),
            container: mount.container.clone(),
            readonly: true,
        }));

        let runtime_token = Uuid::new_v4().simple().to_string();
        environment.insert(TOKEN_ENV.to_string(), runtime_token.clone());

        let spec = ContainerSpec {
            image: config.image_name.clone(),
            name: container_name.clone(),
            ports: vec![self.backend_config.container_port.clone()],
            volumes,
            environment,
            runtime_config: config.runtime_config.clone(),
        };

        let created = self
            .backend
            .create(&spec)
            .await?
            .ok_or_else(|| {
                ManagerError::backend(format!("backend did not create {container_name}"))
            })?;
        let Some(&port) = created.ports.first() else {
            let _ = self.backend.remove(&created.id, true).await;
            return Err(ManagerError::backend(format!("{container_name} published no ports")));
        };

        let endpoints = Endpoints::new(&created.host, port, &runtime_token);
        let model = ContainerModel {
            session_id: session_id.to_string(),
            container_id: created.id.clone(),
            container_name: container_name.clone(),
            base_url: endpoints.base_url,
            browser_url: endpoints.browser_url,
            front_browser_ws: endpoints.front_browser_ws,
            client_browser_ws: endpoints.client_browser_ws,
            artifacts_sio: endpoints.artifacts_sio,
            ports: created.ports,
            mount_dir: Some(mount_dir.to_string_lossy().into_owned()),
            storage_path,
            runtime_token,
            version: config.image_name.clone(),
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = self
            .containers
            .set(&container_name, serde_json::to_value(&model)?)
            .await
        {
            // Untracked containers would never be released.
            let _ = self.backend.remove(&created.id, true).await;
            return Err(e);
        }

        info!(
            container = %container_name,
            sandbox_type = %sandbox_type,
            image = %model.version,
            base_url = %model.base_url,
            "Sandbox created"
        );
        Ok(container_name)
    }

    /// Deletes the mapping entry, then tears the container down and
    /// persists its workspace.
    async fn teardown(&self, model: &ContainerModel) -> Result<()> {
        self.containers.delete(&model.container_name).await?;

        if !self
            .backend
            .stop(&model.container_id, RELEASE_STOP_TIMEOUT)
            .await?
        {
            warn!(container = %model.container_name, "Backend did not stop container");
        }
        if !self.backend.remove(&model.container_id, true).await? {
            warn!(container = %model.container_name, "Backend did not remove container");
        }

        if let (Some(mount_dir), Some(storage_path)) = (&model.mount_dir, &model.storage_path) {
            if let Err(e) = self
                .storage
                .upload_folder(Path::new(mount_dir), storage_path)
                .await
            {
                warn!(storage_path = %storage_path, error = %e, "Failed to persist workspace");
            }
        }
        Ok(())
    }

    async fn session_containers(&self, key: &str) -> Vec<String> {
        match self.sessions.get(key).await {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(session = %key, error = %e, "Malformed session entry");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(session = %key, error = %e, "Failed to read session entry");
                Vec::new()
            }
        }
    }
}

/// Config defaults overlaid with caller values. `Err(key)` names the first
/// variable left without a value.
fn merge_environment(
    defaults: &BTreeMap<String, Option<String>>,
    overrides: Option<&BTreeMap<String, Option<String>>>,
) -> std::result::Result<BTreeMap<String, String>, String> {
    let mut merged = defaults.clone();
    if let Some(overrides) = overrides {
        merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
        .into_iter()
        .map(|(key, value)| value.map(|value| (key.clone(), value)).ok_or(key))
        .collect()
}

#[async_trait]
impl SandboxManagerApi for LocalManager {
    async fn create(&self, request: CreateRequest) -> Result<Option<String>> {
        let sandbox_type = request
            .sandbox_type
            .unwrap_or_else(|| self.settings.default_type.clone());

        let Some(config) = self.registry.config_by_type(&sandbox_type) else {
            error!(sandbox_type = %sandbox_type, "No sandbox registered for type");
            return Ok(None);
        };

        let environment =
            match merge_environment(&config.environment, request.environment.as_ref()) {
                Ok(environment) => environment,
                Err(key) => {
                    error!(
                        sandbox_type = %sandbox_type,
                        variable = %key,
                        "Environment variable has no value"
                    );
                    return Ok(None);
                }
            };

        let session_id = Uuid::new_v4().simple().to_string();
        let container_name = self.container_key(&session_id);

        let mount_dir = request
            .mount_dir
            .map_or_else(|| self.session_mount_dir(&session_id), PathBuf::from);
        let storage_path = request.storage_path.or_else(|| {
            self.settings
                .storage_folder
                .as_ref()
                .map(|folder| self.storage.path_join(&[folder.as_str(), session_id.as_str()]))
        });

        match self.backend.inspect(&container_name).await {
            Ok(None) => {}
            Ok(Some(_)) => return Err(ManagerError::name_collision(container_name)),
            Err(e) => {
                error!(container = %container_name, error = %e, "Failed to check container name");
                return Ok(None);
            }
        }

        match self
            .launch(
                &sandbox_type,
                &session_id,
                container_name,
                mount_dir,
                storage_path,
                environment,
            )
            .await
        {
            Ok(name) => Ok(Some(name)),
            Err(e) => {
                error!(sandbox_type = %sandbox_type, error = %e, "Failed to create sandbox");
                Ok(None)
            }
        }
    }

    async fn create_from_pool(&self, sandbox_type: Option<SandboxType>) -> Option<String> {
        let default_type = self.settings.default_type.clone();
        let sandbox_type = sandbox_type.unwrap_or_else(|| default_type.clone());

        if sandbox_type == default_type {
            match self.take_from_pool().await {
                Ok(Some(name)) => return Some(name),
                Ok(None) => warn!("No healthy pool container, creating a new one"),
                Err(e) => warn!(error = %e, "Pool retrieval failed, creating a new one"),
            }
        }

        self.create(CreateRequest::of_type(sandbox_type))
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Failed to create sandbox");
                None
            })
    }

    async fn release(&self, identity: &str) -> bool {
        let model = match self.lookup(identity).await {
            Ok(Some(model)) => model,
            Ok(None) => {
                debug!(identity, "Nothing to release");
                return true;
            }
            Err(e) => {
                error!(identity, error = %e, "Failed to look up sandbox");
                return false;
            }
        };

        match self.teardown(&model).await {
            Ok(()) => {
                info!(container = %model.container_name, "Sandbox released");
                true
            }
            Err(e) => {
                error!(
                    container = %model.container_name,
                    container_id = %model.container_id,
                    error = %e,
                    "Failed to release sandbox; container may be left running"
                );
                false
            }
        }
    }

    async fn start(&self, identity: &str) -> bool {
        let Some(model) = self.get_info(identity).await else {
            warn!(identity, "Cannot start unknown sandbox");
            return false;
        };

        if let Err(e) = self.backend.start(&model.container_id).await {
            error!(container = %model.container_name, error = %e, "Failed to start container");
            return false;
        }

        match self.backend.get_status(&model.container_id).await {
            Ok(Some(ContainerStatus::Running)) => true,
            other => {
                warn!(
                    container = %model.container_name,
                    status = ?other,
                    "Container is not running after start"
                );
                false
            }
        }
    }

    async fn stop(&self, identity: &str) -> bool {
        let Some(model) = self.get_info(identity).await else {
            debug!(identity, "Sandbox already gone");
            return true;
        };

        if let Err(e) = self.backend.stop(&model.container_id, STOP_TIMEOUT).await {
            error!(container = %model.container_name, error = %e, "Failed to stop container");
            return false;
        }

        match self.backend.get_status(&model.container_id).await {
            Ok(Some(ContainerStatus::Exited)) => true,
            other => {
                warn!(
                    container = %model.container_name,
                    status = ?other,
                    "Container did not exit after stop"
                );
                false
            }
        }
    }

    async fn get_info(&self, identity: &str) -> Option<ContainerModel> {
        self.lookup(identity).await.unwrap_or_else(|e| {
            warn!(identity, error = %e, "Failed to look up sandbox");
            None
        })
    }

    async fn get_status(&self, identity: &str) -> Option<ContainerStatus> {
        let model = self.get_info(identity).await?;
        self.backend
            .get_status(&model.container_id)
            .await
            .unwrap_or_else(|e| {
                warn!(container = %model.container_name, error = %e, "Failed to read status");
                None
            })
    }

    async fn cleanup(&self) {
        info!("Cleaning up all sandboxes");

        loop {
            match self.pool.dequeue().await {
                Ok(Some(entry)) => match serde_json::from_value::<ContainerModel>(entry) {
                    Ok(model) => {
                        if !self.release(&model.container_name).await {
                            warn!(
                                container = %model.container_name,
                                "Failed to release pool container"
                            );
                        }
                    }
                    Err(e) => warn!(error = %e, "Skipping malformed pool entry"),
                },
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to drain pool");
                    break;
                }
            }
        }

        match self.containers.scan(&self.settings.container_prefix).await {
            Ok(keys) => {
                for key in keys {
                    if !self.release(&key).await {
                        warn!(container = %key, "Failed to release container");
                    }
                }
            }
            Err(e) => error!(error = %e, "Failed to scan container mapping"),
        }

        match self.sessions.scan(&self.settings.session_prefix).await {
            Ok(keys) => {
                for key in keys {
                    if let Err(e) = self.sessions.delete(&key).await {
                        warn!(session = %key, error = %e, "Failed to delete session entry");
                    }
                }
            }
            Err(e) => error!(error = %e, "Failed to scan session mapping"),
        }
    }

    async fn call_tool(&self, identity: &str, tool_name: &str, arguments: Value) -> Value {
        let Some(model) = self.get_info(identity).await else {
            return error_payload(format!("sandbox {identity} not found"));
        };
        let result = match client::for_container(&model, self.tool_timeout()) {
            Ok(client) => client.call_tool(tool_name, arguments).await,
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            warn!(
                container = %model.container_name,
                tool = tool_name,
                error = %e,
                "Tool call failed"
            );
            error_payload(e)
        })
    }

    async fn list_tools(&self, identity: &str, tool_type: Option<&str>) -> Value {
        let Some(model) = self.get_info(identity).await else {
            return error_payload(format!("sandbox {identity} not found"));
        };
        let result = match client::for_container(&model, self.tool_timeout()) {
            Ok(client) => client.list_tools(tool_type).await,
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            warn!(container = %model.container_name, error = %e, "Listing tools failed");
            error_payload(e)
        })
    }

    async fn add_mcp_servers(
        &self,
        identity: &str,
        server_configs: Value,
        overwrite: bool,
    ) -> Value {
        let Some(model) = self.get_info(identity).await else {
            return error_payload(format!("sandbox {identity} not found"));
        };
        let result = match client::for_container(&model, self.tool_timeout()) {
            Ok(client) => client.add_mcp_servers(server_configs, overwrite).await,
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            warn!(container = %model.container_name, error = %e, "Adding MCP servers failed");
            error_payload(e)
        })
    }

    async fn connect(
        &self,
        session_id: &str,
        user_id: &str,
        sandbox_types: &[SandboxType],
    ) -> Vec<String> {
        let key = self.session_key(session_id, user_id);
        let recorded = self.session_containers(&key).await;

        let mut live = Vec::new();
        for name in &recorded {
            if let Some(model) = self.get_info(name).await {
                live.push(model);
            }
        }

        let default_types = [self.settings.default_type.clone()];
        let sandbox_types = if sandbox_types.is_empty() {
            &default_types[..]
        } else {
            sandbox_types
        };

        // Each requested type reuses a live container with its image, or
        // gets a new one.
        let mut names = Vec::with_capacity(sandbox_types.len());
        for sandbox_type in sandbox_types {
            let image = self.registry.image_by_type(sandbox_type);
            if let Some(pos) = live.iter().position(|m| Some(m.version.as_str()) == image) {
                names.push(live.remove(pos).container_name);
                continue;
            }
            match self.create_from_pool(Some(sandbox_type.clone())).await {
                Some(name) => names.push(name),
                None => warn!(
                    session = %key,
                    sandbox_type = %sandbox_type,
                    "No sandbox for session"
                ),
            }
        }
        // Live containers of types not asked for this time stay with the
        // session so release_session still finds them.
        names.extend(live.into_iter().map(|m| m.container_name));

        if names == recorded {
            debug!(session = %key, containers = ?names, "Reusing session sandboxes");
            return names;
        }

        let stored = if names.is_empty() {
            self.sessions.delete(&key).await
        } else {
            match serde_json::to_value(&names) {
                Ok(value) => self.sessions.set(&key, value).await,
                Err(e) => Err(e.into()),
            }
        };
        if let Err(e) = stored {
            error!(session = %key, error = %e, "Failed to record session sandboxes");
        }
        info!(session = %key, containers = ?names, "Session connected");
        names
    }

    async fn release_session(&self, session_id: &str, user_id: &str) -> bool {
        let key = self.session_key(session_id, user_id);
        let names = self.session_containers(&key).await;

        if let Err(e) = self.sessions.delete(&key).await {
            error!(session = %key, error = %e, "Failed to delete session entry");
            return false;
        }

        let mut released = true;
        for name in names {
            released &= self.release(&name).await;
        }
        released
    }
}
