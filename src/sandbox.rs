//! User-facing handle on a single sandbox.
//!
//! A [`Sandbox`] either embeds its own local manager or talks to a remote
//! one. Embedded handles tear the whole manager down on [`Sandbox::close`];
//! handles on a shared manager only release their own container.

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ManagerError, Result};
use crate::manager::{LocalManager, RemoteManagerClient, SandboxManagerApi};
use crate::model::ContainerModel;
use crate::registry::SandboxType;

/// Handle on one sandbox container.
pub struct Sandbox {
    manager: Arc<dyn SandboxManagerApi>,
    sandbox_id: String,
    sandbox_type: SandboxType,
    embedded: bool,
    closed: bool,
}

impl Sandbox {
    /// Starts a private local manager from `config` and acquires a sandbox.
    ///
    /// # Errors
    ///
    /// Returns error if the manager cannot start or no sandbox is available.
    pub async fn embedded(config: &Config, sandbox_type: Option<SandboxType>) -> Result<Self> {
        config.validate()?;
        let manager: Arc<dyn SandboxManagerApi> =
            Arc::new(LocalManager::from_config(config).await?);
        Self::embed(manager, sandbox_type).await
    }

    /// Acquires a sandbox from a manager this handle owns outright. On
    /// failure the manager is cleaned up, taking its warm pool with it.
    async fn embed(
        manager: Arc<dyn SandboxManagerApi>,
        sandbox_type: Option<SandboxType>,
    ) -> Result<Self> {
        match Self::attach(manager.clone(), None, sandbox_type).await {
            Ok(mut sandbox) => {
                sandbox.embedded = true;
                Ok(sandbox)
            }
            Err(e) => {
                warn!(error = %e, "Embedded manager produced no sandbox, cleaning up");
                manager.cleanup().await;
                Err(e)
            }
        }
    }

    /// Acquires a sandbox from the manager server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns error if the client cannot be built or no sandbox is available.
    pub async fn remote(
        base_url: &str,
        bearer_token: Option<&str>,
        sandbox_type: Option<SandboxType>,
    ) -> Result<Self> {
        let manager: Arc<dyn SandboxManagerApi> =
            Arc::new(RemoteManagerClient::new(base_url, bearer_token)?);
        Self::attach(manager, None, sandbox_type).await
    }

    /// Binds to `sandbox_id` on `manager`, or acquires a new sandbox from
    /// its pool when no id is given.
    ///
    /// # Errors
    ///
    /// Returns `NoSandboxAvailable` if the manager produced no sandbox.
    pub async fn attach(
        manager: Arc<dyn SandboxManagerApi>,
        sandbox_id: Option<String>,
        sandbox_type: Option<SandboxType>,
    ) -> Result<Self> {
        let sandbox_type = sandbox_type.unwrap_or_default();
        let sandbox_id = match sandbox_id {
            Some(id) => id,
            None => manager
                .create_from_pool(Some(sandbox_type.clone()))
                .await
                .ok_or_else(|| {
                    ManagerError::no_sandbox_available(format!(
                        "manager returned no {sandbox_type} sandbox"
                    ))
                })?,
        };

        info!(sandbox = %sandbox_id, sandbox_type = %sandbox_type, "Sandbox attached");
        Ok(Self {
            manager,
            sandbox_id,
            sandbox_type,
            embedded: false,
            closed: false,
        })
    }

    /// Container name of this sandbox.
    pub fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    /// Type this sandbox was acquired as.
    pub fn sandbox_type(&self) -> &SandboxType {
        &self.sandbox_type
    }

    /// Invokes a tool.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Value {
        self.manager
            .call_tool(&self.sandbox_id, tool_name, arguments)
            .await
    }

    /// Lists available tools.
    pub async fn list_tools(&self, tool_type: Option<&str>) -> Value {
        self.manager.list_tools(&self.sandbox_id, tool_type).await
    }

    /// Registers MCP servers.
    pub async fn add_mcp_servers(&self, server_configs: Value, overwrite: bool) -> Value {
        self.manager
            .add_mcp_servers(&self.sandbox_id, server_configs, overwrite)
            .await
    }

    /// Container record, if the sandbox still exists.
    pub async fn get_info(&self) -> Option<ContainerModel> {
        self.manager.get_info(&self.sandbox_id).await
    }

    /// Releases the sandbox. Embedded handles also clean up everything their
    /// manager created, including the pool.
    pub async fn close(mut self) -> bool {
        self.closed = true;
        if self.embedded {
            self.manager.cleanup().await;
            true
        } else {
            self.manager.release(&self.sandbox_id).await
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                sandbox = %self.sandbox_id,
                "Sandbox dropped without close(); container left running"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::collections::Stores;
    use crate::config::{BackendConfig, ManagerSettings};
    use crate::manager::LocalManagerParts;
    use crate::registry::SandboxRegistry;
    use crate::storage::LocalStorage;
    use serde_json::json;

    async fn local_manager(pool_size: usize, backend: &MockBackend) -> Arc<dyn SandboxManagerApi> {
        Arc::new(
            LocalManager::new(LocalManagerParts {
                settings: ManagerSettings {
                    pool_size,
                    ..Default::default()
                },
                backend_config: BackendConfig::default(),
                registry: Arc::new(SandboxRegistry::with_builtins("latest").unwrap()),
                backend: Arc::new(backend.clone()),
                stores: Stores::in_memory(),
                storage: Arc::new(LocalStorage::new()),
            })
            .await
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_attach_acquires_from_pool_and_close_releases() {
        let backend = MockBackend::new();
        let manager = local_manager(1, &backend).await;

        let sandbox = Sandbox::attach(manager.clone(), None, None).await.unwrap();
        assert!(sandbox.sandbox_id().starts_with("sandpool_container_"));
        assert_eq!(sandbox.sandbox_type(), &SandboxType::base());
        let info = sandbox.get_info().await.unwrap();
        assert_eq!(info.container_name, sandbox.sandbox_id());

        let id = sandbox.sandbox_id().to_string();
        assert!(sandbox.close().await);
        assert!(manager.get_info(&id).await.is_none());
        assert_eq!(backend.live_count(), 0);
    }

    #[tokio::test]
    async fn test_attach_existing_id() {
        let backend = MockBackend::new();
        let manager = local_manager(0, &backend).await;
        let id = manager.create_from_pool(None).await.unwrap();

        let sandbox = Sandbox::attach(manager.clone(), Some(id.clone()), None)
            .await
            .unwrap();
        assert_eq!(sandbox.sandbox_id(), id);
        assert_eq!(backend.create_count(), 1);
        assert!(sandbox.close().await);
    }

    #[tokio::test]
    async fn test_attach_fails_when_nothing_available() {
        let backend = MockBackend::new();
        backend.set_fail_create(true);
        let manager = local_manager(0, &backend).await;

        let err = Sandbox::attach(manager, None, None).await.err().unwrap();
        assert!(err.is_no_sandbox_available());
    }

    #[tokio::test]
    async fn test_embedded_close_cleans_up_everything() {
        let backend = MockBackend::new();
        let manager = local_manager(2, &backend).await;

        let sandbox = Sandbox::embed(manager, None).await.unwrap();
        assert!(backend.live_count() >= 2);

        assert!(sandbox.close().await);
        assert_eq!(backend.live_count(), 0);
    }

    #[tokio::test]
    async fn test_embedded_failure_cleans_up_warm_pool() {
        let backend = MockBackend::new();
        let manager = local_manager(2, &backend).await;
        assert_eq!(backend.live_count(), 2);
        backend.set_fail_create(true);

        let err = Sandbox::embed(manager.clone(), Some(SandboxType::new("browser")))
            .await
            .err()
            .unwrap();
        assert!(err.is_no_sandbox_available());
        assert_eq!(backend.live_count(), 0);
        assert!(manager.create_from_pool(None).await.is_none());
    }

    #[tokio::test]
    async fn test_tool_calls_on_missing_sandbox_return_error_payload() {
        let backend = MockBackend::new();
        let manager = local_manager(0, &backend).await;
        let sandbox = Sandbox::attach(manager, Some("gone".to_string()), None)
            .await
            .unwrap();

        let result = sandbox.call_tool("run_shell_command", json!({})).await;
        assert!(crate::manager::rpc::is_error(&result));
        assert!(crate::manager::rpc::is_error(&sandbox.list_tools(None).await));
        assert!(sandbox.close().await);
    }

    #[tokio::test]
    async fn test_remote_without_server_fails() {
        let err = Sandbox::remote("http://127.0.0.1:1", None, None)
            .await
            .err()
            .unwrap();
        assert!(err.is_no_sandbox_available());
    }
}
