//! Sandbox manager.
//!
//! [`SandboxManagerApi`] is implemented twice: [`LocalManager`] owns the
//! backend, mapping, pool and storage and runs the lifecycle itself;
//! [`RemoteManagerClient`] forwards each call over HTTP to a manager served
//! by [`crate::server`]. [`build_manager`] picks one from the config.
//!
//! Failures follow the same contract in both modes: creates yield `None`,
//! mutations yield `false`, reads yield `None`, and tool calls yield an
//! `"Error: ..."` payload. Only [`SandboxManagerApi::create`] returns `Err`,
//! for a container name collision in local mode.

mod local;
mod remote;
pub mod rpc;

pub use local::{LocalManager, LocalManagerParts};
pub use remote::RemoteManagerClient;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::model::{ContainerModel, ContainerStatus};
use crate::registry::SandboxType;
use rpc::CreateRequest;

/// Operations shared by local and remote managers.
#[async_trait]
pub trait SandboxManagerApi: Send + Sync {
    /// Creates a sandbox and returns its container name.
    async fn create(&self, request: CreateRequest) -> Result<Option<String>>;

    /// Hands out a warm sandbox of the default type, creating one if the
    /// pool cannot supply a healthy, current container.
    async fn create_from_pool(&self, sandbox_type: Option<SandboxType>) -> Option<String>;

    /// Releases a sandbox. Unknown identities count as already released.
    async fn release(&self, identity: &str) -> bool;

    /// Starts a stopped sandbox and verifies it is running.
    async fn start(&self, identity: &str) -> bool;

    /// Stops a sandbox and verifies it exited.
    async fn stop(&self, identity: &str) -> bool;

    /// Container record by session id or container name.
    async fn get_info(&self, identity: &str) -> Option<ContainerModel>;

    /// Backend status by session id or container name.
    async fn get_status(&self, identity: &str) -> Option<ContainerStatus>;

    /// Releases every pooled and mapped sandbox.
    async fn cleanup(&self);

    /// Invokes a tool inside a sandbox.
    async fn call_tool(&self, identity: &str, tool_name: &str, arguments: Value) -> Value;

    /// Lists a sandbox's tools.
    async fn list_tools(&self, identity: &str, tool_type: Option<&str>) -> Value;

    /// Registers MCP servers inside a sandbox.
    async fn add_mcp_servers(&self, identity: &str, server_configs: Value, overwrite: bool)
        -> Value;

    /// Returns the sandboxes bound to `(session_id, user_id)`, creating
    /// one per requested type on first use.
    async fn connect(
        &self,
        session_id: &str,
        user_id: &str,
        sandbox_types: &[SandboxType],
    ) -> Vec<String>;

    /// Releases every sandbox bound to `(session_id, user_id)`.
    async fn release_session(&self, session_id: &str, user_id: &str) -> bool;
}

/// Builds the manager selected by `config`: remote when
/// `manager.base_url` is set, local otherwise.
///
/// # Errors
///
/// Returns error if the remote client cannot be built, or if the local
/// backend or stores cannot be reached.
pub async fn build_manager(config: &Config) -> Result<Arc<dyn SandboxManagerApi>> {
    config.validate()?;
    match &config.manager.base_url {
        Some(base_url) => Ok(Arc::new(RemoteManagerClient::new(
            base_url,
            config.manager.bearer_token.as_deref(),
        )?)),
        None => Ok(Arc::new(LocalManager::from_config(config).await?)),
    }
}
