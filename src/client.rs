//! Clients for the tool server running inside a sandbox container.
//!
//! A client is built per call from the container's record and dropped
//! afterwards. Images whose version string carries a training marker speak
//! the training-environment protocol instead of the plain tool API.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{ManagerError, Result};
use crate::model::ContainerModel;

/// Version substrings identifying training-environment images.
pub const TRAINING_IMAGE_MARKERS: &[&str] = &["training", "appworld", "bfcl"];

/// Tool invocation surface of a sandbox.
#[async_trait]
pub trait ToolClient: Send + Sync {
    /// Invokes `tool_name` with `arguments` and returns the response envelope.
    async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value>;

    /// Lists available tools, optionally filtered by tool type.
    async fn list_tools(&self, tool_type: Option<&str>) -> Result<Value>;

    /// Registers MCP servers inside the sandbox.
    async fn add_mcp_servers(&self, server_configs: Value, overwrite: bool) -> Result<Value>;
}

/// Returns true if `version` names a training-environment image.
pub fn is_training_image(version: &str) -> bool {
    let version = version.to_lowercase();
    TRAINING_IMAGE_MARKERS
        .iter()
        .any(|marker| version.contains(marker))
}

/// Builds the client matching the container's image.
pub fn for_container(model: &ContainerModel, timeout: Duration) -> Result<Box<dyn ToolClient>> {
    let http = reqwest::Client::builder().timeout(timeout).build()?;
    let endpoint = Endpoint {
        http,
        base_url: model.base_url.trim_end_matches('/').to_string(),
        token: model.runtime_token.clone(),
    };

    if is_training_image(&model.version) {
        debug!(container = %model.container_name, "Using training environment client");
        Ok(Box::new(TrainingEnvClient { endpoint }))
    } else {
        Ok(Box::new(SandboxHttpClient { endpoint }))
    }
}

struct Endpoint {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl Endpoint {
    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "Calling sandbox tool server");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ManagerError::tool_client(format!(
                "{url} returned {status}: {body}"
            )));
        }

        Ok(response.json().await?)
    }
}

/// Plain tool API client.
pub struct SandboxHttpClient {
    endpoint: Endpoint,
}

#[async_trait]
impl ToolClient for SandboxHttpClient {
    async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        self.endpoint
            .post(
                "/tools/call",
                &json!({ "tool_name": tool_name, "arguments": arguments }),
            )
            .await
    }

    async fn list_tools(&self, tool_type: Option<&str>) -> Result<Value> {
        self.endpoint
            .post("/tools/list", &json!({ "tool_type": tool_type }))
            .await
    }

    async fn add_mcp_servers(&self, server_configs: Value, overwrite: bool) -> Result<Value> {
        self.endpoint
            .post(
                "/mcp/add_servers",
                &json!({ "server_configs": server_configs, "overwrite": overwrite }),
            )
            .await
    }
}

/// Training-environment protocol client.
pub struct TrainingEnvClient {
    endpoint: Endpoint,
}

#[async_trait]
impl ToolClient for TrainingEnvClient {
    async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        self.endpoint
            .post(
                "/env/step",
                &json!({ "action": { "name": tool_name, "params": arguments } }),
            )
            .await
    }

    async fn list_tools(&self, tool_type: Option<&str>) -> Result<Value> {
        self.endpoint
            .post("/env/tools", &json!({ "tool_type": tool_type }))
            .await
    }

    async fn add_mcp_servers(&self, _server_configs: Value, _overwrite: bool) -> Result<Value> {
        Err(ManagerError::tool_client(
            "training environments do not accept MCP servers",
        ))
    }
}
