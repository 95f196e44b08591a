//! Remote-mode manager: forwards every operation to a manager server.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::rpc::{
    error_payload, is_error, AddMcpServersRequest, CallToolRequest, ConnectRequest,
    CreateFromPoolRequest, CreateRequest, EmptyRequest, IdentityRequest, ListToolsRequest,
    ManagerMethod, SessionRequest, DEFAULT_SUCCESS_KEY, RPC_VERSION, RPC_VERSION_HEADER,
};
use super::SandboxManagerApi;
use crate::error::{ManagerError, Result};
use crate::model::{ContainerModel, ContainerStatus};
use crate::registry::SandboxType;

/// Timeout for a single manager request. Creates can pull images, so this
/// is generous.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// HTTP client for a manager served by [`crate::server`].
pub struct RemoteManagerClient {
    http: reqwest::Client,
    base_url: String,
    success_key: String,
}

impl RemoteManagerClient {
    /// Creates a client for the manager at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns error if the token is not a valid header value or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str, bearer_token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(RPC_VERSION_HEADER, HeaderValue::from_static(RPC_VERSION));
        if let Some(token) = bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ManagerError::config(format!("Invalid bearer token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            success_key: DEFAULT_SUCCESS_KEY.to_string(),
        })
    }

    /// Reads results from `key` instead of `"data"`.
    #[must_use]
    pub fn with_success_key(mut self, key: impl Into<String>) -> Self {
        self.success_key = key.into();
        self
    }

    /// The server this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns true if the server answers its health check.
    pub async fn check_health(&self) -> bool {
        match self
            .http
            .get(format!("{}/healthz", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Manager health check failed");
                false
            }
        }
    }

    /// Posts `body` to `method` and returns the enveloped result, or an
    /// error payload on any failure.
    async fn request<B: Serialize + Sync>(&self, method: ManagerMethod, body: &B) -> Value {
        let url = format!("{}{}", self.base_url, method.path());
        debug!(url = %url, "Calling remote manager");

        let response = match self.http.post(&url).json(body).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(method = %method, error = %e, "Remote manager unreachable");
                return error_payload(e);
            }
        };

        let status = response.status();
        let payload: Value = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(method = %method, status = %status, error = %e, "Malformed manager response");
                return error_payload(format!("{status}: {e}"));
            }
        };

        if !status.is_success() {
            let detail = match payload.get("detail") {
                Some(Value::String(detail)) => detail.clone(),
                Some(other) => other.to_string(),
                None => payload.to_string(),
            };
            warn!(
                method = %method,
                status = %status,
                detail = %detail,
                "Remote manager call failed"
            );
            return error_payload(format!("{status}: {detail}"));
        }

        match payload.get(&self.success_key) {
            Some(data) => data.clone(),
            None => error_payload(format!("response has no {:?} key", self.success_key)),
        }
    }

    async fn request_bool<B: Serialize + Sync>(&self, method: ManagerMethod, body: &B) -> bool {
        self.request(method, body).await.as_bool().unwrap_or(false)
    }

    async fn request_typed<T, B>(&self, method: ManagerMethod, body: &B) -> Option<T>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        let data = self.request(method, body).await;
        if data.is_null() || is_error(&data) {
            return None;
        }
        serde_json::from_value(data)
            .map_err(|e| warn!(method = %method, error = %e, "Unexpected result shape"))
            .ok()
    }
}

fn identity(identity: &str) -> IdentityRequest {
    IdentityRequest {
        identity: identity.to_string(),
    }
}

#[async_trait]
impl SandboxManagerApi for RemoteManagerClient {
    async fn create(&self, request: CreateRequest) -> Result<Option<String>> {
        let data = self.request(ManagerMethod::Create, &request).await;
        if is_error(&data) {
            warn!(result = %data, "Remote create failed");
            return Ok(None);
        }
        Ok(data.as_str().map(str::to_string))
    }

    async fn create_from_pool(&self, sandbox_type: Option<SandboxType>) -> Option<String> {
        self.request_typed(
            ManagerMethod::CreateFromPool,
            &CreateFromPoolRequest { sandbox_type },
        )
        .await
    }

    async fn release(&self, id: &str) -> bool {
        self.request_bool(ManagerMethod::Release, &identity(id)).await
    }

    async fn start(&self, id: &str) -> bool {
        self.request_bool(ManagerMethod::Start, &identity(id)).await
    }

    async fn stop(&self, id: &str) -> bool {
        self.request_bool(ManagerMethod::Stop, &identity(id)).await
    }

    async fn get_info(&self, id: &str) -> Option<ContainerModel> {
        self.request_typed(ManagerMethod::GetInfo, &identity(id)).await
    }

    async fn get_status(&self, id: &str) -> Option<ContainerStatus> {
        let status: String = self
            .request_typed(ManagerMethod::GetStatus, &identity(id))
            .await?;
        status.parse().ok()
    }

    async fn cleanup(&self) {
        let result = self.request(ManagerMethod::Cleanup, &EmptyRequest {}).await;
        if is_error(&result) {
            warn!(result = %result, "Remote cleanup failed");
        }
    }

    async fn call_tool(&self, id: &str, tool_name: &str, arguments: Value) -> Value {
        self.request(
            ManagerMethod::CallTool,
            &CallToolRequest {
                identity: id.to_string(),
                tool_name: tool_name.to_string(),
                arguments,
            },
        )
        .await
    }

    async fn list_tools(&self, id: &str, tool_type: Option<&str>) -> Value {
        self.request(
            ManagerMethod::ListTools,
            &ListToolsRequest {
                identity: id.to_string(),
                tool_type: tool_type.map(str::to_string),
            },
        )
        .await
    }

    async fn add_mcp_servers(&self, id: &str, server_configs: Value, overwrite: bool) -> Value {
        self.request(
            ManagerMethod::AddMcpServers,
            &AddMcpServersRequest {
                identity: id.to_string(),
                server_configs,
                overwrite,
            },
        )
        .await
    }

    async fn connect(
        &self,
        session_id: &str,
        user_id: &str,
        sandbox_types: &[SandboxType],
    ) -> Vec<String> {
        self.request_typed(
            ManagerMethod::Connect,
            &ConnectRequest {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                sandbox_types: sandbox_types.to_vec(),
            },
        )
        .await
        .unwrap_or_default()
    }

    async fn release_session(&self, session_id: &str, user_id: &str) -> bool {
        self.request_bool(
            ManagerMethod::ReleaseSession,
            &SessionRequest {
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
            },
        )
        .await
    }
}
