//! Remote-mode wire schema.
//!
//! Every manager operation is `POST {base_url}/{method}` with one of the
//! request structs below as JSON body. Responses are `{"data": <value>}`
//! envelopes; failures travel as `{"data": "Error: ..."}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::registry::SandboxType;

/// Schema version, sent in [`RPC_VERSION_HEADER`].
pub const RPC_VERSION: &str = "1";

/// Header carrying [`RPC_VERSION`].
pub const RPC_VERSION_HEADER: &str = "x-sandpool-rpc-version";

/// Envelope key holding a successful result.
pub const DEFAULT_SUCCESS_KEY: &str = "data";

/// Prefix of error payload strings.
pub const ERROR_PREFIX: &str = "Error: ";

/// Operations exposed over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerMethod {
    /// `create`
    Create,
    /// `create_from_pool`
    CreateFromPool,
    /// `release`
    Release,
    /// `start`
    Start,
    /// `stop`
    Stop,
    /// `get_info`
    GetInfo,
    /// `get_status`
    GetStatus,
    /// `cleanup`
    Cleanup,
    /// `call_tool`
    CallTool,
    /// `list_tools`
    ListTools,
    /// `add_mcp_servers`
    AddMcpServers,
    /// `connect`
    Connect,
    /// `release_session`
    ReleaseSession,
}

impl ManagerMethod {
    /// Every method, in routing order.
    pub const ALL: [Self; 13] = [
        Self::Create,
        Self::CreateFromPool,
        Self::Release,
        Self::Start,
        Self::Stop,
        Self::GetInfo,
        Self::GetStatus,
        Self::Cleanup,
        Self::CallTool,
        Self::ListTools,
        Self::AddMcpServers,
        Self::Connect,
        Self::ReleaseSession,
    ];

    /// Method name, also the URL path segment.
    pub fn name(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::CreateFromPool => "create_from_pool",
            Self::Release => "release",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::GetInfo => "get_info",
            Self::GetStatus => "get_status",
            Self::Cleanup => "cleanup",
            Self::CallTool => "call_tool",
            Self::ListTools => "list_tools",
            Self::AddMcpServers => "add_mcp_servers",
            Self::Connect => "connect",
            Self::ReleaseSession => "release_session",
        }
    }

    /// Route path (`/{name}`).
    pub fn path(self) -> String {
        format!("/{}", self.name())
    }
}

impl fmt::Display for ManagerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `create` arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Sandbox type; the manager default when absent.
    #[serde(default)]
    pub sandbox_type: Option<SandboxType>,
    /// Host workspace directory.
    #[serde(default)]
    pub mount_dir: Option<String>,
    /// Storage location of the workspace.
    #[serde(default)]
    pub storage_path: Option<String>,
    /// Extra environment; overrides the type's defaults.
    #[serde(default)]
    pub environment: Option<BTreeMap<String, Option<String>>>,
}

impl CreateRequest {
    /// Request for a sandbox of `sandbox_type` with no other options.
    pub fn of_type(sandbox_type: SandboxType) -> Self {
        Self {
            sandbox_type: Some(sandbox_type),
            ..Default::default()
        }
    }
}

/// `create_from_pool` arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFromPoolRequest {
    /// Sandbox type; the manager default when absent.
    #[serde(default)]
    pub sandbox_type: Option<SandboxType>,
}

/// Arguments of operations addressing one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRequest {
    /// Session id or container name.
    pub identity: String,
}

/// `call_tool` arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolRequest {
    /// Session id or container name.
    pub identity: String,
    /// Tool to invoke.
    pub tool_name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// `list_tools` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListToolsRequest {
    /// Session id or container name.
    pub identity: String,
    /// Tool type filter.
    #[serde(default)]
    pub tool_type: Option<String>,
}

/// `add_mcp_servers` arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddMcpServersRequest {
    /// Session id or container name.
    pub identity: String,
    /// MCP server configs.
    pub server_configs: Value,
    /// Replace servers with the same name.
    #[serde(default)]
    pub overwrite: bool,
}

/// `connect` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Caller session id.
    pub session_id: String,
    /// Caller user id.
    pub user_id: String,
    /// Sandbox types wanted for a new session.
    #[serde(default)]
    pub sandbox_types: Vec<SandboxType>,
}

/// `release_session` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Caller session id.
    pub session_id: String,
    /// Caller user id.
    pub user_id: String,
}

/// Arguments of operations without parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyRequest {}

/// Wraps a result in the default envelope.
pub fn envelope(value: Value) -> Value {
    let mut map = Map::new();
    map.insert(DEFAULT_SUCCESS_KEY.to_string(), value);
    Value::Object(map)
}

/// Error-shaped data value.
pub fn error_payload(message: impl fmt::Display) -> Value {
    Value::String(format!("{ERROR_PREFIX}{message}"))
}

/// Returns true for values produced by [`error_payload`].
pub fn is_error(value: &Value) -> bool {
    value.as_str().is_some_and(|s| s.starts_with(ERROR_PREFIX))
}
