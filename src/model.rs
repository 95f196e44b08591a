//! Persisted container records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ManagerError;

/// Record of a live container, persisted in the container mapping from
/// `create` until `release` completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerModel {
    /// Caller-facing correlation key.
    pub session_id: String,
    /// Backend-facing handle.
    pub container_id: String,
    /// Generated container name; also the mapping key.
    pub container_name: String,
    /// Tool server base URL.
    pub base_url: String,
    /// Browser API URL.
    pub browser_url: String,
    /// Websocket for the browser cast stream.
    pub front_browser_ws: String,
    /// Websocket for browser client sessions.
    pub client_browser_ws: String,
    /// Artifact event endpoint.
    pub artifacts_sio: String,
    /// Published host ports.
    pub ports: Vec<u16>,
    /// Host directory mounted as the workspace.
    pub mount_dir: Option<String>,
    /// Storage location the workspace is restored from and uploaded to.
    pub storage_path: Option<String>,
    /// Bearer credential for the container's tool server.
    pub runtime_token: String,
    /// Image the container was created from.
    pub version: String,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// URLs derived from a container's host, port and runtime token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Tool server base URL.
    pub base_url: String,
    /// Browser API URL.
    pub browser_url: String,
    /// Browser cast websocket.
    pub front_browser_ws: String,
    /// Browser client websocket.
    pub client_browser_ws: String,
    /// Artifact event endpoint.
    pub artifacts_sio: String,
}

impl Endpoints {
    /// Builds the endpoint set for a container reachable at `host:port`.
    pub fn new(host: &str, port: u16, runtime_token: &str) -> Self {
        Self {
            base_url: format!("http://{host}:{port}"),
            browser_url: format!("http://{host}:{port}/browser/{runtime_token}"),
            front_browser_ws: format!(
                "ws://{host}:{port}/browser/{runtime_token}/v1/sessions/cast"
            ),
            client_browser_ws: format!(
                "ws://{host}:{port}/browser/{runtime_token}/v1/sessions/client"
            ),
            artifacts_sio: format!("http://{host}:{port}/v1"),
        }
    }
}

/// Container status as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Created but never started.
    Created,
    /// Scheduled, not running yet.
    Pending,
    /// Running.
    Running,
    /// Stopped.
    Exited,
    /// Crashed or unschedulable.
    Failed,
    /// Any other backend-specific status.
    Other(String),
}

impl ContainerStatus {
    /// Returns true for [`ContainerStatus::Running`].
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
            Self::Failed => write!(f, "failed"),
            Self::Other(status) => write!(f, "{status}"),
        }
    }
}

impl FromStr for ContainerStatus {
    type Err = ManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "created" => Self::Created,
            "pending" => Self::Pending,
            "running" => Self::Running,
            "exited" => Self::Exited,
            "failed" | "dead" => Self::Failed,
            other => Self::Other(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_embed_token_and_port() {
        let endpoints = Endpoints::new("10.0.0.5", 32768, "tok");
        assert_eq!(endpoints.base_url, "http://10.0.0.5:32768");
        assert_eq!(endpoints.browser_url, "http://10.0.0.5:32768/browser/tok");
        assert!(endpoints.front_browser_ws.starts_with("ws://10.0.0.5:32768/"));
        assert!(endpoints.client_browser_ws.contains("/tok/"));
        assert_eq!(endpoints.artifacts_sio, "http://10.0.0.5:32768/v1");
    }

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!("running".parse::<ContainerStatus>().unwrap(), ContainerStatus::Running);
        assert_eq!("Exited".parse::<ContainerStatus>().unwrap(), ContainerStatus::Exited);
        assert_eq!("dead".parse::<ContainerStatus>().unwrap(), ContainerStatus::Failed);
        assert_eq!(
            "paused".parse::<ContainerStatus>().unwrap(),
            ContainerStatus::Other("paused".to_string())
        );
        assert_eq!(ContainerStatus::Running.to_string(), "running");
        assert!(ContainerStatus::Running.is_running());
        assert!(!ContainerStatus::Pending.is_running());
    }

    #[test]
    fn test_model_accepts_records_without_timestamp() {
        let json = serde_json::json!({
            "session_id": "abc",
            "container_id": "c1",
            "container_name": "sandpool_container_abc",
            "base_url": "http://localhost:1",
            "browser_url": "",
            "front_browser_ws": "",
            "client_browser_ws": "",
            "artifacts_sio": "",
            "ports": [1],
            "mount_dir": null,
            "storage_path": null,
            "runtime_token": "t",
            "version": "img:1"
        });
        let model: ContainerModel = serde_json::from_value(json).unwrap();
        assert_eq!(model.container_name, "sandpool_container_abc");
        assert_eq!(model.ports, vec![1]);
    }
}
