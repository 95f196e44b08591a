//! Manager configuration loaded from `sandpool.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{ManagerError, Result};
use crate::registry::SandboxType;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "sandpool.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Manager behaviour and mode selection.
    #[serde(default)]
    pub manager: ManagerSettings,
    /// Container backend settings.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Shared Redis store; process-local stores when absent.
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// Manager HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Sandbox type served from the pool.
    #[serde(default)]
    pub default_type: SandboxType,

    /// Number of warm containers kept in the pool (0 disables pooling).
    #[serde(default)]
    pub pool_size: usize,

    /// Prefix of generated container names; also the mapping namespace
    /// swept by cleanup.
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    /// Prefix of session mapping keys.
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,

    /// Remote manager URL. When set, every call is proxied over HTTP.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token for the remote manager (client side) or required from
    /// callers (server side).
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Parent directory of per-session workspaces. Every sandbox created
    /// without an explicit mount directory gets `<default_mount_dir>/<session id>`.
    #[serde(default = "default_mount_dir")]
    pub default_mount_dir: String,

    /// Storage root for persisted workspaces.
    #[serde(default)]
    pub storage_folder: Option<String>,

    /// Extra host paths mounted read-only into every container.
    #[serde(default)]
    pub readonly_mounts: Vec<Mount>,

    /// Tag of the built-in sandbox images.
    #[serde(default = "default_image_tag")]
    pub image_tag: String,

    /// Timeout for requests to container tool servers, in seconds.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            default_type: SandboxType::default(),
            pool_size: 0,
            container_prefix: default_container_prefix(),
            session_prefix: default_session_prefix(),
            base_url: None,
            bearer_token: None,
            default_mount_dir: default_mount_dir(),
            storage_folder: None,
            readonly_mounts: Vec::new(),
            image_tag: default_image_tag(),
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

/// Read-only host mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Host path (`~` is expanded).
    pub host: String,
    /// Path inside the container.
    pub container: String,
}

/// Container backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Host that published container ports are reachable on.
    #[serde(default = "default_host")]
    pub host: String,

    /// Container port serving the tool API.
    #[serde(default = "default_container_port")]
    pub container_port: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            container_port: default_container_port(),
        }
    }
}

/// Redis connection for shared mapping and pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Key namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            namespace: default_namespace(),
        }
    }
}

/// Manager HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

// Default value functions
fn default_container_prefix() -> String {
    "sandpool_container_".to_string()
}

fn default_session_prefix() -> String {
    "sandpool_session_".to_string()
}

fn default_mount_dir() -> String {
    std::env::temp_dir()
        .join("sandpool")
        .join("sessions")
        .to_string_lossy()
        .into_owned()
}

fn default_image_tag() -> String {
    "latest".to_string()
}

fn default_tool_timeout() -> u64 {
    60
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_container_port() -> String {
    "80/tcp".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_namespace() -> String {
    "sandpool".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Load configuration from `sandpool.toml` in `dir`, using defaults if not found
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ManagerError::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            ManagerError::config(format!("Failed to parse config file {}: {e}", path.display()))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot work together.
    pub fn validate(&self) -> Result<()> {
        if self.manager.container_prefix.is_empty() {
            return Err(ManagerError::config("manager.container_prefix must not be empty"));
        }
        if self.manager.container_prefix == self.manager.session_prefix {
            return Err(ManagerError::config(
                "manager.container_prefix and manager.session_prefix must differ",
            ));
        }
        if self.manager.default_mount_dir.trim().is_empty() {
            return Err(ManagerError::config("manager.default_mount_dir must not be empty"));
        }
        if let Some(url) = &self.manager.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ManagerError::config(format!(
                    "manager.base_url must be an http(s) URL, got {url}"
                )));
            }
        }
        Ok(())
    }

    /// True when calls are proxied to a remote manager.
    pub fn is_remote(&self) -> bool {
        self.manager.base_url.is_some()
    }
}
