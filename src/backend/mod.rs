//! Container backends.
//!
//! The manager drives containers only through [`ContainerBackend`]. The
//! Docker implementation ships with the crate; cluster orchestrators plug in
//! behind the same trait.

mod docker;
#[cfg(test)]
pub(crate) mod mock;

pub use docker::DockerBackend;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::Result;
use crate::model::ContainerStatus;

/// Host directory bound into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    /// Host path.
    pub host: String,
    /// Path inside the container.
    pub container: String,
    /// Mount read-only.
    pub readonly: bool,
}

/// Everything a backend needs to create one container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Image reference.
    pub image: String,
    /// Container name.
    pub name: String,
    /// Container ports to publish (e.g., "80/tcp").
    pub ports: Vec<String>,
    /// Volume bindings.
    pub volumes: Vec<VolumeBinding>,
    /// Environment variables.
    pub environment: BTreeMap<String, String>,
    /// Backend runtime options.
    pub runtime_config: Map<String, Value>,
}

/// A container the backend created and started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedContainer {
    /// Backend id.
    pub id: String,
    /// Host ports, in the order of [`ContainerSpec::ports`].
    pub ports: Vec<u16>,
    /// Host the ports are reachable on.
    pub host: String,
}

/// Narrow container orchestration contract.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Creates and starts a container. `Ok(None)` means the backend could
    /// not produce a usable container.
    async fn create(&self, spec: &ContainerSpec) -> Result<Option<CreatedContainer>>;

    /// Starts a stopped container.
    async fn start(&self, id: &str) -> Result<bool>;

    /// Stops a container, waiting at most `timeout` before killing it.
    async fn stop(&self, id: &str, timeout: Duration) -> Result<bool>;

    /// Removes a container.
    async fn remove(&self, id: &str, force: bool) -> Result<bool>;

    /// Raw backend description of a container; `None` if it does not exist.
    async fn inspect(&self, id: &str) -> Result<Option<Value>>;

    /// Current status; `None` if the container does not exist.
    async fn get_status(&self, id: &str) -> Result<Option<ContainerStatus>>;

    /// Recent log output.
    async fn get_logs(&self, id: &str, tail: Option<usize>) -> Result<Option<String>>;
}
