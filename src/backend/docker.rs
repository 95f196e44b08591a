use async_trait::async_trait;
use bollard::container::{
    Config as DockerContainerConfig, CreateContainerOptions, InspectContainerOptions, LogsOptions,
    RemoveContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerInspectResponse, ContainerStateStatusEnum, HostConfig, PortBinding};
use bollard::Docker;
use futures_util::StreamExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ContainerBackend, ContainerSpec, CreatedContainer};
use crate::error::{ManagerError, Result};
use crate::model::ContainerStatus;
use crate::registry::parse_memory_limit;

/// Label marking containers owned by a sandpool manager.
const MANAGED_LABEL: &str = "sandpool.managed";

/// Runs sandboxes as containers on the local Docker engine
pub struct DockerBackend {
    docker: Docker,
    /// Host the published ports are reachable on.
    host: String,
}

impl DockerBackend {
    /// Connects to Docker using the local defaults (`DOCKER_HOST` or the
    /// platform socket) and checks the daemon answers.
    pub async fn connect(host: impl Into<String>) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            ManagerError::backend(format!("Failed to connect to Docker. Is Docker running? {e}"))
        })?;

        docker.ping().await.map_err(|e| {
            ManagerError::backend(format!("Cannot ping Docker daemon. Is Docker running? {e}"))
        })?;

        Ok(Self {
            docker,
            host: host.into(),
        })
    }

    async fn inspect_raw(&self, id: &str) -> Result<Option<ContainerInspectResponse>> {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => Ok(Some(response)),
            Err(e) if is_status(&e, 404) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read back the host ports Docker assigned to `spec.ports`.
    async fn published_ports(&self, id: &str, spec: &ContainerSpec) -> Result<Option<Vec<u16>>> {
        let Some(inspect) = self.inspect_raw(id).await? else {
            return Ok(None);
        };
        let bindings = inspect
            .network_settings
            .and_then(|settings| settings.ports)
            .unwrap_or_default();

        let mut ports = Vec::with_capacity(spec.ports.len());
        for container_port in &spec.ports {
            let host_port = bindings
                .get(container_port)
                .cloned()
                .flatten()
                .unwrap_or_default()
                .into_iter()
                .find_map(|binding| binding.host_port)
                .and_then(|port| port.parse::<u16>().ok());

            match host_port {
                Some(port) => ports.push(port),
                None => {
                    warn!(container = %id, port = %container_port, "Port was not published");
                    return Ok(None);
                }
            }
        }
        Ok(Some(ports))
    }
}

fn is_status(err: &BollardError, code: u16) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

fn build_container_config(spec: &ContainerSpec) -> Result<DockerContainerConfig<String>> {
    let mut binds = Vec::with_capacity(spec.volumes.len());
    for volume in &spec.volumes {
        let host_path = expand_path(&volume.host)?;
        let mode = if volume.readonly { "ro" } else { "rw" };
        binds.push(format!("{}:{}:{}", host_path, volume.container, mode));
    }

    // Empty host port lets Docker pick a free one.
    let port_bindings = spec
        .ports
        .iter()
        .map(|port| {
            (
                port.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(String::new()),
                }]),
            )
        })
        .collect();
    let exposed_ports = spec
        .ports
        .iter()
        .map(|port| (port.clone(), HashMap::new()))
        .collect();

    let mut host_config = HostConfig {
        binds: Some(binds),
        port_bindings: Some(port_bindings),
        ..Default::default()
    };
    apply_runtime_config(&mut host_config, &spec.runtime_config)?;

    Ok(DockerContainerConfig {
        image: Some(spec.image.clone()),
        env: Some(
            spec.environment
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect(),
        ),
        exposed_ports: Some(exposed_ports),
        labels: Some(HashMap::from([(MANAGED_LABEL.to_string(), "true".to_string())])),
        host_config: Some(host_config),
        ..Default::default()
    })
}

fn apply_runtime_config(host_config: &mut HostConfig, runtime: &Map<String, Value>) -> Result<()> {
    for (key, value) in runtime {
        match key.as_str() {
            "mem_limit" => host_config.memory = Some(byte_size(key, value)?),
            "shm_size" => host_config.shm_size = Some(byte_size(key, value)?),
            "nano_cpus" => {
                host_config.nano_cpus = Some(value.as_i64().ok_or_else(|| {
                    ManagerError::config(format!("nano_cpus must be an integer, got {value}"))
                })?);
            }
            "runtime" => host_config.runtime = value.as_str().map(str::to_string),
            "network_mode" => host_config.network_mode = value.as_str().map(str::to_string),
            _ => debug!(option = %key, "Ignoring runtime option not used by Docker"),
        }
    }
    Ok(())
}

fn byte_size(key: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| ManagerError::config(format!("{key} must be an integer"))),
        Value::String(s) => parse_memory_limit(s),
        other => Err(ManagerError::config(format!("Invalid {key}: {other}"))),
    }
}

fn to_status(state: Option<ContainerStateStatusEnum>) -> ContainerStatus {
    match state {
        Some(ContainerStateStatusEnum::RUNNING) => ContainerStatus::Running,
        Some(ContainerStateStatusEnum::EXITED) => ContainerStatus::Exited,
        Some(ContainerStateStatusEnum::CREATED) => ContainerStatus::Created,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerStatus::Pending,
        Some(ContainerStateStatusEnum::DEAD) => ContainerStatus::Failed,
        Some(other) => ContainerStatus::Other(other.to_string()),
        None => ContainerStatus::Other("unknown".to_string()),
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn create(&self, spec: &ContainerSpec) -> Result<Option<CreatedContainer>> {
        let config = build_container_config(spec)?;

        debug!("Creating container: {}", spec.name);
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;

        debug!("Starting container: {}", spec.name);
        let ports = match self.docker.start_container::<String>(&created.id, None).await {
            Ok(()) => self.published_ports(&created.id, spec).await?,
            Err(e) => {
                warn!(container = %spec.name, error = %e, "Failed to start container");
                None
            }
        };

        let Some(ports) = ports else {
            let _ = self.remove(&created.id, true).await;
            return Ok(None);
        };

        info!(container = %spec.name, image = %spec.image, ?ports, "Container started");
        Ok(Some(CreatedContainer {
            id: created.id,
            ports,
            host: self.host.clone(),
        }))
    }

    async fn start(&self, id: &str) -> Result<bool> {
        match self.docker.start_container::<String>(id, None).await {
            Ok(()) => Ok(true),
            // Already running
            Err(e) if is_status(&e, 304) => Ok(true),
            Err(e) if is_status(&e, 404) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<bool> {
        let options = StopContainerOptions {
            t: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(true),
            // Already stopped, or already gone
            Err(e) if is_status(&e, 304) || is_status(&e, 404) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, id: &str, force: bool) -> Result<bool> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(true),
            Err(e) if is_status(&e, 404) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    async fn inspect(&self, id: &str) -> Result<Option<Value>> {
        self.inspect_raw(id)
            .await?
            .map(|response| serde_json::to_value(response).map_err(ManagerError::from))
            .transpose()
    }

    async fn get_status(&self, id: &str) -> Result<Option<ContainerStatus>> {
        Ok(self
            .inspect_raw(id)
            .await?
            .map(|response| to_status(response.state.and_then(|state| state.status))))
    }

    async fn get_logs(&self, id: &str, tail: Option<usize>) -> Result<Option<String>> {
        if self.inspect_raw(id).await?.is_none() {
            return Ok(None);
        }

        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.map_or_else(|| "all".to_string(), |n| n.to_string()),
            ..Default::default()
        };

        let mut stream = self.docker.logs(id, Some(options));
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(log) => output.push_str(&String::from_utf8_lossy(&log.into_bytes())),
                Err(e) => {
                    warn!("Error reading container logs: {}", e);
                    break;
                }
            }
        }
        Ok(Some(output))
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> Result<String> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| ManagerError::config("Could not determine home directory"))?;
        Ok(home.join(rest).to_string_lossy().into_owned())
    } else {
        Ok(path.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VolumeBinding;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn spec() -> ContainerSpec {
        let mut runtime_config = Map::new();
        runtime_config.insert("mem_limit".to_string(), json!(512 * 1024 * 1024));
        runtime_config.insert("shm_size".to_string(), json!("2g"));
        runtime_config.insert("nano_cpus".to_string(), json!(1_500_000_000_i64));
        runtime_config.insert("node_selector".to_string(), json!({"pool": "gpu"}));

        ContainerSpec {
            image: "sandpool/runtime-base:latest".to_string(),
            name: "sandpool_container_abc".to_string(),
            ports: vec!["80/tcp".to_string()],
            volumes: vec![
                VolumeBinding {
                    host: "/tmp/sessions/abc".to_string(),
                    container: "/workspace".to_string(),
                    readonly: false,
                },
                VolumeBinding {
                    host: "/etc/ssl/certs".to_string(),
                    container: "/etc/ssl/certs".to_string(),
                    readonly: true,
                },
            ],
            environment: BTreeMap::from([("SECRET_TOKEN".to_string(), "tok".to_string())]),
            runtime_config,
        }
    }

    #[test]
    fn test_build_container_config() {
        let config = build_container_config(&spec()).unwrap();
        let host = config.host_config.unwrap();

        assert_eq!(config.image.as_deref(), Some("sandpool/runtime-base:latest"));
        assert_eq!(config.env.unwrap(), vec!["SECRET_TOKEN=tok".to_string()]);
        assert_eq!(
            host.binds.unwrap(),
            vec![
                "/tmp/sessions/abc:/workspace:rw".to_string(),
                "/etc/ssl/certs:/etc/ssl/certs:ro".to_string(),
            ]
        );
        assert_eq!(host.memory, Some(512 * 1024 * 1024));
        assert_eq!(host.shm_size, Some(2 * 1024 * 1024 * 1024));
        assert_eq!(host.nano_cpus, Some(1_500_000_000));
        assert!(host.port_bindings.unwrap().contains_key("80/tcp"));
        assert!(config.exposed_ports.unwrap().contains_key("80/tcp"));
    }

    #[test]
    fn test_invalid_runtime_option_is_rejected() {
        let mut spec = spec();
        spec.runtime_config
            .insert("shm_size".to_string(), json!("huge"));
        assert!(build_container_config(&spec).is_err());
    }

    #[test]
    fn test_to_status() {
        assert_eq!(
            to_status(Some(ContainerStateStatusEnum::RUNNING)),
            ContainerStatus::Running
        );
        assert_eq!(
            to_status(Some(ContainerStateStatusEnum::EXITED)),
            ContainerStatus::Exited
        );
        assert_eq!(
            to_status(Some(ContainerStateStatusEnum::DEAD)),
            ContainerStatus::Failed
        );
    }

    #[test]
    fn test_expand_path() {
        // Test non-tilde path
        assert_eq!(expand_path("/usr/bin").unwrap(), "/usr/bin");

        // Test tilde expansion (only works if home dir is set)
        if dirs::home_dir().is_some() {
            let expanded = expand_path("~/.ssh").unwrap();
            assert!(!expanded.starts_with('~'));
            assert!(expanded.ends_with("/.ssh"));
        }
    }
}
