//! Mock container backend for testing.
//!
//! Keeps containers in memory and tracks calls for test assertions.
//! Failure modes can be switched on to exercise the manager's error paths.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ContainerBackend, ContainerSpec, CreatedContainer};
use crate::error::{ManagerError, Result};
use crate::model::ContainerStatus;

#[derive(Debug, Clone)]
pub(crate) struct MockContainer {
    pub name: String,
    pub spec: ContainerSpec,
    pub status: ContainerStatus,
}

#[derive(Debug, Default)]
struct Inner {
    containers: Mutex<HashMap<String, MockContainer>>,
    next_id: AtomicUsize,
    creates: AtomicUsize,
    stops: AtomicUsize,
    removes: AtomicUsize,
    fail_create: AtomicBool,
    fail_teardown: AtomicBool,
    report_all_existing: AtomicBool,
    /// Port handed out for every container; 0 means "next free fake port".
    port: AtomicUsize,
}

/// In-memory [`ContainerBackend`].
#[derive(Debug, Clone, Default)]
pub(crate) struct MockBackend {
    inner: Arc<Inner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every created container reports `port` as its published port.
    pub fn with_port(port: u16) -> Self {
        let backend = Self::new();
        backend.inner.port.store(usize::from(port), Ordering::SeqCst);
        backend
    }

    /// Make `create` return `Ok(None)`.
    pub fn set_fail_create(&self, fail: bool) {
        self.inner.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Make `stop` and `remove` return errors.
    pub fn set_fail_teardown(&self, fail: bool) {
        self.inner.fail_teardown.store(fail, Ordering::SeqCst);
    }

    /// Make `inspect` find a container under any id or name.
    pub fn set_report_all_existing(&self, report: bool) {
        self.inner.report_all_existing.store(report, Ordering::SeqCst);
    }

    /// Force a container's status.
    pub fn set_status(&self, id: &str, status: ContainerStatus) {
        if let Some(container) = self.containers().get_mut(id) {
            container.status = status;
        }
    }

    /// Drop a container as if someone removed it out of band.
    pub fn forget(&self, id: &str) {
        self.containers().remove(id);
    }

    pub fn create_count(&self) -> usize {
        self.inner.creates.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.inner.stops.load(Ordering::SeqCst)
    }

    pub fn remove_count(&self) -> usize {
        self.inner.removes.load(Ordering::SeqCst)
    }

    pub fn live_count(&self) -> usize {
        self.containers().len()
    }

    pub fn container(&self, id: &str) -> Option<MockContainer> {
        self.containers().get(id).cloned()
    }

    fn containers(&self) -> std::sync::MutexGuard<'_, HashMap<String, MockContainer>> {
        self.inner
            .containers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Resolve an id or a container name to an id.
    fn resolve(&self, id_or_name: &str) -> Option<String> {
        let containers = self.containers();
        if containers.contains_key(id_or_name) {
            return Some(id_or_name.to_string());
        }
        containers
            .iter()
            .find(|(_, c)| c.name == id_or_name)
            .map(|(id, _)| id.clone())
    }
}

#[async_trait]
impl ContainerBackend for MockBackend {
    async fn create(&self, spec: &ContainerSpec) -> Result<Option<CreatedContainer>> {
        self.inner.creates.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_create.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("mock-{n}");
        let port = match self.inner.port.load(Ordering::SeqCst) {
            0 => 40_000 + u16::try_from(n).unwrap_or(0),
            fixed => u16::try_from(fixed).unwrap_or(0),
        };

        self.containers().insert(
            id.clone(),
            MockContainer {
                name: spec.name.clone(),
                spec: spec.clone(),
                status: ContainerStatus::Running,
            },
        );

        Ok(Some(CreatedContainer {
            id,
            ports: vec![port],
            host: "127.0.0.1".to_string(),
        }))
    }

    async fn start(&self, id: &str) -> Result<bool> {
        let Some(id) = self.resolve(id) else {
            return Ok(false);
        };
        self.set_status(&id, ContainerStatus::Running);
        Ok(true)
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> Result<bool> {
        self.inner.stops.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_teardown.load(Ordering::SeqCst) {
            return Err(ManagerError::backend("stop failed"));
        }
        if let Some(id) = self.resolve(id) {
            self.set_status(&id, ContainerStatus::Exited);
        }
        Ok(true)
    }

    async fn remove(&self, id: &str, _force: bool) -> Result<bool> {
        self.inner.removes.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_teardown.load(Ordering::SeqCst) {
            return Err(ManagerError::backend("remove failed"));
        }
        if let Some(id) = self.resolve(id) {
            self.forget(&id);
        }
        Ok(true)
    }

    async fn inspect(&self, id: &str) -> Result<Option<Value>> {
        if self.inner.report_all_existing.load(Ordering::SeqCst) {
            return Ok(Some(json!({ "Id": id, "Name": id })));
        }
        Ok(self.resolve(id).and_then(|id| {
            self.container(&id).map(|c| {
                json!({
                    "Id": id,
                    "Name": c.name,
                    "State": { "Status": c.status.to_string() },
                })
            })
        }))
    }

    async fn get_status(&self, id: &str) -> Result<Option<ContainerStatus>> {
        Ok(self
            .resolve(id)
            .and_then(|id| self.container(&id))
            .map(|c| c.status))
    }

    async fn get_logs(&self, id: &str, _tail: Option<usize>) -> Result<Option<String>> {
        Ok(self.resolve(id).map(|id| format!("logs for {id}\n")))
    }
}
