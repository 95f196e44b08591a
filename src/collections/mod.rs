//! Key-value mapping and FIFO pool queue used by the manager.
//!
//! Two implementations share one contract: process-local stores for a
//! single manager, and Redis-backed stores for managers spread over several
//! processes. Only single-operation atomicity is provided.

mod memory;
mod redis_store;

pub use self::memory::{InMemoryMapping, InMemoryQueue};
pub use self::redis_store::{RedisMapping, RedisQueue};

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::RedisConfig;
use crate::error::Result;

/// Key-value store of JSON values.
#[async_trait]
pub trait ContainerMapping: Send + Sync {
    /// Returns the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Returns every key starting with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>>;
}

/// FIFO queue of JSON values.
#[async_trait]
pub trait PoolQueue: Send + Sync {
    /// Appends `item` at the tail.
    async fn enqueue(&self, item: Value) -> Result<()>;

    /// Pops the head, if any.
    async fn dequeue(&self) -> Result<Option<Value>>;

    /// Number of queued items.
    async fn size(&self) -> Result<usize>;
}

/// Stores backing one manager.
#[derive(Clone)]
pub struct Stores {
    /// container name -> `ContainerModel`
    pub containers: Arc<dyn ContainerMapping>,
    /// session key -> container names
    pub sessions: Arc<dyn ContainerMapping>,
    /// warm, unassigned containers
    pub pool: Arc<dyn PoolQueue>,
}

impl Stores {
    /// Process-local stores.
    pub fn in_memory() -> Self {
        Self {
            containers: Arc::new(InMemoryMapping::new()),
            sessions: Arc::new(InMemoryMapping::new()),
            pool: Arc::new(InMemoryQueue::new()),
        }
    }

    /// Redis stores under `config.namespace`.
    ///
    /// # Errors
    ///
    /// Returns error if the Redis URL is invalid.
    pub fn redis(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Self {
            containers: Arc::new(RedisMapping::new(
                client.clone(),
                format!("{}:containers", config.namespace),
            )),
            sessions: Arc::new(RedisMapping::new(
                client.clone(),
                format!("{}:sessions", config.namespace),
            )),
            pool: Arc::new(RedisQueue::new(client, format!("{}:pool", config.namespace))),
        })
    }

    /// Redis stores when configured, process-local otherwise.
    pub fn from_config(redis: Option<&RedisConfig>) -> Result<Self> {
        match redis {
            Some(config) => Self::redis(config),
            None => Ok(Self::in_memory()),
        }
    }
}
