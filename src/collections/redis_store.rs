//! Redis-backed mapping and queue (for managers shared across processes)
//!
//! Every operation is a single Redis command, so each one is atomic on the
//! server; nothing spans commands. Keys are namespaced so several managers
//! or deployments can share one Redis.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{ContainerMapping, PoolQueue};
use crate::error::{ManagerError, Result};

/// Keys fetched per SCAN round trip.
const SCAN_COUNT: usize = 200;

async fn connection(client: &redis::Client) -> Result<redis::aio::MultiplexedConnection> {
    client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| ManagerError::store(format!("Redis connection failed: {e}")))
}

/// SCAN pattern matching `prefix` literally inside `namespace`.
fn scan_pattern(namespace: &str, prefix: &str) -> String {
    let mut pattern = String::with_capacity(namespace.len() + prefix.len() + 2);
    for c in namespace.chars().chain(std::iter::once(':')).chain(prefix.chars()) {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

/// Caller-facing key of a raw Redis key, or `None` if it lies outside
/// `namespace`.
fn strip_namespace<'a>(namespace: &str, raw: &'a str) -> Option<&'a str> {
    raw.strip_prefix(namespace)?.strip_prefix(':')
}

fn decode(raw: &str) -> Result<Value> {
    serde_json::from_str(raw)
        .map_err(|e| ManagerError::store(format!("Failed to deserialize entry: {e}")))
}

/// Redis string keys under a namespace.
pub struct RedisMapping {
    client: redis::Client,
    namespace: String,
}

impl RedisMapping {
    /// Creates a mapping storing keys as `{namespace}:{key}`.
    pub fn new(client: redis::Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn build_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl ContainerMapping for RedisMapping {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut conn = connection(&self.client).await?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.build_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| ManagerError::store(format!("Redis GET failed: {e}")))?;

        raw.as_deref().map(decode).transpose()
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut conn = connection(&self.client).await?;
        redis::cmd("SET")
            .arg(self.build_key(key))
            .arg(value.to_string())
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| ManagerError::store(format!("Redis SET failed: {e}")))?;

        debug!(key = %key, namespace = %self.namespace, "Mapping entry saved to Redis");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = connection(&self.client).await?;
        let deleted: i64 = redis::cmd("DEL")
            .arg(self.build_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| ManagerError::store(format!("Redis DEL failed: {e}")))?;

        debug!(key = %key, deleted = deleted > 0, "Mapping entry deleted from Redis");
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = connection(&self.client).await?;
        let pattern = scan_pattern(&self.namespace, prefix);

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| ManagerError::store(format!("Redis SCAN failed: {e}")))?;

            keys.extend(
                batch
                    .iter()
                    .filter_map(|raw| strip_namespace(&self.namespace, raw))
                    .map(str::to_string),
            );

            if next == 0 {
                break;
            }
            cursor = next;
        }

        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Redis list used as a FIFO (`RPUSH` / `LPOP`).
pub struct RedisQueue {
    client: redis::Client,
    key: String,
}

impl RedisQueue {
    /// Creates a queue stored in the Redis list `key`.
    pub fn new(client: redis::Client, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }
}

#[async_trait]
impl PoolQueue for RedisQueue {
    async fn enqueue(&self, item: Value) -> Result<()> {
        let mut conn = connection(&self.client).await?;
        redis::cmd("RPUSH")
            .arg(&self.key)
            .arg(item.to_string())
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| ManagerError::store(format!("Redis RPUSH failed: {e}")))?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Value>> {
        let mut conn = connection(&self.client).await?;
        let raw: Option<String> = redis::cmd("LPOP")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(|e| ManagerError::store(format!("Redis LPOP failed: {e}")))?;

        raw.as_deref().map(decode).transpose()
    }

    async fn size(&self) -> Result<usize> {
        let mut conn = connection(&self.client).await?;
        let len: usize = redis::cmd("LLEN")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(|e| ManagerError::store(format!("Redis LLEN failed: {e}")))?;
        Ok(len)
    }
}
