//! Process-local mapping and queue.
//!
//! Each call takes the store's lock for its own duration only; sequences of
//! calls are not atomic.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ContainerMapping, PoolQueue};
use crate::error::Result;

/// `HashMap`-backed [`ContainerMapping`].
#[derive(Debug, Default)]
pub struct InMemoryMapping {
    entries: Mutex<HashMap<String, Value>>,
}

impl InMemoryMapping {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ContainerMapping for InMemoryMapping {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// `VecDeque`-backed [`PoolQueue`].
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    items: Mutex<VecDeque<Value>>,
}

impl InMemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<Value>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PoolQueue for InMemoryQueue {
    async fn enqueue(&self, item: Value) -> Result<()> {
        self.items().push_back(item);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Value>> {
        Ok(self.items().pop_front())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.items().len())
    }
}
