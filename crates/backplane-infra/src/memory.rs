//! In-memory state store for ephemeral sessions and tests.

use backplane_core::storage::StateStore;
use backplane_types::error::RepositoryError;
use dashmap::DashMap;

/// `StateStore` backed by a `DashMap`. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: DashMap<String, serde_json::Value>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        Ok(self.values.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError> {
        self.values.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        self.values.remove(key);
        Ok(())
    }
}
