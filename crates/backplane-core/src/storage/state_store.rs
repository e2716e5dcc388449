//! Key-value state store trait.
//!
//! Channel identity and the message cache persist through this port. Keys are
//! the flat names in `backplane_types::persisted`; values are JSON.

use std::future::Future;
use std::sync::Arc;

use backplane_types::error::RepositoryError;

/// Trait for durable key-value storage of client state.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Implementations live in backplane-infra.
pub trait StateStore: Send + Sync {
    /// Get a value by key. Returns None if the key does not exist.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<serde_json::Value>, RepositoryError>> + Send;

    /// Set a value for a key (upsert).
    fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a key. No-op if key does not exist.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

impl<S: StateStore> StateStore for Arc<S> {
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<serde_json::Value>, RepositoryError>> + Send {
        (**self).get(key)
    }

    fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), RepositoryError>> + Send {
        (**self).delete(key)
    }
}
