//! Application state wiring the client to its infrastructure.
//!
//! The core client is generic over its transport and state store; AppState
//! pins it to the reqwest transport and either the SQLite store in the data
//! directory or, with `--ephemeral`, an in-memory store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use backplane_core::storage::StateStore;
use backplane_core::BackplaneClient;
use backplane_infra::config::load_client_config;
use backplane_infra::filesystem::{ensure_data_dir, resolve_data_dir};
use backplane_infra::memory::MemoryStateStore;
use backplane_infra::sqlite::pool::{database_url, DatabasePool};
use backplane_infra::sqlite::state::SqliteStateStore;
use backplane_infra::transport::HttpTransport;
use backplane_types::config::BackplaneConfig;
use backplane_types::error::RepositoryError;

/// The state store selected at startup.
pub enum AppStore {
    Sqlite(SqliteStateStore),
    Memory(MemoryStateStore),
}

impl AppStore {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "SQLite (WAL mode)",
            Self::Memory(_) => "in-memory",
        }
    }

    /// Stored keys with their last update time. The in-memory store has no
    /// timestamps, so it reports none.
    pub async fn list(&self) -> Result<Vec<(String, String)>, RepositoryError> {
        match self {
            Self::Sqlite(store) => store.list().await,
            Self::Memory(_) => Ok(Vec::new()),
        }
    }
}

impl StateStore for AppStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        match self {
            Self::Sqlite(store) => store.get(key).await,
            Self::Memory(store) => store.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), RepositoryError> {
        match self {
            Self::Sqlite(store) => store.set(key, value).await,
            Self::Memory(store) => store.set(key, value).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        match self {
            Self::Sqlite(store) => store.delete(key).await,
            Self::Memory(store) => store.delete(key).await,
        }
    }
}

/// Client pinned to the concrete infra implementations.
pub type ConcreteClient = BackplaneClient<Arc<HttpTransport>, Arc<AppStore>>;

/// Shared state for every command.
pub struct AppState {
    pub data_dir: PathBuf,
    /// `config.toml` from the data directory, before flag overrides.
    pub file_config: BackplaneConfig,
    pub store: Arc<AppStore>,
    pub transport: Arc<HttpTransport>,
}

impl AppState {
    /// Resolve the data directory, load config, and open the store.
    pub async fn init(ephemeral: bool) -> anyhow::Result<Self> {
        let data_dir = ensure_data_dir(resolve_data_dir()).await?;
        Self::open(&data_dir, ephemeral).await
    }

    pub async fn open(data_dir: &Path, ephemeral: bool) -> anyhow::Result<Self> {
        let file_config = load_client_config(data_dir).await;

        let store = if ephemeral {
            AppStore::Memory(MemoryStateStore::new())
        } else {
            let db_pool = DatabasePool::new(&database_url(data_dir)).await?;
            AppStore::Sqlite(SqliteStateStore::new(db_pool))
        };

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            file_config,
            store: Arc::new(store),
            transport: Arc::new(HttpTransport::new()?),
        })
    }

    /// A fresh, uninitialized client sharing this state's store and transport.
    pub fn client(&self) -> ConcreteClient {
        BackplaneClient::new(Arc::clone(&self.transport), Arc::clone(&self.store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn open_persistent_creates_database() {
        let tmp = TempDir::new().unwrap();
        let state = AppState::open(tmp.path(), false).await.unwrap();

        assert_eq!(state.store.label(), "SQLite (WAL mode)");
        assert!(tmp.path().join("backplane.db").exists());

        state.store.set("k", &json!({"a": 1})).await.unwrap();
        assert_eq!(state.store.get("k").await.unwrap(), Some(json!({"a": 1})));
        let keys = state.store.list().await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].0, "k");
    }

    #[tokio::test]
    async fn open_ephemeral_skips_database() {
        let tmp = TempDir::new().unwrap();
        let state = AppState::open(tmp.path(), true).await.unwrap();

        assert_eq!(state.store.label(), "in-memory");
        assert!(!tmp.path().join("backplane.db").exists());

        state.store.set("k", &json!(1)).await.unwrap();
        state.store.delete("k").await.unwrap();
        assert_eq!(state.store.get("k").await.unwrap(), None);
        assert!(state.store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_reads_config_file() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            "server_base_url = \"bp.example.com\"\nbus_name = \"example.com\"\n",
        )
        .await
        .unwrap();

        let state = AppState::open(tmp.path(), true).await.unwrap();
        assert_eq!(state.file_config.bus_name, "example.com");
    }
}
