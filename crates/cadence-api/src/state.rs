//! Application state wiring the engine to its infra adapters.
//!
//! The engine is generic over pool, document and snapshot traits; AppState
//! pins it to the command-backed workers, the filesystem document store and
//! the SQLite snapshot store.

use std::path::PathBuf;
use std::sync::Arc;

use cadence_core::worker::pool::RolePool;
use cadence_core::workflow::WorkflowEngine;
use cadence_infra::config::{documents_dir, load_global_config, resolve_data_dir};
use cadence_infra::sqlite::execution::SqliteExecutionStore;
use cadence_infra::sqlite::pool::DatabasePool;
use cadence_infra::storage::filesystem::FsDocumentStore;
use cadence_infra::worker::command::CommandWorkerFactory;
use cadence_types::config::GlobalConfig;

/// Engine generics pinned to infra implementations.
pub type ConcreteEngine =
    WorkflowEngine<RolePool<CommandWorkerFactory>, FsDocumentStore, SqliteExecutionStore>;

/// Shared application state.
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: GlobalConfig,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Resolve the data directory, load `config.toml` and open the database.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        let db_pool = DatabasePool::open(&data_dir).await?;
        let config = load_global_config(&data_dir).await;

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");
        Ok(Self {
            data_dir,
            config,
            db_pool,
        })
    }

    pub fn execution_store(&self) -> SqliteExecutionStore {
        SqliteExecutionStore::new(self.db_pool.clone())
    }

    /// Build an engine that runs roles through `factory`.
    pub fn engine(&self, factory: CommandWorkerFactory) -> ConcreteEngine {
        WorkflowEngine::new(
            Arc::new(RolePool::new(factory)),
            Arc::new(FsDocumentStore::new(documents_dir(&self.data_dir))),
            self.execution_store(),
        )
        .with_config(self.config.engine.clone())
    }
}
