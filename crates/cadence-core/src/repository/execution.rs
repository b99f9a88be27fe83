//! Execution snapshot repository trait definition.
//!
//! Defines the storage interface for persisted `Execution` snapshots. The
//! infrastructure layer (cadence-infra) implements this trait with SQLite;
//! `InMemoryExecutionStore` backs tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use cadence_types::error::RepositoryError;
use cadence_types::execution::{Execution, ExecutionSummary};
use uuid::Uuid;

/// Repository trait for execution snapshots, keyed by execution id.
///
/// `load(save(e))` must reproduce `e` field for field, timestamps included.
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionStore: Send + Sync {
    /// Upsert the full snapshot of an execution.
    fn save(
        &self,
        execution: &Execution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Load a snapshot by execution id.
    fn load(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// List snapshots newest first, optionally filtered by workflow id.
    fn list(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionSummary>, RepositoryError>> + Send;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Snapshot store that keeps serialized snapshots in process memory.
///
/// Snapshots are stored as JSON text so loads go through the same
/// serialization path as durable stores.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    snapshots: Mutex<HashMap<Uuid, String>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    async fn save(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let json = serde_json::to_string(execution)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(execution.execution_id, json);
        Ok(())
    }

    async fn load(&self, execution_id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        let json = self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(execution_id)
            .cloned();
        json.map(|j| {
            serde_json::from_str(&j).map_err(|e| RepositoryError::Serialization(e.to_string()))
        })
        .transpose()
    }

    async fn list(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ExecutionSummary>, RepositoryError> {
        let all: Vec<String> = self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut rows = Vec::with_capacity(all.len());
        for json in all {
            let exec: Execution = serde_json::from_str(&json)
                .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
            if workflow_id.is_none_or(|w| w == exec.workflow_id) {
                rows.push(ExecutionSummary::from(&exec));
            }
        }
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        rows.truncate(limit);
        Ok(rows)
    }
}
