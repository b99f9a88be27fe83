//! Snapshot persistence for executions.
//!
//! Wraps an `ExecutionStore` to provide the engine's checkpointing API. A
//! snapshot is the full `Execution` (step map included); saving is an upsert
//! keyed by execution id. Snapshots are for inspection and replay tooling;
//! the engine does not resume from them.

use cadence_types::error::RepositoryError;
use cadence_types::execution::{Execution, ExecutionSummary};
use uuid::Uuid;

use crate::repository::execution::ExecutionStore;

/// Manages execution snapshots on top of a store.
pub struct SnapshotManager<S: ExecutionStore> {
    store: S,
}

impl<S: ExecutionStore> SnapshotManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persist a snapshot, propagating failures.
    pub async fn save(&self, execution: &Execution) -> Result<(), RepositoryError> {
        self.store.save(execution).await?;
        tracing::debug!(
            execution_id = %execution.execution_id,
            state = %execution.state,
            "saved execution snapshot"
        );
        Ok(())
    }

    /// Persist an intermediate snapshot. Failures are logged, not returned.
    pub async fn checkpoint(&self, execution: &Execution) -> bool {
        match self.save(execution).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    execution_id = %execution.execution_id,
                    error = %e,
                    "checkpoint snapshot failed"
                );
                false
            }
        }
    }

    pub async fn load(&self, execution_id: &Uuid) -> Result<Option<Execution>, RepositoryError> {
        self.store.load(execution_id).await
    }

    pub async fn list(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ExecutionSummary>, RepositoryError> {
        self.store.list(workflow_id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::repository::execution::InMemoryExecutionStore;

    struct FailingStore;

    impl ExecutionStore for FailingStore {
        async fn save(&self, _: &Execution) -> Result<(), RepositoryError> {
            Err(RepositoryError::Connection)
        }

        async fn load(&self, _: &Uuid) -> Result<Option<Execution>, RepositoryError> {
            Err(RepositoryError::Connection)
        }

        async fn list(
            &self,
            _: Option<&str>,
            _: usize,
        ) -> Result<Vec<ExecutionSummary>, RepositoryError> {
            Err(RepositoryError::Connection)
        }
    }

    #[tokio::test]
    async fn test_checkpoint_roundtrip() {
        let manager = SnapshotManager::new(InMemoryExecutionStore::new());
        let exec = Execution::new("wf", Uuid::now_v7(), HashMap::new());
        assert!(manager.checkpoint(&exec).await);
        assert_eq!(manager.load(&exec.execution_id).await.unwrap(), Some(exec));
    }

    #[tokio::test]
    async fn test_checkpoint_failure_is_swallowed_but_save_propagates() {
        let manager = SnapshotManager::new(FailingStore);
        let exec = Execution::new("wf", Uuid::now_v7(), HashMap::new());
        assert!(!manager.checkpoint(&exec).await);
        assert!(manager.save(&exec).await.is_err());
    }
}
