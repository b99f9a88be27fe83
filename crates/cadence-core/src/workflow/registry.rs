//! Engine-owned, id-indexed registry of live executions.
//!
//! The engine inserts an execution when a run starts and mutates it through
//! the shared handle. Observers (the monitor, status queries) only hold the
//! registry and look executions up by id, so they never extend an
//! execution's lifetime: once the engine calls `forget`, lookups return
//! `None`.

use std::sync::{Arc, PoisonError, RwLock};

use cadence_types::execution::{Execution, ExecutionStatus};
use dashmap::DashMap;
use uuid::Uuid;

/// Shared handle to a live execution. Locks are never held across an await.
pub type SharedExecution = Arc<RwLock<Execution>>;

/// Run `f` with read access to a shared execution.
pub fn read_execution<R>(shared: &SharedExecution, f: impl FnOnce(&Execution) -> R) -> R {
    let guard = shared.read().unwrap_or_else(PoisonError::into_inner);
    f(&guard)
}

/// Run `f` with write access to a shared execution.
pub fn write_execution<R>(shared: &SharedExecution, f: impl FnOnce(&mut Execution) -> R) -> R {
    let mut guard = shared.write().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

/// Concurrent map of execution id to shared execution. Cloning shares the map.
#[derive(Clone, Default)]
pub struct ExecutionRegistry {
    executions: Arc<DashMap<Uuid, SharedExecution>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an execution, replacing any previous entry with the same id.
    pub fn insert(&self, execution: Execution) -> SharedExecution {
        let id = execution.execution_id;
        let shared = Arc::new(RwLock::new(execution));
        self.executions.insert(id, Arc::clone(&shared));
        shared
    }

    pub fn get(&self, id: &Uuid) -> Option<SharedExecution> {
        self.executions.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.executions.contains_key(id)
    }

    /// Read an execution by id without cloning it.
    pub fn with<R>(&self, id: &Uuid, f: impl FnOnce(&Execution) -> R) -> Option<R> {
        let shared = self.get(id)?;
        Some(read_execution(&shared, f))
    }

    /// Cloned copy of an execution's current state.
    pub fn snapshot(&self, id: &Uuid) -> Option<Execution> {
        self.with(id, Execution::clone)
    }

    pub fn status(&self, id: &Uuid) -> Option<ExecutionStatus> {
        self.with(id, Execution::status)
    }

    /// Drop the registry's reference. Returns whether the id was present.
    pub fn forget(&self, id: &Uuid) -> bool {
        self.executions.remove(id).is_some()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.executions.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// Hook for an external retry driver: bump a step's `retry_count`.
    ///
    /// The engine never calls this; it does not retry failed steps itself.
    /// Returns the new count, or `None` if the execution or step is unknown.
    pub fn record_retry(&self, execution_id: &Uuid, step_id: &str) -> Option<u32> {
        let shared = self.get(execution_id)?;
        write_execution(&shared, |e| {
            let step = e.step_executions.get_mut(step_id)?;
            step.retry_count += 1;
            tracing::debug!(
                execution_id = %execution_id,
                step_id,
                retry_count = step.retry_count,
                "recorded step retry"
            );
            Some(step.retry_count)
        })
    }
}

impl std::fmt::Debug for ExecutionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRegistry")
            .field("executions", &self.executions.len())
            .finish()
    }
}
