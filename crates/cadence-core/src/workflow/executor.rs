//! Workflow engine: runs a definition as a state machine over one `Execution`.
//!
//! # Execution flow
//!
//! 1. Create the `Execution` with every step of the tree registered as
//!    `Pending`, mark it `Running` and publish it in the registry.
//! 2. Run top-level steps in declaration order while the execution is still
//!    `Running`, checkpointing a snapshot after each one.
//! 3. The first non-optional failure marks the execution `Failed` and stops
//!    the loop. Nothing already done is rolled back.
//! 4. Otherwise mark it `Completed`.
//! 5. Release every acquired worker and persist the final snapshot, whatever
//!    the outcome.

use std::collections::HashMap;
use std::sync::Arc;

use cadence_types::config::EngineConfig;
use cadence_types::error::RepositoryError;
use cadence_types::event::WorkflowEvent;
use cadence_types::execution::{
    Execution, ExecutionState, ExecutionStatus, ExecutionSummary, StepExecution,
};
use cadence_types::workflow::WorkflowDefinition;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::execution::ExecutionStore;
use crate::storage::document::DocumentStore;
use crate::worker::WorkerPool;

use super::checkpoint::SnapshotManager;
use super::registry::{ExecutionRegistry, SharedExecution, read_execution, write_execution};
use super::step_runner::StepRunner;

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Engine-level failures. A workflow that fails is still `Ok`: its
/// `Execution` carries state `Failed` and the error text.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to persist snapshot for execution {execution_id}: {source}")]
    Snapshot {
        execution_id: Uuid,
        #[source]
        source: RepositoryError,
    },

    #[error("execution {0} is already running")]
    AlreadyRunning(Uuid),

    #[error("execution {0} not found")]
    NotFound(Uuid),

    #[error("snapshot store error: {0}")]
    Repository(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Executes workflow definitions against injected collaborators.
///
/// Generic over the worker pool, document store and snapshot store so the
/// same engine runs against SQLite and the filesystem in production and
/// in-memory doubles in tests.
pub struct WorkflowEngine<P: WorkerPool, D: DocumentStore, S: ExecutionStore> {
    pool: Arc<P>,
    documents: Arc<D>,
    snapshots: SnapshotManager<S>,
    registry: ExecutionRegistry,
    event_bus: EventBus,
    config: EngineConfig,
}

impl<P: WorkerPool, D: DocumentStore, S: ExecutionStore> WorkflowEngine<P, D, S> {
    pub fn new(pool: Arc<P>, documents: Arc<D>, store: S) -> Self {
        Self {
            pool,
            documents,
            snapshots: SnapshotManager::new(store),
            registry: ExecutionRegistry::new(),
            event_bus: EventBus::default(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Use an existing registry (e.g. one a monitor already observes).
    pub fn with_registry(mut self, registry: ExecutionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn documents(&self) -> &D {
        &self.documents
    }

    /// Execute a definition with a fresh execution id.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        initial_context: HashMap<String, Value>,
    ) -> Result<Execution, EngineError> {
        self.execute_with_id(definition, Uuid::now_v7(), initial_context)
            .await
    }

    /// Execute a definition under a caller-chosen execution id.
    pub async fn execute_with_id(
        &self,
        definition: &WorkflowDefinition,
        execution_id: Uuid,
        initial_context: HashMap<String, Value>,
    ) -> Result<Execution, EngineError> {
        if let Some(state) = self.registry.with(&execution_id, |e| e.state) {
            if !state.is_terminal() {
                return Err(EngineError::AlreadyRunning(execution_id));
            }
        }

        let mut execution = Execution::new(definition.id.clone(), execution_id, initial_context);
        for step in definition.iter_steps() {
            execution
                .step_executions
                .insert(step.id.clone(), StepExecution::pending(step.id.clone()));
        }
        execution.state = ExecutionState::Running;
        let steps_total = execution.step_executions.len();
        let shared = self.registry.insert(execution);

        tracing::info!(
            execution_id = %execution_id,
            workflow_id = definition.id.as_str(),
            steps_total,
            "starting workflow execution"
        );
        self.event_bus.publish(WorkflowEvent::ExecutionStarted {
            execution_id,
            workflow_id: definition.id.clone(),
            steps_total,
        });
        self.checkpoint(&shared).await;

        let runner = StepRunner::new(
            self.pool.as_ref(),
            self.documents.as_ref(),
            &self.event_bus,
            Arc::clone(&shared),
            definition.settings.clone(),
            self.config.default_wait_secs,
        );

        for step in &definition.steps {
            if read_execution(&shared, |e| e.state) != ExecutionState::Running {
                break;
            }
            if let Err(e) = runner.run_step(step).await {
                let message = e.to_string();
                tracing::error!(
                    execution_id = %execution_id,
                    step_id = step.id.as_str(),
                    error = %message,
                    "workflow execution failed"
                );
                write_execution(&shared, |exec| {
                    exec.state = ExecutionState::Failed;
                    exec.error = Some(message);
                    exec.completed_at = Some(Utc::now());
                });
                break;
            }
            if self.config.checkpoint_each_step {
                self.checkpoint(&shared).await;
            }
        }

        write_execution(&shared, |exec| {
            if exec.state == ExecutionState::Running {
                exec.state = ExecutionState::Completed;
                exec.completed_at = Some(Utc::now());
            }
        });
        runner.release_workers().await;

        let finished = read_execution(&shared, Execution::clone);
        self.publish_outcome(&finished);
        self.snapshots
            .save(&finished)
            .await
            .map_err(|source| EngineError::Snapshot {
                execution_id,
                source,
            })?;
        Ok(finished)
    }

    /// Live status of an execution known to the registry.
    pub fn get_status(&self, execution_id: &Uuid) -> Option<ExecutionStatus> {
        self.registry.status(execution_id)
    }

    /// Load a persisted snapshot (inspection only; runs are not resumed).
    pub async fn load(&self, execution_id: &Uuid) -> Result<Execution, EngineError> {
        self.snapshots
            .load(execution_id)
            .await?
            .ok_or(EngineError::NotFound(*execution_id))
    }

    /// Recent persisted snapshots, newest first.
    pub async fn list(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ExecutionSummary>, EngineError> {
        Ok(self.snapshots.list(workflow_id, limit).await?)
    }

    /// Drop the engine's registry reference to a finished execution.
    pub fn forget(&self, execution_id: &Uuid) -> bool {
        self.registry.forget(execution_id)
    }

    async fn checkpoint(&self, shared: &SharedExecution) {
        let snapshot = read_execution(shared, Execution::clone);
        self.snapshots.checkpoint(&snapshot).await;
    }

    fn publish_outcome(&self, execution: &Execution) {
        let duration_ms = execution
            .elapsed(Utc::now())
            .num_milliseconds()
            .max(0) as u64;
        match execution.state {
            ExecutionState::Failed => {
                self.event_bus.publish(WorkflowEvent::ExecutionFailed {
                    execution_id: execution.execution_id,
                    workflow_id: execution.workflow_id.clone(),
                    error: execution.error.clone().unwrap_or_default(),
                });
            }
            _ => {
                tracing::info!(
                    execution_id = %execution.execution_id,
                    state = %execution.state,
                    duration_ms,
                    "workflow execution finished"
                );
                self.event_bus.publish(WorkflowEvent::ExecutionCompleted {
                    execution_id: execution.execution_id,
                    workflow_id: execution.workflow_id.clone(),
                    duration_ms,
                });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
