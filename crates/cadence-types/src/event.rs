//! Event types for the Cadence workflow event bus.
//!
//! `WorkflowEvent` is broadcast by the engine as executions and steps change
//! state. All variants are Clone + Send + Sync for use with tokio broadcast
//! channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle events emitted during workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: String,
        steps_total: usize,
    },

    ExecutionCompleted {
        execution_id: Uuid,
        workflow_id: String,
        duration_ms: u64,
    },

    ExecutionFailed {
        execution_id: Uuid,
        workflow_id: String,
        error: String,
    },

    StepStarted {
        execution_id: Uuid,
        step_id: String,
        step_type: String,
    },

    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        duration_ms: u64,
    },

    StepFailed {
        execution_id: Uuid,
        step_id: String,
        error: String,
    },

    /// An optional step failed and was downgraded to skipped.
    StepSkipped {
        execution_id: Uuid,
        step_id: String,
        reason: String,
    },
}

impl WorkflowEvent {
    /// Execution the event belongs to.
    pub fn execution_id(&self) -> Uuid {
        match self {
            WorkflowEvent::ExecutionStarted { execution_id, .. }
            | WorkflowEvent::ExecutionCompleted { execution_id, .. }
            | WorkflowEvent::ExecutionFailed { execution_id, .. }
            | WorkflowEvent::StepStarted { execution_id, .. }
            | WorkflowEvent::StepCompleted { execution_id, .. }
            | WorkflowEvent::StepFailed { execution_id, .. }
            | WorkflowEvent::StepSkipped { execution_id, .. } => *execution_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagged_serialization() {
        let id = Uuid::now_v7();
        let event = WorkflowEvent::StepSkipped {
            execution_id: id,
            step_id: "s2".to_string(),
            reason: "worker crashed".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_skipped");
        assert_eq!(json["step_id"], "s2");
        assert_eq!(event.execution_id(), id);
    }
}
