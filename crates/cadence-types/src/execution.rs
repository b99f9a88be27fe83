//! Execution records for Cadence workflow runs.
//!
//! One `Execution` exists per run. It is created and mutated only by the
//! engine; everything else (monitor, CLI, snapshot stores) reads copies or
//! borrows. The serialized form of `Execution` is the snapshot format.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Lifecycle state of an execution.
///
/// `Paused` and `Cancelled` are reserved: the engine never transitions into
/// them, but snapshots and external tooling may carry them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionState {
    /// Whether no further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Running => "running",
            ExecutionState::Paused => "paused",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
            ExecutionState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionState::Pending),
            "running" => Ok(ExecutionState::Running),
            "paused" => Ok(ExecutionState::Paused),
            "completed" => Ok(ExecutionState::Completed),
            "failed" => Ok(ExecutionState::Failed),
            "cancelled" => Ok(ExecutionState::Cancelled),
            other => Err(format!("unknown execution state: {other}")),
        }
    }
}

/// Lifecycle state of a single step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Running => "running",
            StepState::Completed => "completed",
            StepState::Failed => "failed",
            StepState::Skipped => "skipped",
            StepState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Step Execution
// ---------------------------------------------------------------------------

/// Run-time record of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub state: StepState,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Worker/role assigned to this step, if any.
    #[serde(default)]
    pub worker: Option<String>,
    #[serde(default)]
    pub documents_created: Vec<String>,
    #[serde(default)]
    pub documents_consumed: Vec<String>,
    /// Incremented only by external retry drivers.
    #[serde(default)]
    pub retry_count: u32,
}

impl StepExecution {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            state: StepState::Pending,
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
            worker: None,
            documents_created: Vec::new(),
            documents_consumed: Vec::new(),
            retry_count: 0,
        }
    }

    /// Elapsed time of this step. Running steps are measured against `now`.
    /// `None` if the step never started.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let started = self.started_at?;
        Some(self.completed_at.unwrap_or(now) - started)
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// One run-time instance of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub state: ExecutionState,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Accumulated step outputs keyed `step_<id>`, plus the initial context.
    #[serde(default)]
    pub context: HashMap<String, Value>,
    /// Produced document name -> storage handle.
    #[serde(default)]
    pub documents: HashMap<String, String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub step_executions: HashMap<String, StepExecution>,
}

impl Execution {
    /// Create a pending execution with the given seed context.
    pub fn new(
        workflow_id: impl Into<String>,
        execution_id: Uuid,
        context: HashMap<String, Value>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id,
            state: ExecutionState::Pending,
            started_at: Utc::now(),
            completed_at: None,
            context,
            documents: HashMap::new(),
            error: None,
            step_executions: HashMap::new(),
        }
    }

    /// Total elapsed time, measured against `now` while still running.
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.completed_at.unwrap_or(now) - self.started_at
    }

    pub fn count_steps(&self, state: StepState) -> usize {
        self.step_executions
            .values()
            .filter(|s| s.state == state)
            .count()
    }

    /// Condensed status view.
    pub fn status(&self) -> ExecutionStatus {
        ExecutionStatus {
            execution_id: self.execution_id,
            workflow_id: self.workflow_id.clone(),
            state: self.state,
            started_at: self.started_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
            steps_completed: self.count_steps(StepState::Completed),
            steps_total: self.step_executions.len(),
        }
    }
}

/// Condensed status of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub state: ExecutionState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub steps_completed: usize,
    pub steps_total: usize,
}

/// Lightweight listing row for persisted snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub state: ExecutionState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Execution> for ExecutionSummary {
    fn from(e: &Execution) -> Self {
        Self {
            execution_id: e.execution_id,
            workflow_id: e.workflow_id.clone(),
            state: e.state,
            started_at: e.started_at,
            completed_at: e.completed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Execution {
        let mut exec = Execution::new("wf1", Uuid::now_v7(), HashMap::new());
        exec.state = ExecutionState::Running;
        let mut s1 = StepExecution::pending("s1");
        s1.state = StepState::Completed;
        s1.started_at = Some(Utc::now());
        s1.completed_at = Some(Utc::now());
        s1.output = Some(json!({"waited": 0}));
        exec.step_executions.insert("s1".into(), s1);
        exec.step_executions
            .insert("s2".into(), StepExecution::pending("s2"));
        exec
    }

    #[test]
    fn test_status_counts_completed_and_total() {
        let status = sample().status();
        assert_eq!(status.steps_completed, 1);
        assert_eq!(status.steps_total, 2);
        assert_eq!(status.state, ExecutionState::Running);
    }

    #[test]
    fn test_terminal_states() {
        assert!(ExecutionState::Completed.is_terminal());
        assert!(ExecutionState::Failed.is_terminal());
        assert!(ExecutionState::Cancelled.is_terminal());
        assert!(!ExecutionState::Running.is_terminal());
        assert!(!ExecutionState::Paused.is_terminal());
    }

    #[test]
    fn test_state_serializes_by_name() {
        assert_eq!(
            serde_json::to_value(ExecutionState::Completed).unwrap(),
            json!("completed")
        );
        assert_eq!(
            serde_json::to_value(StepState::Skipped).unwrap(),
            json!("skipped")
        );
        assert_eq!(
            "failed".parse::<ExecutionState>().unwrap(),
            ExecutionState::Failed
        );
        assert!("bogus".parse::<ExecutionState>().is_err());
    }

    #[test]
    fn test_execution_json_roundtrip_keeps_nanosecond_timestamps() {
        let exec = sample();
        let text = serde_json::to_string(&exec).unwrap();
        let back: Execution = serde_json::from_str(&text).unwrap();
        assert_eq!(back, exec);
    }

    #[test]
    fn test_execution_json_roundtrip_keeps_float_bits() {
        let mut exec = sample();
        let floats = [
            0.9749512713538497,
            0.9050670628910671,
            0.20153789807968714,
            1.0372794798492697,
        ];
        exec.context.insert("scores".into(), json!(floats));
        if let Some(step) = exec.step_executions.get_mut("s1") {
            step.output = Some(json!({"confidence": floats[0]}));
        }

        let text = serde_json::to_string(&exec).unwrap();
        let back: Execution = serde_json::from_str(&text).unwrap();
        assert_eq!(back, exec);
        let scores: Vec<f64> = serde_json::from_value(back.context["scores"].clone()).unwrap();
        assert_eq!(scores, floats);
    }

    #[test]
    fn test_step_elapsed_uses_now_while_running() {
        let now = Utc::now();
        let mut step = StepExecution::pending("s");
        assert!(step.elapsed(now).is_none());
        step.started_at = Some(now - chrono::Duration::seconds(400));
        assert_eq!(step.elapsed(now).unwrap().num_seconds(), 400);
    }
}
