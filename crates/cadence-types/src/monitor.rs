//! Monitoring domain types: alerts, metric points, derived metrics and the
//! dashboard snapshot returned by the monitor's query surface.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::execution::ExecutionState;

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Alert severity level, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "INFO"),
            AlertSeverity::Warning => write!(f, "WARNING"),
            AlertSeverity::Error => write!(f, "ERROR"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(AlertSeverity::Info),
            "warning" | "warn" => Ok(AlertSeverity::Warning),
            "error" => Ok(AlertSeverity::Error),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(format!("unknown alert severity: {other}")),
        }
    }
}

/// An alert raised by the monitor.
///
/// Immutable once emitted except for the acknowledgment fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Alert {
    pub fn new(
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            severity,
            title: title.into(),
            message: message.into(),
            workflow_id: None,
            execution_id: None,
            step_id: None,
            agent_id: None,
            timestamp: Utc::now(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_execution(mut self, workflow_id: impl Into<String>, execution_id: Uuid) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self.execution_id = Some(execution_id);
        self
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Single-line text rendering for logs and terminals.
    pub fn format_text(&self) -> String {
        let mut text = format!(
            "[{}] {} - {}: {}",
            self.severity,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.title,
            self.message
        );
        if let Some(ref step) = self.step_id {
            text.push_str(&format!(" (step {step})"));
        }
        text
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Kind of a sampled metric. Each kind has its own bounded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    WorkflowDuration,
    StepDuration,
    AgentUtilization,
    ErrorRate,
    SuccessRate,
    Throughput,
    QueueDepth,
}

impl MetricKind {
    pub const ALL: [MetricKind; 7] = [
        MetricKind::WorkflowDuration,
        MetricKind::StepDuration,
        MetricKind::AgentUtilization,
        MetricKind::ErrorRate,
        MetricKind::SuccessRate,
        MetricKind::Throughput,
        MetricKind::QueueDepth,
    ];
}

/// A single timestamped metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub kind: MetricKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl MetricPoint {
    pub fn new(kind: MetricKind, value: f64) -> Self {
        Self {
            kind,
            value,
            timestamp: Utc::now(),
            labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Metrics derived from a single execution's step records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub state: ExecutionState,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub running_steps: usize,
    pub duration_secs: f64,
    /// failed / total (0 when there are no steps).
    pub error_rate: f64,
    /// completed / total (0 when there are no steps).
    pub success_rate: f64,
    /// Mean duration over steps that have finished.
    pub average_step_duration_secs: f64,
    /// Worker/role -> number of steps it was assigned.
    pub worker_step_counts: HashMap<String, usize>,
}

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

/// Snapshot of everything a dashboard needs in one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardData {
    pub generated_at: DateTime<Utc>,
    pub summary: DashboardSummary,
    pub active_executions: Vec<ActiveExecution>,
    pub recent_alerts: Vec<Alert>,
    pub rolling: RollingAggregate,
    /// Worker/role -> currently running steps across tracked executions.
    pub worker_utilization: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub tracked_executions: usize,
    pub active_executions: usize,
    pub completed_executions: u64,
    pub failed_executions: u64,
    pub total_alerts: u64,
    pub unacknowledged_alerts: usize,
}

/// Progress row for a non-terminal execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveExecution {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub state: ExecutionState,
    pub steps_completed: usize,
    pub steps_total: usize,
    /// completed / total in `[0, 1]`.
    pub progress: f64,
    /// The running step, if any.
    pub current_step: Option<String>,
    pub elapsed_secs: f64,
}

/// Aggregate over executions started within a trailing window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingAggregate {
    pub window_secs: u64,
    pub executions: usize,
    pub average_duration_secs: f64,
    pub error_rate: f64,
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_and_parse() {
        assert!(AlertSeverity::Critical > AlertSeverity::Error);
        assert!(AlertSeverity::Warning > AlertSeverity::Info);
        assert_eq!("warn".parse::<AlertSeverity>().unwrap(), AlertSeverity::Warning);
        assert_eq!("ERROR".parse::<AlertSeverity>().unwrap(), AlertSeverity::Error);
        assert!("loud".parse::<AlertSeverity>().is_err());
    }

    #[test]
    fn test_alert_builder_and_format() {
        let exec_id = Uuid::now_v7();
        let alert = Alert::new(AlertSeverity::Warning, "Long Running Step", "too slow")
            .with_execution("wf1", exec_id)
            .with_step("s1")
            .with_metadata("elapsed_secs", 400);
        assert_eq!(alert.workflow_id.as_deref(), Some("wf1"));
        assert_eq!(alert.execution_id, Some(exec_id));
        assert!(!alert.acknowledged);
        let text = alert.format_text();
        assert!(text.starts_with("[WARNING]"));
        assert!(text.contains("Long Running Step"));
        assert!(text.contains("(step s1)"));
    }

    #[test]
    fn test_metric_kind_serde_names() {
        assert_eq!(
            serde_json::to_value(MetricKind::AgentUtilization).unwrap(),
            serde_json::json!("agent_utilization")
        );
        assert_eq!(MetricKind::ALL.len(), 7);
    }
}
