//! Threshold checks run against a live execution on every monitoring tick.
//!
//! Checks are stateless: a condition that persists re-fires on every tick.

use cadence_types::config::MonitorConfig;
use cadence_types::execution::{Execution, StepState};
use cadence_types::monitor::{Alert, AlertSeverity};
use chrono::{DateTime, Utc};

use super::metrics::ratio;

pub const LONG_RUNNING_WORKFLOW: &str = "Long Running Workflow";
pub const LONG_RUNNING_STEP: &str = "Long Running Step";
pub const MAX_RETRIES_EXCEEDED: &str = "Max Retries Exceeded";
pub const HIGH_ERROR_RATE: &str = "High Error Rate";
pub const WORKFLOW_FAILED: &str = "Workflow Failed";

/// Evaluate every threshold against one execution.
pub fn threshold_alerts(
    execution: &Execution,
    config: &MonitorConfig,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let wf = execution.workflow_id.as_str();
    let id = execution.execution_id;

    let elapsed = execution.elapsed(now).num_seconds();
    if elapsed > config.max_workflow_duration_secs as i64 {
        alerts.push(
            Alert::new(
                AlertSeverity::Warning,
                LONG_RUNNING_WORKFLOW,
                format!(
                    "workflow '{wf}' has been running for {elapsed}s (limit {}s)",
                    config.max_workflow_duration_secs
                ),
            )
            .with_execution(wf, id)
            .with_metadata("elapsed_secs", elapsed),
        );
    }

    let mut steps: Vec<_> = execution.step_executions.values().collect();
    steps.sort_by(|a, b| a.step_id.cmp(&b.step_id));

    for step in &steps {
        if step.state != StepState::Running {
            continue;
        }
        let Some(step_elapsed) = step.elapsed(now).map(|d| d.num_seconds()) else {
            continue;
        };
        if step_elapsed > config.max_step_duration_secs as i64 {
            let mut alert = Alert::new(
                AlertSeverity::Warning,
                LONG_RUNNING_STEP,
                format!(
                    "step '{}' has been running for {step_elapsed}s (limit {}s)",
                    step.step_id, config.max_step_duration_secs
                ),
            )
            .with_execution(wf, id)
            .with_step(&step.step_id)
            .with_metadata("elapsed_secs", step_elapsed);
            if let Some(worker) = &step.worker {
                alert = alert.with_agent(worker);
            }
            alerts.push(alert);
        }
    }

    for step in steps
        .iter()
        .filter(|s| s.retry_count >= config.max_retry_count)
    {
        alerts.push(
            Alert::new(
                AlertSeverity::Error,
                MAX_RETRIES_EXCEEDED,
                format!(
                    "step '{}' has been retried {} times (limit {})",
                    step.step_id, step.retry_count, config.max_retry_count
                ),
            )
            .with_execution(wf, id)
            .with_step(&step.step_id)
            .with_metadata("retry_count", step.retry_count),
        );
    }

    let failed = execution.count_steps(StepState::Failed);
    let error_rate = ratio(failed, execution.step_executions.len());
    if error_rate > config.max_error_rate {
        alerts.push(
            Alert::new(
                AlertSeverity::Error,
                HIGH_ERROR_RATE,
                format!(
                    "{failed} of {} steps failed ({:.0}% > {:.0}%)",
                    execution.step_executions.len(),
                    error_rate * 100.0,
                    config.max_error_rate * 100.0
                ),
            )
            .with_execution(wf, id)
            .with_metadata("error_rate", error_rate),
        );
    }

    alerts
}

/// Alert for an execution observed in the `Failed` state.
pub fn failure_alert(execution: &Execution) -> Alert {
    Alert::new(
        AlertSeverity::Error,
        WORKFLOW_FAILED,
        format!(
            "workflow '{}' failed: {}",
            execution.workflow_id,
            execution.error.as_deref().unwrap_or("unknown error")
        ),
    )
    .with_execution(&execution.workflow_id, execution.execution_id)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use cadence_types::execution::{ExecutionState, StepExecution};
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;

    fn running_execution(now: DateTime<Utc>) -> Execution {
        let mut exec = Execution::new("wf", Uuid::now_v7(), HashMap::new());
        exec.state = ExecutionState::Running;
        exec.started_at = now - Duration::seconds(10);
        exec
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            max_step_duration_secs: 60,
            max_workflow_duration_secs: 600,
            ..MonitorConfig::default()
        }
    }

    fn titles(alerts: &[Alert]) -> Vec<&str> {
        alerts.iter().map(|a| a.title.as_str()).collect()
    }

    #[test]
    fn test_healthy_execution_raises_nothing() {
        let now = Utc::now();
        let mut exec = running_execution(now);
        let mut step = StepExecution::pending("s1");
        step.state = StepState::Running;
        step.started_at = Some(now - Duration::seconds(5));
        exec.step_executions.insert("s1".into(), step);
        assert!(threshold_alerts(&exec, &config(), now).is_empty());
    }

    #[test]
    fn test_long_running_step_and_workflow() {
        let now = Utc::now();
        let mut exec = running_execution(now);
        exec.started_at = now - Duration::seconds(700);
        let mut step = StepExecution::pending("s1");
        step.state = StepState::Running;
        step.worker = Some("dev".into());
        step.started_at = Some(now - Duration::seconds(400));
        exec.step_executions.insert("s1".into(), step);

        // A completed step that took long is not flagged.
        let mut old = StepExecution::pending("s0");
        old.state = StepState::Completed;
        old.started_at = Some(now - Duration::seconds(690));
        old.completed_at = Some(now - Duration::seconds(401));
        exec.step_executions.insert("s0".into(), old);

        let alerts = threshold_alerts(&exec, &config(), now);
        assert_eq!(titles(&alerts), vec![LONG_RUNNING_WORKFLOW, LONG_RUNNING_STEP]);
        let step_alert = &alerts[1];
        assert_eq!(step_alert.severity, AlertSeverity::Warning);
        assert_eq!(step_alert.step_id.as_deref(), Some("s1"));
        assert_eq!(step_alert.agent_id.as_deref(), Some("dev"));
        assert_eq!(step_alert.execution_id, Some(exec.execution_id));
    }

    #[test]
    fn test_retries_and_error_rate() {
        let now = Utc::now();
        let mut exec = running_execution(now);
        let mut retried = StepExecution::pending("a");
        retried.retry_count = 3;
        let mut failed = StepExecution::pending("b");
        failed.state = StepState::Failed;
        exec.step_executions.insert("a".into(), retried);
        exec.step_executions.insert("b".into(), failed);

        let alerts = threshold_alerts(&exec, &config(), now);
        assert_eq!(titles(&alerts), vec![MAX_RETRIES_EXCEEDED, HIGH_ERROR_RATE]);
        assert!(alerts.iter().all(|a| a.severity == AlertSeverity::Error));
    }

    #[test]
    fn test_failure_alert_carries_error() {
        let mut exec = running_execution(Utc::now());
        exec.state = ExecutionState::Failed;
        exec.error = Some("worker crashed".into());
        let alert = failure_alert(&exec);
        assert_eq!(alert.title, WORKFLOW_FAILED);
        assert_eq!(alert.severity, AlertSeverity::Error);
        assert!(alert.message.contains("worker crashed"));
    }
}
