//! Dashboard row builders over execution snapshots.

use cadence_types::execution::{Execution, ExecutionState, StepState};
use cadence_types::monitor::{ActiveExecution, RollingAggregate};
use chrono::{DateTime, Duration, Utc};

use super::metrics::{mean, ratio, seconds};

/// Trailing window for the rolling aggregate and throughput sample.
pub const ROLLING_WINDOW_SECS: i64 = 300;

/// Number of alerts included in the dashboard snapshot.
pub const RECENT_ALERTS: usize = 10;

/// Progress row for a non-terminal execution.
pub fn active_execution(execution: &Execution, now: DateTime<Utc>) -> ActiveExecution {
    let steps_total = execution.step_executions.len();
    let steps_completed = execution.count_steps(StepState::Completed);

    // Most recently started running step (nested runs keep the parent running).
    let current_step = execution
        .step_executions
        .values()
        .filter(|s| s.state == StepState::Running)
        .max_by_key(|s| s.started_at)
        .map(|s| s.step_id.clone());

    ActiveExecution {
        execution_id: execution.execution_id,
        workflow_id: execution.workflow_id.clone(),
        state: execution.state,
        steps_completed,
        steps_total,
        progress: ratio(steps_completed, steps_total),
        current_step,
        elapsed_secs: seconds(execution.elapsed(now)),
    }
}

/// Aggregate over executions started within the trailing window.
pub fn rolling_aggregate<'a>(
    executions: impl IntoIterator<Item = &'a Execution>,
    now: DateTime<Utc>,
) -> RollingAggregate {
    let since = now - Duration::seconds(ROLLING_WINDOW_SECS);
    let recent: Vec<&Execution> = executions
        .into_iter()
        .filter(|e| e.started_at >= since)
        .collect();

    let durations: Vec<f64> = recent.iter().map(|e| seconds(e.elapsed(now))).collect();
    let failed = recent
        .iter()
        .filter(|e| e.state == ExecutionState::Failed)
        .count();
    let completed = recent
        .iter()
        .filter(|e| e.state == ExecutionState::Completed)
        .count();

    RollingAggregate {
        window_secs: ROLLING_WINDOW_SECS as u64,
        executions: recent.len(),
        average_duration_secs: mean(&durations),
        error_rate: ratio(failed, recent.len()),
        success_rate: ratio(completed, recent.len()),
    }
}

/// Completions per minute over the trailing window.
pub fn throughput<'a>(
    executions: impl IntoIterator<Item = &'a Execution>,
    now: DateTime<Utc>,
) -> f64 {
    let since = now - Duration::seconds(ROLLING_WINDOW_SECS);
    let finished = executions
        .into_iter()
        .filter(|e| e.completed_at.is_some_and(|at| at >= since))
        .count();
    finished as f64 / (ROLLING_WINDOW_SECS as f64 / 60.0)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use cadence_types::execution::StepExecution;
    use uuid::Uuid;

    use super::*;

    fn exec(state: ExecutionState, started_ago: i64, now: DateTime<Utc>) -> Execution {
        let mut e = Execution::new("wf", Uuid::now_v7(), HashMap::new());
        e.state = state;
        e.started_at = now - Duration::seconds(started_ago);
        if state.is_terminal() {
            e.completed_at = Some(now);
        }
        e
    }

    #[test]
    fn test_active_execution_progress_and_current_step() {
        let now = Utc::now();
        let mut e = exec(ExecutionState::Running, 30, now);
        let mut a = StepExecution::pending("a");
        a.state = StepState::Completed;
        let mut parent = StepExecution::pending("fan");
        parent.state = StepState::Running;
        parent.started_at = Some(now - Duration::seconds(20));
        let mut child = StepExecution::pending("child");
        child.state = StepState::Running;
        child.started_at = Some(now - Duration::seconds(10));
        for s in [a, parent, child, StepExecution::pending("z")] {
            e.step_executions.insert(s.step_id.clone(), s);
        }

        let row = active_execution(&e, now);
        assert_eq!(row.steps_completed, 1);
        assert_eq!(row.steps_total, 4);
        assert!((row.progress - 0.25).abs() < 1e-9);
        assert_eq!(row.current_step.as_deref(), Some("child"));
        assert!((row.elapsed_secs - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_aggregate_ignores_old_executions() {
        let now = Utc::now();
        let execs = vec![
            exec(ExecutionState::Completed, 60, now),
            exec(ExecutionState::Failed, 120, now),
            exec(ExecutionState::Running, 30, now),
            exec(ExecutionState::Completed, 3600, now),
        ];
        let agg = rolling_aggregate(&execs, now);
        assert_eq!(agg.window_secs, 300);
        assert_eq!(agg.executions, 3);
        assert!((agg.average_duration_secs - 70.0).abs() < 1e-9);
        assert!((agg.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((agg.success_rate - 1.0 / 3.0).abs() < 1e-9);

        // Completions in the last five minutes: three (including the old one
        // that just finished), over five minutes.
        assert!((throughput(&execs, now) - 0.6).abs() < 1e-9);
    }
}
