//! Bounded metric buffers and per-execution derived metrics.

use std::collections::{HashMap, VecDeque};

use cadence_types::execution::{Execution, StepState};
use cadence_types::monitor::{MetricKind, MetricPoint, WorkflowMetrics};
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// MetricStore
// ---------------------------------------------------------------------------

/// One bounded buffer per metric kind, appended oldest to newest.
#[derive(Debug)]
pub struct MetricStore {
    buffers: HashMap<MetricKind, VecDeque<MetricPoint>>,
    max_per_kind: usize,
}

impl MetricStore {
    pub fn new(max_per_kind: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            max_per_kind: max_per_kind.max(1),
        }
    }

    pub fn record(&mut self, point: MetricPoint) {
        let buffer = self.buffers.entry(point.kind).or_default();
        while buffer.len() >= self.max_per_kind {
            buffer.pop_front();
        }
        buffer.push_back(point);
    }

    /// Drop points older than `cutoff`. Returns how many were removed.
    pub fn prune_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for buffer in self.buffers.values_mut() {
            while buffer.front().is_some_and(|p| p.timestamp < cutoff) {
                buffer.pop_front();
                removed += 1;
            }
        }
        removed
    }

    pub fn points(&self, kind: MetricKind) -> Vec<MetricPoint> {
        self.buffers
            .get(&kind)
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, kind: MetricKind) -> Option<&MetricPoint> {
        self.buffers.get(&kind).and_then(|b| b.back())
    }

    pub fn len(&self, kind: MetricKind) -> usize {
        self.buffers.get(&kind).map_or(0, VecDeque::len)
    }

    pub fn total(&self) -> usize {
        self.buffers.values().map(VecDeque::len).sum()
    }
}

// ---------------------------------------------------------------------------
// Derived metrics
// ---------------------------------------------------------------------------

/// Derive per-execution metrics from its step records.
pub fn derive_metrics(execution: &Execution, now: DateTime<Utc>) -> WorkflowMetrics {
    let total = execution.step_executions.len();
    let completed = execution.count_steps(StepState::Completed);
    let failed = execution.count_steps(StepState::Failed);

    let finished: Vec<f64> = execution
        .step_executions
        .values()
        .filter(|s| s.completed_at.is_some())
        .filter_map(|s| s.elapsed(now))
        .map(seconds)
        .collect();

    let mut worker_step_counts = HashMap::new();
    for worker in execution
        .step_executions
        .values()
        .filter_map(|s| s.worker.as_ref())
    {
        *worker_step_counts.entry(worker.clone()).or_insert(0) += 1;
    }

    WorkflowMetrics {
        execution_id: execution.execution_id,
        workflow_id: execution.workflow_id.clone(),
        state: execution.state,
        total_steps: total,
        completed_steps: completed,
        failed_steps: failed,
        skipped_steps: execution.count_steps(StepState::Skipped),
        running_steps: execution.count_steps(StepState::Running),
        duration_secs: seconds(execution.elapsed(now)),
        error_rate: ratio(failed, total),
        success_rate: ratio(completed, total),
        average_step_duration_secs: mean(&finished),
        worker_step_counts,
    }
}

/// Worker -> number of steps currently running on it.
pub fn running_workers(execution: &Execution) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for step in execution.step_executions.values() {
        if step.state == StepState::Running {
            if let Some(worker) = &step.worker {
                *counts.entry(worker.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}

pub(crate) fn seconds(d: chrono::Duration) -> f64 {
    d.num_milliseconds().max(0) as f64 / 1000.0
}

pub(crate) fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use cadence_types::execution::{ExecutionState, StepExecution};
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;

    fn point_at(kind: MetricKind, value: f64, at: DateTime<Utc>) -> MetricPoint {
        let mut p = MetricPoint::new(kind, value);
        p.timestamp = at;
        p
    }

    #[test]
    fn test_buffer_is_bounded_per_kind() {
        let mut store = MetricStore::new(2);
        for v in 0..5 {
            store.record(MetricPoint::new(MetricKind::QueueDepth, v as f64));
        }
        store.record(MetricPoint::new(MetricKind::Throughput, 1.0));
        assert_eq!(store.len(MetricKind::QueueDepth), 2);
        assert_eq!(store.len(MetricKind::Throughput), 1);
        let values: Vec<f64> = store
            .points(MetricKind::QueueDepth)
            .iter()
            .map(|p| p.value)
            .collect();
        assert_eq!(values, vec![3.0, 4.0]);
        assert_eq!(store.latest(MetricKind::QueueDepth).unwrap().value, 4.0);
    }

    #[test]
    fn test_prune_drops_only_expired_front() {
        let now = Utc::now();
        let mut store = MetricStore::new(100);
        store.record(point_at(MetricKind::WorkflowDuration, 1.0, now - Duration::hours(30)));
        store.record(point_at(MetricKind::WorkflowDuration, 2.0, now - Duration::hours(25)));
        store.record(point_at(MetricKind::WorkflowDuration, 3.0, now - Duration::hours(1)));
        store.record(point_at(MetricKind::ErrorRate, 1.0, now - Duration::hours(48)));

        let removed = store.prune_older_than(now - Duration::hours(24));
        assert_eq!(removed, 3);
        assert_eq!(store.len(MetricKind::WorkflowDuration), 1);
        assert_eq!(store.len(MetricKind::ErrorRate), 0);
        assert_eq!(store.total(), 1);
    }

    #[test]
    fn test_derive_metrics_counts_and_rates() {
        let now = Utc::now();
        let mut exec = Execution::new("wf", Uuid::now_v7(), HashMap::new());
        exec.state = ExecutionState::Running;
        exec.started_at = now - Duration::seconds(100);

        let mut done = StepExecution::pending("a");
        done.state = StepState::Completed;
        done.worker = Some("dev".to_string());
        done.started_at = Some(now - Duration::seconds(90));
        done.completed_at = Some(now - Duration::seconds(80));

        let mut failed = StepExecution::pending("b");
        failed.state = StepState::Failed;
        failed.worker = Some("dev".to_string());
        failed.started_at = Some(now - Duration::seconds(70));
        failed.completed_at = Some(now - Duration::seconds(40));

        let mut running = StepExecution::pending("c");
        running.state = StepState::Running;
        running.worker = Some("qa".to_string());
        running.started_at = Some(now - Duration::seconds(5));

        for s in [done, failed, running, StepExecution::pending("d")] {
            exec.step_executions.insert(s.step_id.clone(), s);
        }

        let m = derive_metrics(&exec, now);
        assert_eq!(m.total_steps, 4);
        assert_eq!(m.completed_steps, 1);
        assert_eq!(m.failed_steps, 1);
        assert_eq!(m.running_steps, 1);
        assert!((m.error_rate - 0.25).abs() < 1e-9);
        assert!((m.success_rate - 0.25).abs() < 1e-9);
        assert!((m.average_step_duration_secs - 20.0).abs() < 1e-9);
        assert!((m.duration_secs - 100.0).abs() < 1e-9);
        assert_eq!(m.worker_step_counts["dev"], 2);
        assert_eq!(m.worker_step_counts["qa"], 1);

        let running = running_workers(&exec);
        assert_eq!(running.len(), 1);
        assert_eq!(running["qa"], 1);
    }

    #[test]
    fn test_empty_execution_has_zero_rates() {
        let exec = Execution::new("wf", Uuid::now_v7(), HashMap::new());
        let m = derive_metrics(&exec, Utc::now());
        assert_eq!(m.error_rate, 0.0);
        assert_eq!(m.success_rate, 0.0);
        assert_eq!(m.average_step_duration_secs, 0.0);
    }
}
