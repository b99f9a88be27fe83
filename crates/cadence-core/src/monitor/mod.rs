//! Execution monitor: threshold alerts, metric sampling and dashboard queries.
//!
//! The monitor observes executions through the engine's `ExecutionRegistry`
//! by id. It never holds an owning reference to an execution and never
//! mutates one: when the engine forgets an execution, the monitor's entry
//! simply stops resolving and is pruned by the health loop.
//!
//! - `alerts` -- ring buffer and handler trait
//! - `metrics` -- bounded metric buffers and derived per-execution metrics
//! - `checks` -- threshold checks run on every tick
//! - `dashboard` -- progress rows and rolling aggregates

pub mod alerts;
pub mod checks;
pub mod dashboard;
pub mod metrics;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use cadence_types::config::MonitorConfig;
use cadence_types::execution::{Execution, ExecutionState, ExecutionStatus, StepState};
use cadence_types::monitor::{
    Alert, AlertSeverity, DashboardData, DashboardSummary, MetricKind, MetricPoint,
    WorkflowMetrics,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::workflow::registry::ExecutionRegistry;

/// Label value for samples taken across all tracked executions.
pub const GLOBAL_SCOPE: &str = "global";

pub use alerts::{AlertBuffer, AlertHandler, LogAlertHandler};
pub use metrics::MetricStore;

/// Capacity of the real-time alert channel.
const ALERT_CHANNEL_CAPACITY: usize = 256;

/// Period of the metric retention sweep.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("alert {0} not found")]
    AlertNotFound(Uuid),

    #[error("alert handler '{handler}' failed: {message}")]
    Handler { handler: String, message: String },
}

/// Per-execution monitor bookkeeping. Holds no execution data.
#[derive(Debug, Default, Clone, Copy)]
struct Tracked {
    outcome_observed: bool,
}

struct Inner {
    registry: ExecutionRegistry,
    config: MonitorConfig,
    tracked: DashMap<Uuid, Tracked>,
    alerts: Mutex<AlertBuffer>,
    metrics: Mutex<MetricStore>,
    handlers: RwLock<Vec<Arc<dyn AlertHandler>>>,
    completed: AtomicU64,
    failed: AtomicU64,
    total_alerts: AtomicU64,
    alert_tx: Mutex<Option<broadcast::Sender<Alert>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Cheaply cloneable handle to a shared monitor.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    /// Create a monitor over `registry`. A `LogAlertHandler` is installed.
    pub fn new(registry: ExecutionRegistry, config: MonitorConfig) -> Self {
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        let handlers: Vec<Arc<dyn AlertHandler>> = vec![Arc::new(LogAlertHandler)];
        Self {
            inner: Arc::new(Inner {
                registry,
                alerts: Mutex::new(AlertBuffer::new(config.max_alerts)),
                metrics: Mutex::new(MetricStore::new(config.max_metrics_per_type)),
                config,
                tracked: DashMap::new(),
                handlers: RwLock::new(handlers),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                total_alerts: AtomicU64::new(0),
                alert_tx: Mutex::new(Some(alert_tx)),
                cancel: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Start observing an execution. Returns whether it is currently live in
    /// the registry.
    pub fn track(&self, execution_id: Uuid) -> bool {
        self.inner.tracked.entry(execution_id).or_default();
        tracing::debug!(execution_id = %execution_id, "tracking execution");
        self.inner.registry.contains(&execution_id)
    }

    pub fn untrack(&self, execution_id: &Uuid) -> bool {
        self.inner.tracked.remove(execution_id).is_some()
    }

    pub fn tracked_ids(&self) -> Vec<Uuid> {
        self.inner.tracked.iter().map(|e| *e.key()).collect()
    }

    pub fn add_handler(&self, handler: impl AlertHandler + 'static) {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Real-time alert feed. After `stop()` the receiver is already closed.
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        match lock(&self.inner.alert_tx).as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    // -----------------------------------------------------------------------
    // Background loops
    // -----------------------------------------------------------------------

    /// Spawn the monitoring, cleanup and health loops on the current runtime.
    ///
    /// Calling `start` on a running or stopped monitor does nothing.
    pub fn start(&self) {
        let mut tasks = lock(&self.inner.tasks);
        if !tasks.is_empty() || self.inner.cancel.is_cancelled() {
            return;
        }
        let config = &self.inner.config;
        tasks.push(self.spawn_loop(
            "monitoring",
            config.metric_collection_interval(),
            Monitor::run_checks,
        ));
        tasks.push(self.spawn_loop("cleanup", CLEANUP_INTERVAL, |m| {
            m.cleanup_metrics();
        }));
        tasks.push(self.spawn_loop("health", config.health_check_interval(), |m| {
            m.health_check();
        }));
        tracing::info!(
            interval_secs = config.metric_collection_interval().as_secs(),
            "monitor started"
        );
    }

    /// Cancel the loops, wait for them to exit and close the alert channel.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = lock(&self.inner.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "monitor loop ended abnormally");
            }
        }
        lock(&self.inner.alert_tx).take();
        tracing::info!("monitor stopped");
    }

    fn spawn_loop(
        &self,
        name: &'static str,
        period: Duration,
        tick: fn(&Monitor),
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        let cancel = self.inner.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if std::panic::catch_unwind(AssertUnwindSafe(|| tick(&monitor))).is_err() {
                            tracing::error!(loop_name = name, "monitor tick panicked");
                        }
                    }
                }
            }
            tracing::debug!(loop_name = name, "monitor loop exited");
        })
    }

    // -----------------------------------------------------------------------
    // Ticks
    // -----------------------------------------------------------------------

    /// One monitoring pass over every tracked execution.
    ///
    /// Live executions get threshold checks and metric samples. A terminal
    /// execution has its outcome recorded exactly once.
    pub fn run_checks(&self) {
        let now = Utc::now();
        let snapshots = self.tracked_snapshots();

        let mut queue_depth = 0;
        for execution in &snapshots {
            if execution.state.is_terminal() {
                self.observe_outcome(execution, now);
                continue;
            }
            for alert in checks::threshold_alerts(execution, &self.inner.config, now) {
                self.emit(alert);
            }
            self.sample(execution, now);
            queue_depth += execution.count_steps(StepState::Pending);
        }

        self.record_metric(
            MetricPoint::new(MetricKind::QueueDepth, queue_depth as f64)
                .with_label("scope", GLOBAL_SCOPE),
        );
        self.record_metric(
            MetricPoint::new(MetricKind::Throughput, dashboard::throughput(&snapshots, now))
                .with_label("scope", GLOBAL_SCOPE),
        );
    }

    /// Drop metric points older than the retention window.
    pub fn cleanup_metrics(&self) -> usize {
        let cutoff = Utc::now()
            .checked_sub_signed(self.inner.config.metric_retention())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = lock(&self.inner.metrics).prune_older_than(cutoff);
        if removed > 0 {
            tracing::debug!(removed, "pruned expired metric points");
        }
        removed
    }

    /// Forget tracked ids the registry no longer knows. Returns how many.
    pub fn health_check(&self) -> usize {
        let registry = &self.inner.registry;
        let before = self.inner.tracked.len();
        self.inner.tracked.retain(|id, _| registry.contains(id));
        let pruned = before - self.inner.tracked.len();

        let alerts = lock(&self.inner.alerts);
        tracing::info!(
            tracked = self.inner.tracked.len(),
            pruned,
            alerts = alerts.len(),
            unacknowledged = alerts.unacknowledged(),
            completed = self.inner.completed.load(Ordering::Relaxed),
            failed = self.inner.failed.load(Ordering::Relaxed),
            "monitor health"
        );
        pruned
    }

    fn observe_outcome(&self, execution: &Execution, now: DateTime<Utc>) {
        let first = match self.inner.tracked.get_mut(&execution.execution_id) {
            Some(mut entry) if !entry.outcome_observed => {
                entry.outcome_observed = true;
                true
            }
            _ => false,
        };
        if !first {
            return;
        }

        let id = execution.execution_id.to_string();
        match execution.state {
            ExecutionState::Completed => {
                self.inner.completed.fetch_add(1, Ordering::Relaxed);
                self.record_metric(
                    MetricPoint::new(MetricKind::SuccessRate, 1.0)
                        .with_label("execution_id", &id)
                        .with_label("workflow_id", &execution.workflow_id),
                );
            }
            ExecutionState::Failed => {
                self.inner.failed.fetch_add(1, Ordering::Relaxed);
                self.record_metric(
                    MetricPoint::new(MetricKind::ErrorRate, 1.0)
                        .with_label("execution_id", &id)
                        .with_label("workflow_id", &execution.workflow_id),
                );
                self.emit(checks::failure_alert(execution));
            }
            _ => {}
        }
        self.record_metric(
            MetricPoint::new(
                MetricKind::WorkflowDuration,
                metrics::seconds(execution.elapsed(now)),
            )
            .with_label("execution_id", &id)
            .with_label("workflow_id", &execution.workflow_id),
        );
    }

    fn sample(&self, execution: &Execution, now: DateTime<Utc>) {
        let id = execution.execution_id.to_string();
        let derived = metrics::derive_metrics(execution, now);

        self.record_metric(
            MetricPoint::new(MetricKind::WorkflowDuration, derived.duration_secs)
                .with_label("execution_id", &id)
                .with_label("workflow_id", &execution.workflow_id),
        );
        self.record_metric(
            MetricPoint::new(MetricKind::StepDuration, derived.average_step_duration_secs)
                .with_label("execution_id", &id),
        );
        for (worker, running) in metrics::running_workers(execution) {
            self.record_metric(
                MetricPoint::new(MetricKind::AgentUtilization, running as f64)
                    .with_label("execution_id", &id)
                    .with_label("worker", worker),
            );
        }
    }

    fn tracked_snapshots(&self) -> Vec<Execution> {
        self.tracked_ids()
            .iter()
            .filter_map(|id| self.inner.registry.snapshot(id))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Emission
    // -----------------------------------------------------------------------

    /// Store an alert, run every handler, then notify subscribers.
    pub fn emit(&self, alert: Alert) {
        lock(&self.inner.alerts).push(alert.clone());
        self.inner.total_alerts.fetch_add(1, Ordering::Relaxed);

        let handlers: Vec<Arc<dyn AlertHandler>> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            match std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&alert))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(handler = handler.name(), error = %e, "alert handler failed");
                }
                Err(_) => {
                    tracing::error!(handler = handler.name(), "alert handler panicked");
                }
            }
        }

        if let Some(tx) = lock(&self.inner.alert_tx).as_ref() {
            // No subscribers is fine.
            let _ = tx.send(alert);
        }
    }

    pub fn record_metric(&self, point: MetricPoint) {
        lock(&self.inner.metrics).record(point);
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Alerts filtered by exact severity and workflow, newest first.
    pub fn get_alerts(
        &self,
        severity: Option<AlertSeverity>,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Vec<Alert> {
        lock(&self.inner.alerts).query(severity, workflow_id, limit)
    }

    pub fn acknowledge_alert(&self, alert_id: &Uuid, by: &str) -> Result<Alert, MonitorError> {
        let alert = lock(&self.inner.alerts).acknowledge(alert_id, by)?;
        tracing::info!(alert_id = %alert_id, acknowledged_by = by, "alert acknowledged");
        Ok(alert)
    }

    pub fn get_execution_status(&self, execution_id: &Uuid) -> Option<ExecutionStatus> {
        if !self.inner.tracked.contains_key(execution_id) {
            return None;
        }
        self.inner.registry.status(execution_id)
    }

    pub fn get_execution_metrics(&self, execution_id: &Uuid) -> Option<WorkflowMetrics> {
        if !self.inner.tracked.contains_key(execution_id) {
            return None;
        }
        self.inner
            .registry
            .with(execution_id, |e| metrics::derive_metrics(e, Utc::now()))
    }

    pub fn metric_points(&self, kind: MetricKind) -> Vec<MetricPoint> {
        lock(&self.inner.metrics).points(kind)
    }

    pub fn get_dashboard_data(&self) -> DashboardData {
        let now = Utc::now();
        let snapshots = self.tracked_snapshots();

        let active_executions: Vec<_> = snapshots
            .iter()
            .filter(|e| !e.state.is_terminal())
            .map(|e| dashboard::active_execution(e, now))
            .collect();

        let mut worker_utilization = HashMap::new();
        for execution in &snapshots {
            for (worker, running) in metrics::running_workers(execution) {
                *worker_utilization.entry(worker).or_insert(0) += running;
            }
        }

        let (recent_alerts, unacknowledged_alerts) = {
            let alerts = lock(&self.inner.alerts);
            (
                alerts.query(None, None, dashboard::RECENT_ALERTS),
                alerts.unacknowledged(),
            )
        };

        DashboardData {
            generated_at: now,
            summary: DashboardSummary {
                tracked_executions: snapshots.len(),
                active_executions: active_executions.len(),
                completed_executions: self.inner.completed.load(Ordering::Relaxed),
                failed_executions: self.inner.failed.load(Ordering::Relaxed),
                total_alerts: self.inner.total_alerts.load(Ordering::Relaxed),
                unacknowledged_alerts,
            },
            active_executions,
            recent_alerts,
            rolling: dashboard::rolling_aggregate(&snapshots, now),
            worker_utilization,
        }
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("tracked", &self.inner.tracked.len())
            .field("stopped", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
