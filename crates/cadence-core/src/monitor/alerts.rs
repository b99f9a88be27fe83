//! Alert storage and delivery handlers.

use std::collections::VecDeque;

use cadence_types::monitor::{Alert, AlertSeverity};
use chrono::Utc;
use uuid::Uuid;

use super::MonitorError;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Synchronous alert sink invoked for every emitted alert.
///
/// Handlers run on the emitting task. A handler that returns an error or
/// panics is logged and skipped; the remaining handlers still run.
pub trait AlertHandler: Send + Sync {
    fn name(&self) -> &str;

    fn handle(&self, alert: &Alert) -> Result<(), MonitorError>;
}

/// Writes alerts through `tracing` at a level matching the severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertHandler;

impl AlertHandler for LogAlertHandler {
    fn name(&self) -> &str {
        "log"
    }

    fn handle(&self, alert: &Alert) -> Result<(), MonitorError> {
        let execution_id = alert.execution_id.map(|id| id.to_string());
        match alert.severity {
            AlertSeverity::Info => tracing::info!(
                alert_id = %alert.id,
                execution_id = execution_id.as_deref(),
                "[ALERT] {}: {}",
                alert.title,
                alert.message
            ),
            AlertSeverity::Warning => tracing::warn!(
                alert_id = %alert.id,
                execution_id = execution_id.as_deref(),
                "[ALERT] {}: {}",
                alert.title,
                alert.message
            ),
            AlertSeverity::Error | AlertSeverity::Critical => tracing::error!(
                alert_id = %alert.id,
                execution_id = execution_id.as_deref(),
                "[ALERT] {}: {}",
                alert.title,
                alert.message
            ),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AlertBuffer
// ---------------------------------------------------------------------------

/// Fixed-capacity ring of alerts, oldest first.
#[derive(Debug)]
pub struct AlertBuffer {
    alerts: VecDeque<Alert>,
    capacity: usize,
}

impl AlertBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            alerts: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an alert, evicting the oldest one when full.
    pub fn push(&mut self, alert: Alert) {
        while self.alerts.len() >= self.capacity {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }

    /// Alerts matching the filters, newest first.
    pub fn query(
        &self,
        severity: Option<AlertSeverity>,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Vec<Alert> {
        self.alerts
            .iter()
            .rev()
            .filter(|a| severity.is_none_or(|s| a.severity == s))
            .filter(|a| workflow_id.is_none_or(|w| a.workflow_id.as_deref() == Some(w)))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn acknowledge(&mut self, id: &Uuid, by: &str) -> Result<Alert, MonitorError> {
        let alert = self
            .alerts
            .iter_mut()
            .find(|a| a.id == *id)
            .ok_or(MonitorError::AlertNotFound(*id))?;
        alert.acknowledged = true;
        alert.acknowledged_by = Some(by.to_string());
        alert.acknowledged_at = Some(Utc::now());
        Ok(alert.clone())
    }

    pub fn unacknowledged(&self) -> usize {
        self.alerts.iter().filter(|a| !a.acknowledged).count()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(n: usize, severity: AlertSeverity, wf: &str) -> Alert {
        Alert::new(severity, format!("alert {n}"), "msg").with_execution(wf, Uuid::now_v7())
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut buffer = AlertBuffer::new(3);
        for n in 0..10 {
            buffer.push(alert(n, AlertSeverity::Info, "wf"));
            assert!(buffer.len() <= 3);
        }
        let titles: Vec<String> = buffer
            .query(None, None, 10)
            .into_iter()
            .map(|a| a.title)
            .collect();
        assert_eq!(titles, vec!["alert 9", "alert 8", "alert 7"]);
    }

    #[test]
    fn test_query_filters_and_limit() {
        let mut buffer = AlertBuffer::new(100);
        buffer.push(alert(0, AlertSeverity::Warning, "a"));
        buffer.push(alert(1, AlertSeverity::Error, "a"));
        buffer.push(alert(2, AlertSeverity::Warning, "b"));
        buffer.push(alert(3, AlertSeverity::Warning, "a"));

        let warnings = buffer.query(Some(AlertSeverity::Warning), None, 10);
        assert_eq!(warnings.len(), 3);
        assert_eq!(warnings[0].title, "alert 3");

        let only_a = buffer.query(Some(AlertSeverity::Warning), Some("a"), 10);
        assert_eq!(only_a.len(), 2);

        assert_eq!(buffer.query(None, None, 1)[0].title, "alert 3");
    }

    #[test]
    fn test_acknowledge_sets_fields() {
        let mut buffer = AlertBuffer::new(10);
        let a = alert(0, AlertSeverity::Error, "wf");
        let id = a.id;
        buffer.push(a);
        assert_eq!(buffer.unacknowledged(), 1);

        let acked = buffer.acknowledge(&id, "oncall").unwrap();
        assert!(acked.acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("oncall"));
        assert!(acked.acknowledged_at.is_some());
        assert_eq!(buffer.unacknowledged(), 0);

        assert!(matches!(
            buffer.acknowledge(&Uuid::now_v7(), "x"),
            Err(MonitorError::AlertNotFound(_))
        ));
    }

    #[test]
    fn test_log_handler_accepts_every_severity() {
        let handler = LogAlertHandler;
        for severity in [
            AlertSeverity::Info,
            AlertSeverity::Warning,
            AlertSeverity::Error,
            AlertSeverity::Critical,
        ] {
            assert!(handler.handle(&alert(0, severity, "wf")).is_ok());
        }
        assert_eq!(handler.name(), "log");
    }
}
