//! Global configuration types for Cadence.
//!
//! `GlobalConfig` represents the top-level `config.toml` with an `[engine]`
//! section and a `[monitor]` section. Every field has a default, so an empty
//! or partial file is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.cadence/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Execution engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds a `wait` step sleeps when it declares no timeout.
    #[serde(default = "default_wait_secs")]
    pub default_wait_secs: u64,
    /// Persist a snapshot after every top-level step.
    #[serde(default = "default_true")]
    pub checkpoint_each_step: bool,
}

fn default_wait_secs() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_wait_secs: default_wait_secs(),
            checkpoint_each_step: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Monitor thresholds, intervals and retention limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_max_step_duration_secs")]
    pub max_step_duration_secs: u64,
    #[serde(default = "default_max_workflow_duration_secs")]
    pub max_workflow_duration_secs: u64,
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    #[serde(default = "default_max_error_rate")]
    pub max_error_rate: f64,
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,
    #[serde(default = "default_metric_collection_interval_secs")]
    pub metric_collection_interval_secs: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,
    #[serde(default = "default_max_metrics_per_type")]
    pub max_metrics_per_type: usize,
    #[serde(default = "default_metric_retention_hours")]
    pub metric_retention_hours: u64,
}

fn default_max_step_duration_secs() -> u64 {
    300
}

fn default_max_workflow_duration_secs() -> u64 {
    3600
}

fn default_max_retry_count() -> u32 {
    3
}

fn default_max_error_rate() -> f64 {
    0.1
}

fn default_min_success_rate() -> f64 {
    0.9
}

fn default_metric_collection_interval_secs() -> u64 {
    10
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_max_alerts() -> usize {
    1000
}

fn default_max_metrics_per_type() -> usize {
    10_000
}

fn default_metric_retention_hours() -> u64 {
    24
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_step_duration_secs: default_max_step_duration_secs(),
            max_workflow_duration_secs: default_max_workflow_duration_secs(),
            max_retry_count: default_max_retry_count(),
            max_error_rate: default_max_error_rate(),
            min_success_rate: default_min_success_rate(),
            metric_collection_interval_secs: default_metric_collection_interval_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            max_alerts: default_max_alerts(),
            max_metrics_per_type: default_max_metrics_per_type(),
            metric_retention_hours: default_metric_retention_hours(),
        }
    }
}

impl MonitorConfig {
    pub fn metric_collection_interval(&self) -> Duration {
        Duration::from_secs(self.metric_collection_interval_secs.max(1))
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    /// Retention window, saturating at `TimeDelta::MAX` for huge overrides.
    pub fn metric_retention(&self) -> chrono::TimeDelta {
        i64::try_from(self.metric_retention_hours)
            .ok()
            .and_then(chrono::TimeDelta::try_hours)
            .unwrap_or(chrono::TimeDelta::MAX)
    }
}
