//! Global configuration loader and data directory layout.
//!
//! Reads `config.toml` from the data directory (`~/.cadence/` by default) and
//! deserializes it into [`GlobalConfig`]. Falls back to defaults when the file
//! is missing or malformed.

use std::path::{Path, PathBuf};

use cadence_types::config::GlobalConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV_VAR: &str = "CADENCE_DATA_DIR";

/// Resolve the data directory.
///
/// Priority:
/// 1. `CADENCE_DATA_DIR` environment variable
/// 2. `~/.cadence`
/// 3. `./.cadence`
pub fn resolve_data_dir() -> PathBuf {
    resolve_data_dir_from(std::env::var(DATA_DIR_ENV_VAR).ok())
}

fn resolve_data_dir_from(env_value: Option<String>) -> PathBuf {
    if let Some(dir) = env_value.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".cadence"),
        None => PathBuf::from(".cadence"),
    }
}

/// Directory holding documents produced by workflow runs.
pub fn documents_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("documents")
}

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`GlobalConfig::default()`].
/// - Unreadable or unparsable file: a warning is logged and defaults are used.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => {
            for problem in config_warnings(&config) {
                tracing::warn!("{}: {problem}", config_path.display());
            }
            config
        }
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

/// Settings that parse but make the monitor misbehave.
///
/// These are reported, not rejected: the monitor clamps intervals itself and
/// a rate outside `0.0..=1.0` can never be crossed.
pub fn config_warnings(config: &GlobalConfig) -> Vec<String> {
    let monitor = &config.monitor;
    let mut problems = Vec::new();

    for (name, rate) in [
        ("monitor.max_error_rate", monitor.max_error_rate),
        ("monitor.min_success_rate", monitor.min_success_rate),
    ] {
        if !(0.0..=1.0).contains(&rate) {
            problems.push(format!("{name} = {rate} is outside 0.0..=1.0"));
        }
    }
    for (name, secs) in [
        (
            "monitor.metric_collection_interval_secs",
            monitor.metric_collection_interval_secs,
        ),
        (
            "monitor.health_check_interval_secs",
            monitor.health_check_interval_secs,
        ),
    ] {
        if secs == 0 {
            problems.push(format!("{name} = 0, using 1s"));
        }
    }
    if monitor.max_alerts == 0 {
        problems.push("monitor.max_alerts = 0 keeps no alert history".to_string());
    }
    if monitor.max_metrics_per_type == 0 {
        problems.push("monitor.max_metrics_per_type = 0 keeps no metrics".to_string());
    }
    problems
}
