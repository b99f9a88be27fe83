//! CLI workflow subcommands: validate a definition file and run it.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use console::style;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use cadence_core::monitor::Monitor;
use cadence_core::monitor::dashboard::RECENT_ALERTS;
use cadence_core::workflow::definition::{DefinitionError, load_definition_file};
use cadence_infra::worker::command::{CommandWorkerFactory, Fallback};
use cadence_types::event::WorkflowEvent;
use cadence_types::execution::ExecutionState;
use cadence_types::monitor::{Alert, AlertSeverity};
use cadence_types::workflow::WorkflowDefinition;

use super::execution::step_table;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn handle_validate(file: &Path, json: bool, quiet: bool) -> Result<()> {
    let definition = match load_definition_file(file) {
        Ok(def) => def,
        Err(DefinitionError::Invalid(violations)) => {
            if json {
                let out = serde_json::json!({
                    "file": file.display().to_string(),
                    "valid": false,
                    "violations": violations,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else if !quiet {
                println!();
                println!(
                    "  {} {} is not a valid workflow",
                    style("x").red().bold(),
                    style(file.display()).cyan()
                );
                for v in &violations {
                    println!("    - {v}");
                }
                println!();
            }
            bail!("{} violation(s) in {}", violations.len(), file.display());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to load {}", file.display()));
        }
    };

    if json {
        let out = serde_json::json!({
            "file": file.display().to_string(),
            "valid": true,
            "id": definition.id,
            "name": definition.name,
            "version": definition.version,
            "steps": definition.step_count(),
            "agents": sorted_roles(&definition),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !quiet {
        println!();
        println!(
            "  {} Workflow '{}' is valid",
            style("*").green().bold(),
            style(&definition.name).cyan()
        );
        println!("  ID: {}", definition.id);
        if !definition.version.is_empty() {
            println!("  Version: {}", definition.version);
        }
        println!(
            "  Steps: {} ({} top-level)",
            definition.step_count(),
            definition.steps.len()
        );
        let roles = sorted_roles(&definition);
        if !roles.is_empty() {
            println!("  Agents: {}", roles.join(", "));
        }
        println!();
    }

    Ok(())
}

fn sorted_roles(definition: &WorkflowDefinition) -> Vec<&str> {
    let mut roles: Vec<&str> = definition.agents.keys().map(String::as_str).collect();
    roles.sort_unstable();
    roles
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn handle_run(
    state: &AppState,
    file: &Path,
    context: Option<&str>,
    echo: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let definition = load_definition_file(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))?;
    let initial_context = parse_context(context)?;

    let mut factory = CommandWorkerFactory::from_definition(&definition);
    if echo {
        factory = factory.with_fallback(Fallback::Echo);
    }
    let engine = state.engine(factory);

    let monitor = Monitor::new(engine.registry().clone(), state.config.monitor.clone());
    monitor.start();
    let execution_id = Uuid::now_v7();
    monitor.track(execution_id);

    let progress = (!json && !quiet).then(|| {
        println!();
        println!(
            "  {} Running workflow '{}'",
            style("*").green().bold(),
            style(&definition.name).cyan()
        );
        println!("  Execution: {execution_id}");
        println!();
        spawn_progress(engine.event_bus().subscribe(), execution_id)
    });

    let result = engine
        .execute_with_id(&definition, execution_id, initial_context)
        .await;

    if let Some(handle) = progress {
        if result.is_ok() {
            let _ = handle.await;
        } else {
            handle.abort();
        }
    }

    monitor.run_checks();
    let alerts = monitor.get_alerts(None, Some(&definition.id), RECENT_ALERTS);
    let metrics = monitor.get_execution_metrics(&execution_id);
    monitor.stop().await;

    let execution = result.context("Workflow execution aborted")?;

    if json {
        let out = serde_json::json!({
            "execution": execution,
            "metrics": metrics,
            "alerts": alerts,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !quiet {
        println!();
        println!("{}", step_table(&execution));
        print_alerts(&alerts);
        println!();
        let elapsed = execution
            .completed_at
            .map(|done| (done - execution.started_at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or_default();
        match execution.state {
            ExecutionState::Completed => println!(
                "  {} Completed in {elapsed:.1}s",
                style("*").green().bold()
            ),
            state => println!(
                "  {} {} after {elapsed:.1}s",
                style("x").red().bold(),
                style(state).red()
            ),
        }
        println!(
            "  Inspect later: {}",
            style(format!("cadence show {execution_id}")).dim()
        );
        println!();
    }

    if execution.state == ExecutionState::Failed {
        bail!(
            "Execution {execution_id} failed: {}",
            execution.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Parse `--context` into the execution's initial context map.
fn parse_context(raw: Option<&str>) -> Result<HashMap<String, Value>> {
    let Some(raw) = raw else {
        return Ok(HashMap::new());
    };
    match serde_json::from_str::<Value>(raw).context("Invalid JSON in --context")? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => bail!("--context must be a JSON object, got {other}"),
    }
}

/// Print step transitions of one execution until it finishes.
fn spawn_progress(
    mut events: broadcast::Receiver<WorkflowEvent>,
    execution_id: Uuid,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "progress display lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if event.execution_id() != execution_id {
                continue;
            }
            match event {
                WorkflowEvent::StepStarted {
                    step_id, step_type, ..
                } => {
                    println!("  {} {step_id} ({step_type})", style(">").blue());
                }
                WorkflowEvent::StepCompleted {
                    step_id,
                    duration_ms,
                    ..
                } => {
                    println!(
                        "  {} {step_id} {}",
                        style("*").green(),
                        style(format!("{duration_ms}ms")).dim()
                    );
                }
                WorkflowEvent::StepFailed { step_id, error, .. } => {
                    println!("  {} {step_id}: {}", style("x").red(), style(error).red());
                }
                WorkflowEvent::StepSkipped {
                    step_id, reason, ..
                } => {
                    println!(
                        "  {} {step_id} skipped: {}",
                        style("-").yellow(),
                        style(reason).dim()
                    );
                }
                WorkflowEvent::ExecutionCompleted { .. } | WorkflowEvent::ExecutionFailed { .. } => {
                    break;
                }
                WorkflowEvent::ExecutionStarted { .. } => {}
            }
        }
    })
}

fn print_alerts(alerts: &[Alert]) {
    if alerts.is_empty() {
        return;
    }
    println!();
    println!("  {}", style("Alerts").bold());
    for alert in alerts {
        let severity = match alert.severity {
            AlertSeverity::Info => style(alert.severity).dim(),
            AlertSeverity::Warning => style(alert.severity).yellow(),
            AlertSeverity::Error | AlertSeverity::Critical => style(alert.severity).red(),
        };
        println!("    [{severity}] {}: {}", alert.title, alert.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_context_accepts_objects_only() {
        assert!(parse_context(None).unwrap().is_empty());

        let ctx = parse_context(Some(r#"{"project":"billing","retries":2}"#)).unwrap();
        assert_eq!(ctx["project"], json!("billing"));
        assert_eq!(ctx["retries"], json!(2));

        assert!(parse_context(Some("[1,2]")).is_err());
        assert!(parse_context(Some("{not json")).is_err());
    }

    #[test]
    fn validate_reports_violations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "id: broken\nname: Broken\nsteps: []\n").unwrap();

        let err = handle_validate(&path, false, true).unwrap_err();
        assert!(err.to_string().contains("violation"), "{err}");
    }

    #[test]
    fn validate_accepts_sequence_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.yaml");
        std::fs::write(
            &path,
            "id: flow\nname: Flow\nsequence:\n  - agent: analyst\n    creates: brief.md\n",
        )
        .unwrap();

        handle_validate(&path, false, true).unwrap();
    }

    #[test]
    fn validate_missing_file_is_an_error() {
        let err = handle_validate(Path::new("/nonexistent/flow.yaml"), false, true).unwrap_err();
        assert!(err.to_string().contains("Failed to load"));
    }
}
