//! CLI execution inspection: status, show and list over persisted snapshots.

use anyhow::{Result, anyhow};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use cadence_core::repository::execution::ExecutionStore;
use cadence_types::execution::{Execution, StepExecution};

use super::{execution_state_cell, short_id, step_state_cell};
use crate::state::AppState;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

async fn load_execution(state: &AppState, execution_id: &Uuid) -> Result<Execution> {
    state
        .execution_store()
        .load(execution_id)
        .await
        .map_err(|e| anyhow!("Failed to load execution: {e}"))?
        .ok_or_else(|| anyhow!("Execution '{execution_id}' not found"))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub async fn handle_status(state: &AppState, execution_id: &Uuid, json: bool) -> Result<()> {
    let execution = load_execution(state, execution_id).await?;
    let status = execution.status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style("Execution").bold(),
        style(status.execution_id).cyan()
    );
    println!("  Workflow: {}", style(&status.workflow_id).cyan());
    println!("  State: {}", status.state);
    println!(
        "  Progress: {}/{} steps",
        status.steps_completed, status.steps_total
    );
    println!("  Started: {}", status.started_at.format(TIME_FORMAT));
    if let Some(completed) = status.completed_at {
        println!("  Completed: {}", completed.format(TIME_FORMAT));
    }
    if let Some(ref err) = status.error {
        println!("  Error: {}", style(err).red());
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

pub async fn handle_show(state: &AppState, execution_id: &Uuid, json: bool) -> Result<()> {
    let execution = load_execution(state, execution_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {} ({})",
        style("Execution").bold(),
        style(execution.execution_id).cyan(),
        execution.state
    );
    println!("  Workflow: {}", style(&execution.workflow_id).cyan());
    if let Some(ref err) = execution.error {
        println!("  Error: {}", style(err).red());
    }
    println!();
    println!("{}", step_table(&execution));

    if !execution.documents.is_empty() {
        let mut docs: Vec<_> = execution.documents.iter().collect();
        docs.sort();
        println!();
        println!("  {}", style("Documents").bold());
        for (name, handle) in docs {
            println!("    {name} {}", style(handle).dim());
        }
    }
    println!();

    Ok(())
}

/// Steps in the order they ran; never-started steps last, by id.
pub(crate) fn ordered_steps(execution: &Execution) -> Vec<&StepExecution> {
    let mut steps: Vec<&StepExecution> = execution.step_executions.values().collect();
    steps.sort_by(|a, b| match (a.started_at, b.started_at) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.step_id.cmp(&b.step_id)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.step_id.cmp(&b.step_id),
    });
    steps
}

pub(crate) fn step_table(execution: &Execution) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("State"),
            Cell::new("Worker"),
            Cell::new("Duration"),
            Cell::new("Documents"),
            Cell::new("Error"),
        ]);

    for step in ordered_steps(execution) {
        let duration = match (step.started_at, step.completed_at) {
            (Some(start), Some(end)) => {
                format!("{:.1}s", (end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => "-".to_string(),
        };
        table.add_row(vec![
            Cell::new(&step.step_id),
            step_state_cell(step.state),
            Cell::new(step.worker.as_deref().unwrap_or("-")),
            Cell::new(duration),
            Cell::new(step.documents_created.join(", ")),
            Cell::new(step.error.as_deref().unwrap_or("")),
        ]);
    }
    table
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn handle_list(
    state: &AppState,
    workflow_id: Option<&str>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let summaries = state
        .execution_store()
        .list(workflow_id, limit)
        .await
        .map_err(|e| anyhow!("Failed to list executions: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!();
        println!("  No executions recorded.");
        println!(
            "  Start one with: {}",
            style("cadence run <workflow.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Execution").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("State"),
            Cell::new("Started"),
            Cell::new("Completed"),
        ]);

    for s in &summaries {
        let completed = s
            .completed_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(short_id(&s.execution_id)),
            Cell::new(&s.workflow_id),
            execution_state_cell(s.state),
            Cell::new(s.started_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(completed),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use cadence_types::execution::StepState;
    use chrono::{Duration, Utc};

    use super::*;

    #[test]
    fn ordered_steps_puts_started_first() {
        let mut exec = Execution::new("wf", Uuid::now_v7(), HashMap::new());
        let now = Utc::now();
        for (id, offset) in [("late", Some(5)), ("early", Some(1)), ("zeta", None), ("alpha", None)]
        {
            let mut step = StepExecution::pending(id);
            if let Some(secs) = offset {
                step.state = StepState::Completed;
                step.started_at = Some(now + Duration::seconds(secs));
            }
            exec.step_executions.insert(id.to_string(), step);
        }

        let order: Vec<&str> = ordered_steps(&exec)
            .iter()
            .map(|s| s.step_id.as_str())
            .collect();
        assert_eq!(order, vec!["early", "late", "alpha", "zeta"]);
    }

    #[test]
    fn step_table_has_row_per_step() {
        let mut exec = Execution::new("wf", Uuid::now_v7(), HashMap::new());
        let mut step = StepExecution::pending("brief");
        step.state = StepState::Failed;
        step.error = Some("worker 'analyst' failed".into());
        exec.step_executions.insert("brief".into(), step);
        exec.step_executions
            .insert("review".into(), StepExecution::pending("review"));

        let rendered = step_table(&exec).to_string();
        assert!(rendered.contains("brief"));
        assert!(rendered.contains("review"));
        assert!(rendered.contains("analyst"));
    }
}
