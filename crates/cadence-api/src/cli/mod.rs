//! CLI command definitions for the `cadence` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod execution;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use comfy_table::{Cell, Color};
use uuid::Uuid;

use cadence_types::execution::{ExecutionState, StepState};

/// Run multi-agent workflows and inspect their executions.
#[derive(Parser)]
#[command(name = "cadence", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and validate a workflow definition file.
    Validate {
        /// Path to the workflow YAML or JSON file.
        file: PathBuf,
    },

    /// Execute a workflow definition.
    Run {
        /// Path to the workflow YAML or JSON file.
        file: PathBuf,

        /// Initial context as a JSON object.
        #[arg(long)]
        context: Option<String>,

        /// Echo payloads for roles without a configured command.
        #[arg(long)]
        echo: bool,
    },

    /// Show the summary of a persisted execution.
    Status {
        /// Execution UUID.
        execution_id: Uuid,
    },

    /// Show a persisted execution with per-step detail.
    Show {
        /// Execution UUID.
        execution_id: Uuid,
    },

    /// List persisted executions, newest first.
    #[command(alias = "ls")]
    List {
        /// Only executions of this workflow id.
        #[arg(long)]
        workflow: Option<String>,

        /// Maximum number of executions to display.
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

// ---------------------------------------------------------------------------
// Shared formatting
// ---------------------------------------------------------------------------

pub(crate) fn execution_state_cell(state: ExecutionState) -> Cell {
    let cell = Cell::new(state.as_str());
    match state {
        ExecutionState::Pending => cell.fg(Color::Yellow),
        ExecutionState::Running => cell.fg(Color::Blue),
        ExecutionState::Paused => cell.fg(Color::Magenta),
        ExecutionState::Completed => cell.fg(Color::Green),
        ExecutionState::Failed => cell.fg(Color::Red),
        ExecutionState::Cancelled => cell.fg(Color::DarkYellow),
    }
}

pub(crate) fn step_state_cell(state: StepState) -> Cell {
    let cell = Cell::new(state.as_str());
    match state {
        StepState::Pending => cell.fg(Color::Yellow),
        StepState::Running => cell.fg(Color::Blue),
        StepState::Completed => cell.fg(Color::Green),
        StepState::Failed => cell.fg(Color::Red),
        StepState::Skipped | StepState::Cancelled => cell.fg(Color::DarkYellow),
    }
}

pub(crate) fn short_id(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}
