//! Cadence CLI entry point.
//!
//! Binary name: `cadence`
//!
//! Parses CLI arguments, initializes tracing and application state, then
//! dispatches to the matching command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cadence_observe::tracing_setup::{
    TracingOptions, init_tracing, shutdown_tracing, verbosity_filter,
};
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingOptions {
        default_filter: verbosity_filter(cli.verbose, cli.quiet).to_string(),
        json: cli.log_json,
        otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        // Neither needs app state
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(shell, &mut cmd, "cadence", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Validate { ref file } => {
            return cli::workflow::handle_validate(file, cli.json, cli.quiet);
        }
        _ => {}
    }

    let state = AppState::init().await?;

    let result = match cli.command {
        Commands::Run {
            file,
            context,
            echo,
        } => {
            cli::workflow::handle_run(&state, &file, context.as_deref(), echo, cli.json, cli.quiet)
                .await
        }
        Commands::Status { execution_id } => {
            cli::execution::handle_status(&state, &execution_id, cli.json).await
        }
        Commands::Show { execution_id } => {
            cli::execution::handle_show(&state, &execution_id, cli.json).await
        }
        Commands::List { workflow, limit } => {
            cli::execution::handle_list(&state, workflow.as_deref(), limit, cli.json).await
        }
        Commands::Completions { .. } | Commands::Validate { .. } => Ok(()),
    };
    state.db_pool.close().await;
    result
}
