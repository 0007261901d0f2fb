//! Runloom CLI entry point.
//!
//! Binary name: `runloom`
//!
//! Parses CLI arguments, sets up tracing, then dispatches to the command
//! handlers. Only commands that touch stored runs or cache entries open the
//! database.

mod cli;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    runloom_observe::tracing_setup::init_tracing(cli.otel, cli.verbose)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = match cli.command {
        Commands::Workflow { action } => {
            cli::workflow::handle_workflow_command(action, cli.json).await
        }
        Commands::Run { action } => {
            let state = AppState::init().await?;
            cli::run::handle_run_command(action, &state, cli.json).await
        }
        Commands::Cache { action } => {
            let state = AppState::init().await?;
            cli::cache::handle_cache_command(action, &state, cli.json).await
        }
    };

    runloom_observe::tracing_setup::shutdown_tracing();
    result
}
