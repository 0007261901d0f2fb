//! CLI step cache subcommands.

use anyhow::Result;
use clap::Subcommand;
use console::style;

use runloom_core::repository::cache::StepCacheRepository;

use crate::state::AppState;

/// Cache subcommands.
#[derive(Subcommand)]
pub enum CacheCommand {
    /// Delete cached step results for a workflow, or one of its steps.
    Invalidate {
        /// Workflow name.
        #[arg(long)]
        workflow: String,

        /// Limit invalidation to this step.
        #[arg(long)]
        step: Option<String>,
    },
}

/// Handle a cache subcommand.
pub async fn handle_cache_command(cmd: CacheCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        CacheCommand::Invalidate { workflow, step } => {
            handle_invalidate(&workflow, step.as_deref(), &state.step_cache(), json).await
        }
    }
}

async fn handle_invalidate(
    workflow: &str,
    step: Option<&str>,
    cache: &impl StepCacheRepository,
    json: bool,
) -> Result<()> {
    let removed = match step {
        Some(step_id) => cache.invalidate_step(workflow, step_id).await,
        None => cache.invalidate_workflow(workflow).await,
    }
    .map_err(|e| anyhow::anyhow!("Failed to invalidate cache: {e}"))?;

    if json {
        let out = serde_json::json!({
            "workflow": workflow,
            "step": step,
            "removed": removed,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let target = match step {
        Some(step_id) => format!("step '{step_id}' of '{workflow}'"),
        None => format!("workflow '{workflow}'"),
    };
    println!();
    println!(
        "  {} Removed {} cache entr{} for {}",
        style("*").green().bold(),
        removed,
        if removed == 1 { "y" } else { "ies" },
        target
    );
    println!();
    Ok(())
}
