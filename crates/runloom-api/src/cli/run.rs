//! CLI run inspection subcommands.

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use runloom_core::repository::run::RunRepository;
use runloom_types::run::{RunStatus, RunStepStatus};

use crate::state::AppState;

/// Run subcommands.
#[derive(Subcommand)]
pub enum RunCommand {
    /// Show a run and the state of each of its steps.
    Show {
        /// Run UUID.
        run_id: String,

        /// Tenant that owns the run.
        #[arg(long)]
        tenant: String,
    },
}

/// Handle a run subcommand.
pub async fn handle_run_command(cmd: RunCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        RunCommand::Show { run_id, tenant } => {
            handle_show(&run_id, &tenant, &state.run_repository(), json).await
        }
    }
}

fn status_cell(status: RunStepStatus) -> Cell {
    let color = match status {
        RunStepStatus::Completed => Color::Green,
        RunStepStatus::Failed => Color::Red,
        RunStepStatus::Running => Color::Yellow,
        RunStepStatus::Pending | RunStepStatus::Skipped => Color::DarkGrey,
    };
    Cell::new(status).fg(color)
}

async fn handle_show(
    run_id: &str,
    tenant: &str,
    repo: &impl RunRepository,
    json: bool,
) -> Result<()> {
    let run_id: Uuid = run_id
        .parse()
        .with_context(|| format!("Invalid run ID '{run_id}'"))?;

    let run = repo
        .get_run(&run_id, tenant)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load run: {e}"))?
        .with_context(|| format!("Run {run_id} not found for tenant '{tenant}'"))?;
    let steps = repo
        .list_run_steps(&run_id, tenant)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load run steps: {e}"))?;

    if json {
        let out = serde_json::json!({
            "run": run,
            "steps": steps,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let status = match run.status {
        RunStatus::Completed => style(run.status).green(),
        RunStatus::Failed | RunStatus::Cancelled => style(run.status).red(),
        RunStatus::Queued | RunStatus::Running => style(run.status).yellow(),
    };

    println!();
    println!(
        "  Run {} of '{}' v{}",
        style(run.id).cyan(),
        run.workflow_name,
        run.workflow_version
    );
    println!("  Status: {status}");
    println!("  Trigger: {}", run.trigger_type);
    if let Some(base) = run.base_run_id {
        println!("  Base run: {base}");
    }
    println!("  Created: {}", run.created_at.to_rfc3339());
    if let Some(at) = run.completed_at {
        println!("  Finished: {}", at.to_rfc3339());
    }
    if let Some(error) = &run.error {
        println!("  Error: {}", style(error).red());
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Skill"),
            Cell::new("Status"),
            Cell::new("Attempt"),
            Cell::new("Cache"),
            Cell::new("Duration"),
            Cell::new("Error"),
        ]);

    for step in &steps {
        table.add_row(vec![
            Cell::new(&step.step_id),
            Cell::new(&step.skill_id),
            status_cell(step.status),
            Cell::new(step.attempt),
            Cell::new(if step.cache_hit { "hit" } else { "" }),
            Cell::new(
                step.duration_ms
                    .map(|ms| format!("{ms}ms"))
                    .unwrap_or_default(),
            ),
            Cell::new(
                step.error
                    .as_ref()
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .unwrap_or_default(),
            ),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}
