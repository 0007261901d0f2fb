//! CLI workflow subcommands.
//!
//! Provides validate, plan, impact and list operations over workflow
//! definition files. None of them touch the database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use runloom_core::skill::StaticSkillCatalog;
use runloom_core::workflow::dag::{downstream_closure, entry_steps, execution_waves, topological_sort};
use runloom_core::workflow::definition::{WorkflowCompiler, WorkflowError, load_workflow_file};
use runloom_core::workflow::registry::WorkflowRegistry;
use runloom_core::workflow::spec::WorkflowSpec;
use runloom_infra::config::{data_dir, load_engine_config, workflows_dir};
use runloom_infra::workflow::loader::load_workflows;

/// Workflow subcommands.
#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Parse, validate and compile a workflow file.
    Validate {
        /// Path to the workflow YAML or JSON file.
        file: PathBuf,

        /// Known skill id; when given, every step's skill must be listed.
        #[arg(long = "skill")]
        skills: Vec<String>,
    },

    /// Show the execution order and concurrent waves of a workflow.
    Plan {
        /// Path to the workflow file.
        file: PathBuf,
    },

    /// List the steps that must re-run when the given steps change.
    Impact {
        /// Path to the workflow file.
        file: PathBuf,

        /// Changed step id (repeatable).
        #[arg(long, required = true)]
        changed: Vec<String>,
    },

    /// List workflows found in a directory.
    List {
        /// Directory to scan (defaults to the configured workflows dir).
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

/// Handle a workflow subcommand.
pub async fn handle_workflow_command(cmd: WorkflowCommand, json: bool) -> Result<()> {
    match cmd {
        WorkflowCommand::Validate { file, skills } => handle_validate(&file, skills, json),
        WorkflowCommand::Plan { file } => handle_plan(&file, json),
        WorkflowCommand::Impact { file, changed } => handle_impact(&file, &changed, json),
        WorkflowCommand::List { dir } => handle_list(dir, json).await,
    }
}

fn compile_file(file: &Path, compiler: &WorkflowCompiler) -> Result<WorkflowSpec> {
    let doc = load_workflow_file(file).map_err(|e| match e {
        WorkflowError::Parse(msg) => anyhow::anyhow!("Failed to parse workflow: {msg}"),
        WorkflowError::Validation(msg) => anyhow::anyhow!("Workflow validation failed: {msg}"),
        other => anyhow::anyhow!("Failed to load workflow: {other}"),
    })?;
    Ok(compiler.compile(&doc)?)
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

fn handle_validate(file: &Path, skills: Vec<String>, json: bool) -> Result<()> {
    let mut compiler = WorkflowCompiler::default();
    if !skills.is_empty() {
        compiler = compiler.with_skill_catalog(Arc::new(StaticSkillCatalog::new(skills)));
    }
    let spec = compile_file(file, &compiler)?;
    let roots: Vec<&str> = entry_steps(&spec.steps)
        .iter()
        .map(|s| s.step_id.as_str())
        .collect();

    if json {
        let out = serde_json::json!({
            "valid": true,
            "workflow": spec.workflow_name,
            "version": spec.version.to_string(),
            "steps": spec.steps.len(),
            "entry_steps": roots,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' v{} is valid",
        style("*").green().bold(),
        style(&spec.workflow_name).cyan(),
        spec.version
    );
    println!("  Steps: {}", spec.steps.len());
    println!("  Entry steps: {}", roots.join(", "));
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

fn handle_plan(file: &Path, json: bool) -> Result<()> {
    let spec = compile_file(file, &WorkflowCompiler::default())?;
    let order = topological_sort(&spec.steps)?;
    let waves = execution_waves(&spec.steps)?;

    if json {
        let out = serde_json::json!({
            "workflow": spec.workflow_name,
            "version": spec.version.to_string(),
            "order": order.iter().map(|s| s.step_id.as_str()).collect::<Vec<_>>(),
            "waves": waves
                .iter()
                .map(|w| w.iter().map(|s| s.step_id.as_str()).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Skill"),
            Cell::new("Depends on"),
            Cell::new("Cache"),
            Cell::new("Attempts"),
        ]);

    for (i, step) in order.iter().enumerate() {
        let cache = if step.cache_policy.enabled {
            step.cache_policy.scope.to_string()
        } else {
            "off".to_string()
        };
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(&step.step_id),
            Cell::new(&step.skill_id),
            Cell::new(step.depends_on.join(", ")),
            Cell::new(cache),
            Cell::new(step.retry_policy.max_attempts),
        ]);
    }

    println!();
    println!(
        "  Plan for '{}' v{}",
        style(&spec.workflow_name).cyan(),
        spec.version
    );
    println!("{table}");
    println!();
    for (i, wave) in waves.iter().enumerate() {
        let ids: Vec<&str> = wave.iter().map(|s| s.step_id.as_str()).collect();
        println!("  Wave {}: {}", i, ids.join(", "));
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Impact
// ---------------------------------------------------------------------------

fn handle_impact(file: &Path, changed: &[String], json: bool) -> Result<()> {
    let spec = compile_file(file, &WorkflowCompiler::default())?;
    if let Some(unknown) = changed.iter().find(|id| spec.step(id).is_none()) {
        bail!(
            "Step '{unknown}' not found in workflow '{}'",
            spec.workflow_name
        );
    }

    let affected = downstream_closure(&spec.steps, changed.iter().map(String::as_str));
    let rerun: Vec<&str> = topological_sort(&spec.steps)?
        .into_iter()
        .map(|s| s.step_id.as_str())
        .filter(|id| affected.contains(*id))
        .collect();

    if json {
        let out = serde_json::json!({
            "workflow": spec.workflow_name,
            "changed": changed,
            "rerun": rerun,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} of {} steps must re-run:",
        style(rerun.len()).yellow().bold(),
        spec.steps.len()
    );
    for id in &rerun {
        let marker = if changed.iter().any(|c| c == id) {
            style("changed").dim()
        } else {
            style("downstream").dim()
        };
        println!("    {} {id} ({marker})", style("-").yellow());
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

async fn handle_list(dir: Option<PathBuf>, json: bool) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => {
            let data_dir = data_dir();
            let config = load_engine_config(&data_dir).await;
            workflows_dir(&config, &data_dir)
        }
    };

    let registry = WorkflowRegistry::new();
    let report = load_workflows(&dir, &WorkflowCompiler::default(), &registry)?;

    let rows: Vec<(String, Vec<String>, usize)> = registry
        .list_workflows()
        .into_iter()
        .filter_map(|name| {
            let latest = registry.get_workflow(&name, None).ok().flatten()?;
            let versions = registry
                .get_workflow_versions(&name)
                .iter()
                .map(ToString::to_string)
                .collect();
            Some((name, versions, latest.steps.len()))
        })
        .collect();

    if json {
        let out = serde_json::json!({
            "dir": dir.display().to_string(),
            "workflows": rows
                .iter()
                .map(|(name, versions, steps)| serde_json::json!({
                    "name": name,
                    "versions": versions,
                    "steps": steps,
                }))
                .collect::<Vec<_>>(),
            "rejected": report
                .rejected
                .iter()
                .map(|(path, error)| serde_json::json!({
                    "path": path.display().to_string(),
                    "error": error,
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!();
        println!("  No workflows found in {}.", dir.display());
        println!();
    } else {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Name").fg(Color::Cyan),
                Cell::new("Versions"),
                Cell::new("Steps (latest)"),
            ]);
        for (name, versions, steps) in &rows {
            table.add_row(vec![
                Cell::new(name),
                Cell::new(versions.join(", ")),
                Cell::new(steps),
            ]);
        }
        println!("{table}");
    }

    for (path, error) in &report.rejected {
        println!(
            "  {} {}: {}",
            style("!").red().bold(),
            path.display(),
            style(error).dim()
        );
    }
    Ok(())
}
