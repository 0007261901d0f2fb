//! CLI command definitions and dispatch for the `runloom` binary.
//!
//! Uses clap derive macros. Commands follow a noun-verb pattern
//! (e.g., `runloom workflow plan`, `runloom cache invalidate`).

pub mod cache;
pub mod run;
pub mod workflow;

use clap::{Parser, Subcommand};

/// Plan, inspect and maintain workflow runs.
#[derive(Parser)]
#[command(name = "runloom", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for verbose, -vv for debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "RUNLOOM_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate, plan and list workflow definitions.
    Workflow {
        #[command(subcommand)]
        action: workflow::WorkflowCommand,
    },

    /// Inspect stored runs.
    Run {
        #[command(subcommand)]
        action: run::RunCommand,
    },

    /// Manage the step cache.
    Cache {
        #[command(subcommand)]
        action: cache::CacheCommand,
    },
}
