//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tf-reconciler - Reconcile Terraform resources against versioned sources.
#[derive(Parser, Debug)]
#[command(name = "tf-reconciler")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the settings file.
    #[arg(short, long, global = true, env = "TF_RECONCILER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text", env = "TF_RECONCILER_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller until interrupted.
    Run {
        /// Number of workers, overriding the settings file.
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Run one reconciliation pass for a resource.
    Reconcile {
        /// Resource as <namespace>/<name>.
        resource: String,
    },

    /// Show resource status.
    Status {
        /// Resource as <namespace>/<name> (all resources if omitted).
        resource: Option<String>,
    },

    /// Inspect stored plans.
    Plan {
        /// Plan subcommand.
        #[command(subcommand)]
        command: PlanCommands,
    },

    /// Approve a plan by setting `approvePlan` on the resource.
    Approve {
        /// Resource as <namespace>/<name>.
        resource: String,

        /// Fingerprint to approve (the pending plan if omitted).
        #[arg(long)]
        plan: Option<String>,
    },

    /// Validate the settings and every resource manifest.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },
}

/// Plan inspection subcommands.
#[derive(Subcommand, Debug)]
pub enum PlanCommands {
    /// List stored plans of a resource with their approval states.
    Show {
        /// Resource as <namespace>/<name>.
        resource: String,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
