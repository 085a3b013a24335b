//! CLI module for the Terraform reconciler.
//!
//! This module provides the command-line interface for running the
//! controller and inspecting or approving plans.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, PlanCommands};
pub use output::OutputFormatter;
