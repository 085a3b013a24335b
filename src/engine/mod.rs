//! Execution engine interface.
//!
//! The engine is the external tool that computes and applies plans. The
//! controller only sees the contract below; [`TerraformEngine`] drives the
//! `terraform` CLI through it.

mod process;
mod terraform;

pub use process::{run_with_timeout, ProcessOutput};
pub use terraform::{TerraformEngine, PLAN_FILE, STATE_FILE};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ApplyError, PlanError};

/// Input to a plan invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRequest {
    /// Directory the engine runs in.
    pub workspace: PathBuf,
    /// State from the last successful apply, if any.
    pub prior_state: Option<Vec<u8>>,
    /// Input variables.
    pub vars: BTreeMap<String, String>,
    /// Deadline for the whole invocation.
    pub timeout: Duration,
}

/// Result of a plan invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePlan {
    /// Whether applying the plan would change anything.
    pub has_changes: bool,
    /// Serialized plan, captured verbatim.
    pub plan: Vec<u8>,
    /// Human-readable engine output.
    pub diagnostics: String,
}

/// Input to an apply invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRequest {
    /// Directory the plan was generated in.
    pub workspace: PathBuf,
    /// Stored plan blob.
    pub plan: Vec<u8>,
    /// State the plan was computed against.
    pub prior_state: Option<Vec<u8>>,
    /// Deadline for the whole invocation.
    pub timeout: Duration,
}

/// Result of a successful apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineApply {
    /// New engine state.
    pub state: Vec<u8>,
    /// Raw structured outputs payload.
    pub outputs: Vec<u8>,
    /// Human-readable engine output.
    pub diagnostics: String,
}

/// An infrastructure execution engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Engine: Send + Sync {
    /// Computes a plan for a workspace against its prior state.
    async fn plan(&self, request: PlanRequest) -> Result<EnginePlan, PlanError>;

    /// Applies a stored plan.
    async fn apply(&self, request: ApplyRequest) -> Result<EngineApply, ApplyError>;

    /// Gets the engine name.
    fn name(&self) -> &'static str;
}
