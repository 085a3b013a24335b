//! Terraform CLI engine.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::error::{ApplyError, PlanError};

use super::process::{run_with_timeout, ProcessOutput};
use super::{ApplyRequest, Engine, EngineApply, EnginePlan, PlanRequest};

/// File the plan is written to inside the workspace.
pub const PLAN_FILE: &str = "tfplan";

/// File the prior state is placed in inside the workspace.
pub const STATE_FILE: &str = "terraform.tfstate";

/// `-detailed-exitcode` status for a plan with changes.
const EXIT_HAS_CHANGES: i32 = 2;

/// Failure of one CLI step, before it is mapped to a stage error.
enum StepFailure {
    Launch(String),
    TimedOut,
    Failed(Option<i32>, String),
}

/// Engine driving the `terraform` binary.
#[derive(Debug, Clone)]
pub struct TerraformEngine {
    binary: String,
    env: BTreeMap<String, String>,
    output_limit: usize,
}

impl TerraformEngine {
    /// Creates an engine running `binary`.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            env: BTreeMap::new(),
            output_limit: 4 * 1024 * 1024,
        }
    }

    /// Creates an engine from settings.
    #[must_use]
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(&settings.binary)
            .with_env(settings.env.clone())
            .with_output_limit(settings.output_limit_bytes)
    }

    /// Sets extra environment variables for every invocation.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Sets the per-stream output capture limit.
    #[must_use]
    pub const fn with_output_limit(mut self, limit: usize) -> Self {
        self.output_limit = limit;
        self
    }

    async fn run(
        &self,
        dir: &Path,
        args: &[String],
        deadline: Instant,
    ) -> Result<ProcessOutput, StepFailure> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(StepFailure::TimedOut);
        }

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .envs(&self.env);

        debug!("Running {} {} in {}", self.binary, args.join(" "), dir.display());
        let output = run_with_timeout(cmd, remaining, self.output_limit)
            .await
            .map_err(|e| StepFailure::Launch(format!("{}: {e}", self.binary)))?;

        if output.timed_out {
            return Err(StepFailure::TimedOut);
        }
        Ok(output)
    }

    async fn run_checked(
        &self,
        dir: &Path,
        args: &[String],
        deadline: Instant,
    ) -> Result<ProcessOutput, StepFailure> {
        let output = self.run(dir, args, deadline).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(StepFailure::Failed(output.exit_code, output.diagnostics()))
        }
    }

    async fn init(&self, dir: &Path, deadline: Instant) -> Result<(), StepFailure> {
        self.run_checked(dir, &args(&["init", "-input=false", "-no-color"]), deadline)
            .await
            .map(|_| ())
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Places the prior state in the workspace, or clears a leftover one.
async fn place_state(dir: &Path, prior: Option<&[u8]>) -> std::io::Result<()> {
    let path = dir.join(STATE_FILE);
    match prior {
        Some(state) => fs::write(&path, state).await,
        None => match fs::remove_file(&path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        },
    }
}

fn plan_error(failure: StepFailure, timeout: Duration) -> PlanError {
    match failure {
        StepFailure::Launch(message) => PlanError::Launch { message },
        StepFailure::TimedOut => PlanError::TimedOut {
            timeout_secs: timeout.as_secs(),
        },
        StepFailure::Failed(exit_code, diagnostics) => PlanError::Engine {
            exit_code,
            diagnostics,
        },
    }
}

fn apply_error(failure: StepFailure, timeout: Duration) -> ApplyError {
    match failure {
        StepFailure::Launch(message) => ApplyError::Launch { message },
        StepFailure::TimedOut => ApplyError::TimedOut {
            timeout_secs: timeout.as_secs(),
        },
        StepFailure::Failed(exit_code, diagnostics) => ApplyError::Engine {
            exit_code,
            diagnostics,
        },
    }
}

#[async_trait]
impl Engine for TerraformEngine {
    async fn plan(&self, request: PlanRequest) -> Result<EnginePlan, PlanError> {
        let deadline = Instant::now() + request.timeout;
        let dir = request.workspace.as_path();

        place_state(dir, request.prior_state.as_deref())
            .await
            .map_err(|e| PlanError::Launch {
                message: format!("Failed to place prior state: {e}"),
            })?;

        self.init(dir, deadline)
            .await
            .map_err(|f| plan_error(f, request.timeout))?;

        let mut plan_args = args(&[
            "plan",
            "-input=false",
            "-no-color",
            "-detailed-exitcode",
        ]);
        plan_args.push(format!("-out={PLAN_FILE}"));
        for (key, value) in &request.vars {
            plan_args.push(String::from("-var"));
            plan_args.push(format!("{key}={value}"));
        }

        let output = self
            .run(dir, &plan_args, deadline)
            .await
            .map_err(|f| plan_error(f, request.timeout))?;

        let has_changes = match output.exit_code {
            Some(0) => false,
            Some(EXIT_HAS_CHANGES) => true,
            code => {
                return Err(PlanError::Engine {
                    exit_code: code,
                    diagnostics: output.diagnostics(),
                })
            }
        };

        let plan = fs::read(dir.join(PLAN_FILE))
            .await
            .map_err(|e| PlanError::Parse {
                message: format!("Plan file was not written: {e}"),
            })?;

        info!(
            "Terraform plan in {} finished ({})",
            dir.display(),
            if has_changes { "changes" } else { "no changes" }
        );
        Ok(EnginePlan {
            has_changes,
            plan,
            diagnostics: output.stdout_text(),
        })
    }

    async fn apply(&self, request: ApplyRequest) -> Result<EngineApply, ApplyError> {
        let deadline = Instant::now() + request.timeout;
        let dir = request.workspace.as_path();

        let prepared = async {
            place_state(dir, request.prior_state.as_deref()).await?;
            fs::write(dir.join(PLAN_FILE), &request.plan).await
        };
        prepared.await.map_err(|e| ApplyError::Launch {
            message: format!("Failed to prepare workspace: {e}"),
        })?;

        self.init(dir, deadline)
            .await
            .map_err(|f| apply_error(f, request.timeout))?;

        let applied = self
            .run_checked(
                dir,
                &args(&["apply", "-input=false", "-no-color", PLAN_FILE]),
                deadline,
            )
            .await
            .map_err(|f| apply_error(f, request.timeout))?;

        let state = fs::read(dir.join(STATE_FILE))
            .await
            .map_err(|e| ApplyError::Engine {
                exit_code: applied.exit_code,
                diagnostics: format!("Apply produced no state: {e}"),
            })?;

        // Outputs are best effort; a bad payload is handled by the extractor.
        let outputs = match self
            .run_checked(dir, &args(&["output", "-json"]), deadline)
            .await
        {
            Ok(output) => output.stdout,
            Err(_) => {
                warn!("terraform output failed in {}", dir.display());
                Vec::new()
            }
        };

        info!("Terraform apply in {} finished", dir.display());
        Ok(EngineApply {
            state,
            outputs,
            diagnostics: applied.stdout_text(),
        })
    }

    fn name(&self) -> &'static str {
        "terraform"
    }
}
