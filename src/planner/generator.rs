//! Plan generation.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::engine::{Engine, PlanRequest};
use crate::error::PlanError;
use crate::resource::{ResourceId, TerraformSpec};
use crate::source::Workspace;

use super::fingerprint::Fingerprinter;
use super::plan::PlanArtifact;

/// Runs the engine's plan step for a workspace.
#[derive(Clone)]
pub struct PlanGenerator {
    engine: Arc<dyn Engine>,
    fingerprinter: Fingerprinter,
}

impl std::fmt::Debug for PlanGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanGenerator")
            .field("engine", &self.engine.name())
            .finish()
    }
}

impl PlanGenerator {
    /// Creates a generator over an engine.
    #[must_use]
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            fingerprinter: Fingerprinter::new(),
        }
    }

    /// Computes the fingerprint a plan of this revision will carry.
    #[must_use]
    pub fn fingerprint(&self, id: &ResourceId, revision: &str) -> String {
        self.fingerprinter.fingerprint(id, revision)
    }

    /// Generates a plan for a workspace against its prior state.
    ///
    /// # Errors
    ///
    /// Returns the engine's plan error, carrying its diagnostics.
    pub async fn generate(
        &self,
        id: &ResourceId,
        workspace: &Workspace,
        prior_state: Option<Vec<u8>>,
        spec: &TerraformSpec,
        timeout: Duration,
    ) -> Result<PlanArtifact, PlanError> {
        let fingerprint = self.fingerprint(id, &workspace.revision);
        info!("Planning {id} at revision {} as {fingerprint}", workspace.revision);

        let result = self
            .engine
            .plan(PlanRequest {
                workspace: workspace.dir.clone(),
                prior_state,
                vars: spec.vars.clone(),
                timeout,
            })
            .await;

        let plan = match result {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Plan {fingerprint} for {id} failed: {e}");
                return Err(e);
            }
        };

        if plan.has_changes && plan.plan.is_empty() {
            return Err(PlanError::Parse {
                message: String::from("engine reported changes but returned an empty plan"),
            });
        }

        Ok(
            PlanArtifact::new(fingerprint, &workspace.revision, plan.has_changes, plan.plan)
                .with_diagnostics(plan.diagnostics),
        )
    }
}
