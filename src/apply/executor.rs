//! Apply executor.
//!
//! Applies stored plans only. The plan bytes always come from the plan
//! store, never from a fresh engine run, and state is written only after
//! the engine reports success.

use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::approval::{ApprovalState, PlanLedger};
use crate::engine::{ApplyRequest, Engine};
use crate::error::{ApplyError, Result, StoreError};
use crate::resource::{ResourceId, TerraformSpec};
use crate::source::Workspace;
use crate::store::{plan_key, PlanStore, StateStore};

/// Result of a successful apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Fingerprint of the applied plan.
    pub fingerprint: String,
    /// Whether the new state was written to the state store.
    pub state_persisted: bool,
    /// Raw outputs payload for the extractor.
    pub outputs: Vec<u8>,
    /// Engine diagnostics.
    pub diagnostics: String,
}

/// Runs the engine's apply step against stored plans.
#[derive(Clone)]
pub struct ApplyExecutor {
    engine: Arc<dyn Engine>,
    plans: PlanStore,
    states: StateStore,
}

impl std::fmt::Debug for ApplyExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyExecutor")
            .field("engine", &self.engine.name())
            .finish_non_exhaustive()
    }
}

impl ApplyExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(engine: Arc<dyn Engine>, plans: PlanStore, states: StateStore) -> Self {
        Self {
            engine,
            plans,
            states,
        }
    }

    /// Applies the approved plan `fingerprint`.
    ///
    /// `current_revision` is the revision the source publishes now; a plan
    /// generated from any other revision is refused as stale. The ledger
    /// is only read; recording the apply is the caller's job once this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns `NotApproved` if the ledger does not hold the plan as
    /// approved, `StalePlan` if the source moved on, a store error if the
    /// plan blob is missing, and the engine's apply error otherwise. On
    /// any error the stored state is left untouched.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply(
        &self,
        id: &ResourceId,
        spec: &TerraformSpec,
        ledger: &PlanLedger,
        fingerprint: &str,
        workspace: &Workspace,
        current_revision: &str,
        prior_state: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<ApplyOutcome> {
        if ledger.state_of(fingerprint) != Some(ApprovalState::Approved) {
            return Err(ApplyError::NotApproved {
                fingerprint: fingerprint.to_string(),
            }
            .into());
        }

        let Some(plan) = self.plans.get(id, &spec.workspace, fingerprint).await? else {
            let key = plan_key(id, &spec.workspace, fingerprint);
            error!("Approved plan {fingerprint} has no blob at {key}");
            return Err(StoreError::not_found(key.to_string()).into());
        };

        if plan.revision() != current_revision || workspace.revision != current_revision {
            return Err(ApplyError::StalePlan {
                fingerprint: fingerprint.to_string(),
                plan_revision: plan.revision().to_string(),
                current_revision: current_revision.to_string(),
            }
            .into());
        }

        info!("Applying {fingerprint} to {id}");
        let applied = self
            .engine
            .apply(ApplyRequest {
                workspace: workspace.dir.clone(),
                plan: plan.plan,
                prior_state,
                timeout,
            })
            .await
            .inspect_err(|e| error!("Apply of {fingerprint} for {id} failed: {e}"))?;

        let state_persisted = if spec.disable_state_persistence {
            info!("State persistence disabled for {id}, discarding new state");
            false
        } else {
            self.states
                .save(id, &spec.workspace, &applied.state, fingerprint)
                .await?;
            true
        };

        Ok(ApplyOutcome {
            fingerprint: fingerprint.to_string(),
            state_persisted,
            outputs: applied.outputs,
            diagnostics: applied.diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineApply, MockEngine};
    use crate::error::ReconcilerError;
    use crate::planner::{Fingerprinter, PlanArtifact};
    use crate::resource::SourceReference;
    use crate::store::{BlobStore, MemoryBlobStore};
    use std::path::PathBuf;

    struct Fixture {
        id: ResourceId,
        spec: TerraformSpec,
        plans: PlanStore,
        states: StateStore,
        ledger: PlanLedger,
        fingerprint: String,
    }

    async fn fixture(revision: &str) -> Fixture {
        let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let id = ResourceId::new("flux-system", "helloworld");
        let spec = TerraformSpec::new(SourceReference::new("GitRepository", "flux-system", "podinfo"));
        let plans = PlanStore::new(Arc::clone(&blobs));
        let states = StateStore::new(blobs);

        let fingerprint = Fingerprinter::new().fingerprint(&id, revision);
        plans
            .put(&id, &spec.workspace, &PlanArtifact::new(&fingerprint, revision, true, b"plan".to_vec()))
            .await
            .expect("store plan");

        let mut ledger = PlanLedger::new();
        ledger.record_plan(&fingerprint, revision, true);
        ledger.approve(&fingerprint);

        Fixture {
            id,
            spec,
            plans,
            states,
            ledger,
            fingerprint,
        }
    }

    fn workspace(revision: &str) -> Workspace {
        Workspace {
            root: PathBuf::from("/tmp/ws"),
            dir: PathBuf::from("/tmp/ws"),
            revision: revision.to_string(),
        }
    }

    fn executor(fx: &Fixture, engine: MockEngine) -> ApplyExecutor {
        ApplyExecutor::new(Arc::new(engine), fx.plans.clone(), fx.states.clone())
    }

    #[tokio::test]
    async fn test_apply_uses_stored_plan_and_saves_state() {
        let fx = fixture("main/r1").await;
        let mut engine = MockEngine::new();
        engine
            .expect_apply()
            .withf(|req| req.plan == b"plan")
            .times(1)
            .returning(|_| {
                Ok(EngineApply {
                    state: b"state-1".to_vec(),
                    outputs: b"{}".to_vec(),
                    diagnostics: String::from("Apply complete!"),
                })
            });

        let outcome = executor(&fx, engine)
            .apply(
                &fx.id,
                &fx.spec,
                &fx.ledger,
                &fx.fingerprint,
                &workspace("main/r1"),
                "main/r1",
                None,
                Duration::from_secs(60),
            )
            .await
            .expect("apply");

        assert!(outcome.state_persisted);
        let state = fx
            .states
            .load(&fx.id, "default")
            .await
            .expect("load")
            .expect("state");
        assert_eq!(state.data, b"state-1");
        assert_eq!(state.applied_plan.as_deref(), Some(fx.fingerprint.as_str()));
    }

    #[tokio::test]
    async fn test_failed_apply_leaves_state() {
        let fx = fixture("main/r1").await;
        fx.states
            .save(&fx.id, "default", b"previous", "plan-main-0000000000")
            .await
            .expect("seed state");

        let mut engine = MockEngine::new();
        engine.expect_apply().times(1).returning(|_| {
            Err(ApplyError::Engine {
                exit_code: Some(1),
                diagnostics: String::from("Error: quota exceeded"),
            })
        });

        let err = executor(&fx, engine)
            .apply(
                &fx.id,
                &fx.spec,
                &fx.ledger,
                &fx.fingerprint,
                &workspace("main/r1"),
                "main/r1",
                Some(b"previous".to_vec()),
                Duration::from_secs(60),
            )
            .await
            .expect_err("apply failure");
        assert!(matches!(err, ReconcilerError::Apply(ApplyError::Engine { .. })));

        let state = fx
            .states
            .load(&fx.id, "default")
            .await
            .expect("load")
            .expect("state");
        assert_eq!(state.data, b"previous");
        assert_eq!(state.applied_plan.as_deref(), Some("plan-main-0000000000"));
    }

    #[tokio::test]
    async fn test_refuses_stale_and_unapproved_plans() {
        let fx = fixture("main/r1").await;
        let mut engine = MockEngine::new();
        engine.expect_apply().never();
        let executor = executor(&fx, engine);

        let err = executor
            .apply(
                &fx.id,
                &fx.spec,
                &fx.ledger,
                &fx.fingerprint,
                &workspace("main/r1"),
                "main/r2",
                None,
                Duration::from_secs(60),
            )
            .await
            .expect_err("stale");
        assert!(matches!(err, ReconcilerError::Apply(ApplyError::StalePlan { .. })));

        let mut pending = PlanLedger::new();
        pending.record_plan(&fx.fingerprint, "main/r1", true);
        let err = executor
            .apply(
                &fx.id,
                &fx.spec,
                &pending,
                &fx.fingerprint,
                &workspace("main/r1"),
                "main/r1",
                None,
                Duration::from_secs(60),
            )
            .await
            .expect_err("not approved");
        assert!(matches!(err, ReconcilerError::Apply(ApplyError::NotApproved { .. })));
    }

    #[tokio::test]
    async fn test_disabled_state_persistence() {
        let mut fx = fixture("main/r1").await;
        fx.spec.disable_state_persistence = true;

        let mut engine = MockEngine::new();
        engine.expect_apply().times(1).returning(|_| {
            Ok(EngineApply {
                state: b"state-1".to_vec(),
                outputs: Vec::new(),
                diagnostics: String::new(),
            })
        });

        let outcome = executor(&fx, engine)
            .apply(
                &fx.id,
                &fx.spec,
                &fx.ledger,
                &fx.fingerprint,
                &workspace("main/r1"),
                "main/r1",
                None,
                Duration::from_secs(60),
            )
            .await
            .expect("apply");

        assert!(!outcome.state_persisted);
        assert!(fx.states.load(&fx.id, "default").await.expect("load").is_none());
    }
}
