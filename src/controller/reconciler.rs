//! Per-resource reconciliation.
//!
//! One pass takes a resource from whatever the stores say it is to the
//! next resting point: plan the current source revision if it has no plan
//! yet, gate it, apply it once approved, and report every transition as
//! status conditions. The stores are the source of truth; status is
//! recomputed from them on every pass.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::apply::{ApplyExecutor, ApplyOutcome};
use crate::approval::{ApprovalGate, ApprovalState, GateDecision, PlanLedger};
use crate::config::ConfigValidator;
use crate::engine::Engine;
use crate::error::{ApplyError, PlanError, ReconcilerError, ResourceError, Result, SourceError, StoreError};
use crate::outputs::OutputExtractor;
use crate::planner::PlanGenerator;
use crate::resource::{
    reasons, Condition, ConditionType, Resource, ResourceId, ResourceStore, TerraformSpec,
};
use crate::source::{SourceArtifact, SourceProvider, Workspace, WorkspaceMaterializer};
use crate::store::{outputs_key, BlobStore, LedgerStore, OutputStore, PlanStore, StateStore};

use super::phase::{ReconcilePhase, Stage};

/// Delay before looking at a source that had no ready artifact.
pub const SOURCE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// When a resource should be reconciled again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// After the resync interval. Clears the failure count.
    Resync(Duration),
    /// After a fixed delay, without counting a failure.
    After(Duration),
    /// After an exponential backoff delay.
    Backoff,
    /// Never; the resource is gone.
    Forget,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Phase the resource rests in.
    pub phase: ReconcilePhase,
    /// When to reconcile again.
    pub requeue: Requeue,
}

impl ReconcileOutcome {
    const fn new(phase: ReconcilePhase, requeue: Requeue) -> Self {
        Self { phase, requeue }
    }
}

/// Tunables of the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerOptions {
    /// Engine timeout when the resource declares none.
    pub engine_timeout: Duration,
    /// Resync interval when the resource declares none.
    pub resync_interval: Duration,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            engine_timeout: Duration::from_secs(20 * 60),
            resync_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Per-pass context.
struct Pass {
    id: ResourceId,
    interval: Duration,
    timeout: Duration,
}

/// The reconciliation state machine.
pub struct Reconciler {
    resources: Arc<dyn ResourceStore>,
    sources: Arc<dyn SourceProvider>,
    materializer: WorkspaceMaterializer,
    generator: PlanGenerator,
    gate: ApprovalGate,
    executor: ApplyExecutor,
    extractor: OutputExtractor,
    validator: ConfigValidator,
    plans: PlanStore,
    states: StateStore,
    ledgers: LedgerStore,
    outputs: OutputStore,
    options: ReconcilerOptions,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("resources", &self.resources.backend_type())
            .field("materializer", &self.materializer)
            .field("generator", &self.generator)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(
        resources: Arc<dyn ResourceStore>,
        sources: Arc<dyn SourceProvider>,
        engine: Arc<dyn Engine>,
        blobs: Arc<dyn BlobStore>,
        materializer: WorkspaceMaterializer,
    ) -> Self {
        let plans = PlanStore::new(Arc::clone(&blobs));
        let states = StateStore::new(Arc::clone(&blobs));
        Self {
            resources,
            sources,
            materializer,
            generator: PlanGenerator::new(Arc::clone(&engine)),
            gate: ApprovalGate::new(),
            executor: ApplyExecutor::new(engine, plans.clone(), states.clone()),
            extractor: OutputExtractor::new(),
            validator: ConfigValidator::new(),
            plans,
            states,
            ledgers: LedgerStore::new(Arc::clone(&blobs)),
            outputs: OutputStore::new(blobs),
            options: ReconcilerOptions::default(),
        }
    }

    /// Sets the reconciler options.
    #[must_use]
    pub const fn with_options(mut self, options: ReconcilerOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the source provider the reconciler plans from.
    #[must_use]
    pub fn sources(&self) -> Arc<dyn SourceProvider> {
        Arc::clone(&self.sources)
    }

    /// Runs one reconciliation pass for a resource.
    ///
    /// Stage failures are recorded as conditions and reported through the
    /// returned requeue, never as errors.
    ///
    /// # Errors
    ///
    /// Returns an error only if the resource cannot be read or its status
    /// cannot be written.
    pub async fn reconcile(&self, id: &ResourceId) -> Result<ReconcileOutcome> {
        let mut resource = match self.resources.get(id).await {
            Ok(resource) => resource,
            Err(ReconcilerError::Resource(ResourceError::NotFound { .. })) => {
                debug!("Resource {id} is gone");
                return Ok(ReconcileOutcome::new(ReconcilePhase::Pending, Requeue::Forget));
            }
            Err(e) => return Err(e),
        };

        let outcome = match self.run(&mut resource).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(resource = %id, "Reconciliation failed: {e}");
                if matches!(e, ReconcilerError::Store(StoreError::Conflict { .. })) {
                    resource.status.set_condition(Condition::failed(
                        ConditionType::Plan,
                        reasons::STORE_CONFLICT,
                        e.to_string(),
                    ));
                }
                ReconcileOutcome::new(ReconcilePhase::Failed(failed_stage(&e)), Requeue::Backoff)
            }
        };

        if resource.status.phase != outcome.phase {
            info!(resource = %id, "Phase {} -> {}", resource.status.phase, outcome.phase);
        }
        resource.status.phase = outcome.phase;
        self.resources.update_status(id, &resource.status).await?;
        Ok(outcome)
    }

    async fn run(&self, resource: &mut Resource) -> Result<ReconcileOutcome> {
        let id = resource.id();

        if let Err(e) = self.validator.validate_resource(resource) {
            warn!(resource = %id, "Invalid spec: {e}");
            resource.status.set_condition(Condition::failed(
                ConditionType::Plan,
                reasons::INVALID_SPEC,
                e.to_string(),
            ));
            return Ok(ReconcileOutcome::new(
                ReconcilePhase::Failed(Stage::Plan),
                Requeue::Resync(self.options.resync_interval),
            ));
        }

        let pass = Pass {
            interval: resource
                .spec
                .interval()?
                .unwrap_or(self.options.resync_interval),
            timeout: resource.spec.timeout()?.unwrap_or(self.options.engine_timeout),
            id,
        };

        if resource.spec.suspend {
            info!(resource = %pass.id, "Suspended, skipping");
            return Ok(ReconcileOutcome::new(
                resource.status.phase,
                Requeue::Resync(pass.interval),
            ));
        }

        let spec = resource.spec.clone();
        let mut ledger = self.ledgers.load(&pass.id, &spec.workspace).await?;
        let state = self.states.load(&pass.id, &spec.workspace).await?;
        if ledger.repair(state.as_ref().and_then(|s| s.applied_plan.as_deref())) {
            self.ledgers.save(&pass.id, &spec.workspace, &ledger).await?;
        }
        resource.status.plan.last_applied = ledger.last_applied.clone().unwrap_or_default();

        let prior_state = if spec.disable_state_persistence {
            None
        } else {
            state.map(|s| s.data)
        };

        let artifact = match self.sources.artifact(&spec.source_ref, &pass.id.namespace).await {
            Ok(Some(artifact)) => artifact,
            Ok(None) => {
                info!(resource = %pass.id, "Source {} is not ready", spec.source_ref);
                return Ok(ReconcileOutcome::new(
                    ReconcilePhase::SourceNotReady,
                    Requeue::After(SOURCE_POLL_INTERVAL),
                ));
            }
            Err(e) => {
                error!(resource = %pass.id, "Source lookup failed: {e}");
                resource.status.set_condition(Condition::failed(
                    ConditionType::Plan,
                    reasons::ARTIFACT_FAILED,
                    e.to_string(),
                ));
                return Ok(ReconcileOutcome::new(
                    ReconcilePhase::Failed(Stage::Source),
                    Requeue::Backoff,
                ));
            }
        };

        let revision = artifact.revision.clone();
        let fingerprint = self.generator.fingerprint(&pass.id, &revision);
        resource.status.last_attempted_revision = Some(revision.clone());

        let mut workspace = None;
        let lookup = ledger
            .state_of(&fingerprint)
            .map(|state| (state, ledger.entry(&fingerprint).and_then(|e| e.reason.clone())));
        match lookup {
            None => {
                // A plan stored by a pass that died before its ledger write is adopted as is
                let plan = if let Some(stored) =
                    self.plans.get(&pass.id, &spec.workspace, &fingerprint).await?
                {
                    info!(resource = %pass.id, "Adopting stored plan {fingerprint}");
                    stored
                } else {
                    resource.status.phase = resource.status.phase.entering(Stage::Plan);
                    self.publish(&pass.id, resource).await?;

                    let ws = match self.materialize(&pass.id, &artifact, &spec).await {
                        Ok(ws) => ws,
                        Err(e) => {
                            return self
                                .source_failed(&pass, resource, &mut ledger, &fingerprint, e)
                                .await;
                        }
                    };

                    let plan = match self
                        .generator
                        .generate(&pass.id, &ws, prior_state.clone(), &spec, pass.timeout)
                        .await
                    {
                        Ok(plan) => plan,
                        Err(e) => {
                            let reason = if e.is_timeout() {
                                reasons::PLAN_TIMED_OUT
                            } else {
                                reasons::PLANNED_FAILED
                            };
                            resource.status.set_condition(Condition::failed(
                                ConditionType::Plan,
                                reason,
                                plan_message(&e),
                            ));
                            return Ok(ReconcileOutcome::new(
                                ReconcilePhase::Failed(Stage::Plan),
                                Requeue::Backoff,
                            ));
                        }
                    };

                    if let Ok(Some(latest)) =
                        self.sources.artifact(&spec.source_ref, &pass.id.namespace).await
                        && latest.revision != revision
                    {
                        info!(
                            resource = %pass.id,
                            "Source moved to {} while planning {fingerprint}, discarding plan",
                            latest.revision
                        );
                        return Ok(ReconcileOutcome::new(
                            resource.status.phase,
                            Requeue::After(Duration::ZERO),
                        ));
                    }

                    self.plans.put(&pass.id, &spec.workspace, &plan).await?;
                    workspace = Some(ws);
                    plan
                };

                ledger.record_plan(&fingerprint, &revision, plan.has_changes());
                self.ledgers.save(&pass.id, &spec.workspace, &ledger).await?;

                if !plan.has_changes() {
                    info!(resource = %pass.id, revision = %revision, "Plan {fingerprint} has no changes");
                    resource.status.set_condition(Condition::succeeded(
                        ConditionType::Plan,
                        reasons::PLANNED_NO_CHANGES,
                        "Plan no changes",
                    ));
                    return Ok(self.settle_no_changes(&pass, resource, &revision).await);
                }

                info!(resource = %pass.id, revision = %revision, "Plan {fingerprint} stored");
                resource.status.set_condition(Condition::succeeded(
                    ConditionType::Plan,
                    reasons::PLANNED_SUCCEED,
                    "Terraform Plan Generated Successfully",
                ));
            }
            Some((ApprovalState::Applied, _)) => {
                self.restore_output_names(&pass.id, &spec, resource).await;
                resource.status.plan.pending.clear();
                resource.status.observed_revision = Some(revision);
                return Ok(ReconcileOutcome::new(
                    ReconcilePhase::Applied,
                    Requeue::Resync(pass.interval),
                ));
            }
            Some((ApprovalState::NoChanges, _)) => {
                return Ok(self.settle_no_changes(&pass, resource, &revision).await);
            }
            Some((ApprovalState::Rejected, reason)) => {
                resource.status.set_condition(Condition::failed(
                    ConditionType::Plan,
                    reasons::ARTIFACT_INTEGRITY_FAILED,
                    reason.unwrap_or_else(|| format!("Revision {revision} was rejected")),
                ));
                return Ok(ReconcileOutcome::new(
                    ReconcilePhase::Failed(Stage::Source),
                    Requeue::Resync(pass.interval),
                ));
            }
            Some((ApprovalState::Superseded, _)) => {
                return Ok(superseded(&pass, resource, &fingerprint));
            }
            Some((ApprovalState::Pending | ApprovalState::Approved, _)) => {}
        }

        let before = ledger.state_of(&fingerprint);
        let decision = self
            .gate
            .evaluate(&mut ledger, &fingerprint, &spec.approval_policy());
        if ledger.state_of(&fingerprint) != before {
            self.ledgers.save(&pass.id, &spec.workspace, &ledger).await?;
        }

        match decision {
            GateDecision::Approved => {}
            GateDecision::AwaitingApproval { declared } => {
                if let Some(declared) = declared {
                    warn!(
                        resource = %pass.id,
                        "Declared approval {declared} does not match the current plan {fingerprint}"
                    );
                }
                info!(resource = %pass.id, "Plan {fingerprint} awaits approval");
                resource.status.plan.pending = fingerprint;
                return Ok(ReconcileOutcome::new(
                    ReconcilePhase::AwaitingApproval,
                    Requeue::Resync(pass.interval),
                ));
            }
            GateDecision::NothingToApply => {
                return Ok(self.settle_no_changes(&pass, resource, &revision).await);
            }
            GateDecision::Closed(_) => return Ok(superseded(&pass, resource, &fingerprint)),
        }

        resource.status.plan.pending.clone_from(&fingerprint);
        resource.status.phase = resource.status.phase.entering(Stage::Apply);
        self.publish(&pass.id, resource).await?;

        let workspace = match workspace {
            Some(ws) => ws,
            None => match self.materialize(&pass.id, &artifact, &spec).await {
                Ok(ws) => ws,
                Err(e) => {
                    return self
                        .source_failed(&pass, resource, &mut ledger, &fingerprint, e)
                        .await;
                }
            },
        };

        let current_revision = self
            .sources
            .artifact(&spec.source_ref, &pass.id.namespace)
            .await
            .ok()
            .flatten()
            .map_or_else(|| revision.clone(), |a| a.revision);

        let applied = self
            .executor
            .apply(
                &pass.id,
                &spec,
                &ledger,
                &fingerprint,
                &workspace,
                &current_revision,
                prior_state,
                pass.timeout,
            )
            .await;

        let outcome = match applied {
            Ok(outcome) => outcome,
            Err(ReconcilerError::Apply(ApplyError::StalePlan { .. })) => {
                info!(
                    resource = %pass.id,
                    "Source moved to {current_revision}, abandoning {fingerprint}"
                );
                ledger.supersede(&fingerprint);
                self.ledgers.save(&pass.id, &spec.workspace, &ledger).await?;
                resource.status.plan.pending.clear();
                return Ok(ReconcileOutcome::new(
                    ReconcilePhase::Superseded,
                    Requeue::After(Duration::ZERO),
                ));
            }
            Err(ReconcilerError::Apply(e)) => {
                let reason = if e.is_timeout() {
                    reasons::APPLY_TIMED_OUT
                } else {
                    reasons::APPLIED_FAIL
                };
                resource.status.set_condition(Condition::failed(
                    ConditionType::Apply,
                    reason,
                    apply_message(&e),
                ));
                return Ok(ReconcileOutcome::new(
                    ReconcilePhase::Failed(Stage::Apply),
                    Requeue::Backoff,
                ));
            }
            Err(e) => return Err(e),
        };

        ledger.mark_applied(&fingerprint);
        self.ledgers.save(&pass.id, &spec.workspace, &ledger).await?;
        info!(resource = %pass.id, revision = %revision, "Applied {fingerprint}");

        resource.status.set_condition(Condition::succeeded(
            ConditionType::Apply,
            reasons::APPLIED_SUCCEED,
            "Terraform Applied Successfully",
        ));
        resource.status.plan.last_applied.clone_from(&fingerprint);
        resource.status.plan.pending.clear();
        resource.status.observed_revision = Some(revision.clone());

        self.record_outputs(&pass.id, &spec, resource, &outcome).await;
        self.reclaim(&pass.id, &revision).await;

        Ok(ReconcileOutcome::new(
            ReconcilePhase::Applied,
            Requeue::Resync(pass.interval),
        ))
    }

    async fn publish(&self, id: &ResourceId, resource: &Resource) -> Result<()> {
        self.resources.update_status(id, &resource.status).await
    }

    async fn materialize(
        &self,
        id: &ResourceId,
        artifact: &SourceArtifact,
        spec: &TerraformSpec,
    ) -> Result<Workspace> {
        let archive = self.sources.local_path(artifact).await?;
        self.materializer
            .materialize(id, artifact, &archive, &spec.path)
            .await
    }

    /// Records a failure to fetch or materialize the artifact.
    ///
    /// An integrity failure rejects the revision for good; other failures
    /// are retried with backoff when they can succeed later.
    async fn source_failed(
        &self,
        pass: &Pass,
        resource: &mut Resource,
        ledger: &mut PlanLedger,
        fingerprint: &str,
        error: ReconcilerError,
    ) -> Result<ReconcileOutcome> {
        let revision = resource
            .status
            .last_attempted_revision
            .clone()
            .unwrap_or_default();

        match &error {
            ReconcilerError::Source(SourceError::IntegrityMismatch { .. }) => {
                error!(resource = %pass.id, revision = %revision, "{error}");
                ledger.record_rejected(fingerprint, &revision, error.to_string());
                self.ledgers
                    .save(&pass.id, &resource.spec.workspace, ledger)
                    .await?;
                resource.status.set_condition(Condition::failed(
                    ConditionType::Plan,
                    reasons::ARTIFACT_INTEGRITY_FAILED,
                    error.to_string(),
                ));
                Ok(ReconcileOutcome::new(
                    ReconcilePhase::Failed(Stage::Source),
                    Requeue::Resync(pass.interval),
                ))
            }
            ReconcilerError::Source(_) | ReconcilerError::Io(_) => {
                error!(resource = %pass.id, revision = %revision, "Artifact failed: {error}");
                resource.status.set_condition(Condition::failed(
                    ConditionType::Plan,
                    reasons::ARTIFACT_FAILED,
                    error.to_string(),
                ));
                let requeue = if error.is_retryable() {
                    Requeue::Backoff
                } else {
                    Requeue::Resync(pass.interval)
                };
                Ok(ReconcileOutcome::new(
                    ReconcilePhase::Failed(Stage::Source),
                    requeue,
                ))
            }
            _ => Err(error),
        }
    }

    async fn settle_no_changes(
        &self,
        pass: &Pass,
        resource: &mut Resource,
        revision: &str,
    ) -> ReconcileOutcome {
        resource.status.plan.pending.clear();
        resource.status.observed_revision = Some(revision.to_string());
        self.reclaim(&pass.id, revision).await;
        ReconcileOutcome::new(ReconcilePhase::NoChanges, Requeue::Resync(pass.interval))
    }

    /// Parses the apply's outputs into the outputs blob and status.
    ///
    /// A payload that does not parse leaves the previous names in place.
    async fn record_outputs(
        &self,
        id: &ResourceId,
        spec: &TerraformSpec,
        resource: &mut Resource,
        outcome: &ApplyOutcome,
    ) {
        let set = match self.extractor.extract(&outcome.outputs) {
            Ok(set) => set,
            Err(e) => {
                warn!(resource = %id, "Keeping previous outputs of {}: {e}", outcome.fingerprint);
                return;
            }
        };

        let target = spec.write_outputs_to_secret.as_ref();
        let key = outputs_key(id, &spec.workspace, target);
        let selected = target.map_or_else(|| set.clone(), |t| set.filtered(&t.outputs));

        match self
            .outputs
            .write(&key, &selected, &set.names(), &outcome.fingerprint)
            .await
        {
            Ok(()) => {
                let condition = if target.is_some() {
                    Condition::succeeded(
                        ConditionType::Output,
                        reasons::OUTPUTS_WRITTEN,
                        format!("Outputs written to {}", key.name),
                    )
                } else {
                    Condition::succeeded(
                        ConditionType::Output,
                        reasons::OUTPUTS_AVAILABLE,
                        "Outputs available",
                    )
                };
                resource.status.set_condition(condition);
            }
            Err(e) => error!(resource = %id, "Failed to write outputs to {key}: {e}"),
        }

        resource.status.available_outputs = set.names();
    }

    /// Reloads `availableOutputs` from the outputs blob of the applied plan.
    async fn restore_output_names(
        &self,
        id: &ResourceId,
        spec: &TerraformSpec,
        resource: &mut Resource,
    ) {
        let key = outputs_key(id, &spec.workspace, spec.write_outputs_to_secret.as_ref());
        match self.outputs.names(&key).await {
            Ok(Some(names)) => resource.status.available_outputs = names,
            Ok(None) => {}
            Err(e) => warn!(resource = %id, "Failed to read outputs from {key}: {e}"),
        }
    }

    async fn reclaim(&self, id: &ResourceId, keep_revision: &str) {
        if let Err(e) = self.materializer.reclaim_stale(id, keep_revision).await {
            warn!(resource = %id, "Failed to reclaim stale workspaces: {e}");
        }
    }
}

fn superseded(pass: &Pass, resource: &mut Resource, fingerprint: &str) -> ReconcileOutcome {
    info!(resource = %pass.id, "Plan {fingerprint} of the current revision was superseded");
    resource.status.plan.pending.clear();
    resource.status.set_condition(Condition::failed(
        ConditionType::Plan,
        reasons::PLAN_SUPERSEDED,
        format!("Plan {fingerprint} was superseded"),
    ));
    ReconcileOutcome::new(ReconcilePhase::Superseded, Requeue::Resync(pass.interval))
}

const fn failed_stage(error: &ReconcilerError) -> Stage {
    match error {
        ReconcilerError::Source(_) => Stage::Source,
        ReconcilerError::Apply(_) => Stage::Apply,
        ReconcilerError::Store(_) | ReconcilerError::Io(_) => Stage::Store,
        _ => Stage::Plan,
    }
}

fn plan_message(error: &PlanError) -> String {
    match error {
        PlanError::Engine { diagnostics, .. } => diagnostics.clone(),
        other => other.to_string(),
    }
}

fn apply_message(error: &ApplyError) -> String {
    match error {
        ApplyError::Engine { diagnostics, .. } => diagnostics.clone(),
        other => other.to_string(),
    }
}
