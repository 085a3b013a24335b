//! Approval gate between a stored plan and its apply.

use tracing::{debug, info};

use super::ledger::{ApprovalState, PlanLedger};
use super::policy::ApprovalPolicy;

/// Outcome of evaluating the gate for one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// The plan is approved and may be applied now.
    Approved,
    /// The plan waits for the operator to declare its fingerprint.
    AwaitingApproval {
        /// Fingerprint declared by the operator, if any, that does not match.
        declared: Option<String>,
    },
    /// The plan has nothing to apply.
    NothingToApply,
    /// The plan can never be applied (superseded, rejected or already applied).
    Closed(ApprovalState),
}

/// Decides whether stored plans may proceed to apply.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApprovalGate;

impl ApprovalGate {
    /// Creates a new gate.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Evaluates the gate for a fingerprint, approving it in the ledger when
    /// the policy allows.
    ///
    /// Only `Pending` plans move. `Approved` plans stay approved so a failed
    /// apply is retried without re-approval.
    pub fn evaluate(
        &self,
        ledger: &mut PlanLedger,
        fingerprint: &str,
        policy: &ApprovalPolicy,
    ) -> GateDecision {
        match ledger.state_of(fingerprint) {
            Some(ApprovalState::Approved) => GateDecision::Approved,
            Some(ApprovalState::Pending) => {
                if policy.approves(fingerprint) {
                    ledger.approve(fingerprint);
                    info!("Plan {fingerprint} approved ({policy})");
                    GateDecision::Approved
                } else {
                    let declared = match policy {
                        ApprovalPolicy::Manual { approved } => approved.clone(),
                        ApprovalPolicy::Auto => None,
                    };
                    debug!("Plan {fingerprint} awaiting approval (declared: {declared:?})");
                    GateDecision::AwaitingApproval { declared }
                }
            }
            Some(ApprovalState::NoChanges) => GateDecision::NothingToApply,
            Some(state) => GateDecision::Closed(state),
            None => GateDecision::Closed(ApprovalState::Rejected),
        }
    }
}
