//! Plan ledger: the persisted approval state of every plan of a resource.
//!
//! The ledger is the store-side source of truth for the approval gate.
//! At most one entry is ever active (`Pending` or `Approved`); recording a
//! new fingerprint supersedes the active one permanently. Superseded and
//! rejected fingerprints that fall out of the bounded history are kept as
//! tombstones so they can never be recorded afresh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// Current version of the ledger format.
pub const LEDGER_VERSION: &str = "1.0";

/// Number of entries kept per resource.
const MAX_HISTORY: usize = 100;

/// Approval state of one plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    /// Stored and waiting for approval.
    Pending,
    /// Approved, not yet applied.
    Approved,
    /// Successfully applied.
    Applied,
    /// Replaced by a newer plan; never approvable again.
    Superseded,
    /// The plan has nothing to apply.
    NoChanges,
    /// The revision could not be planned (e.g. failed integrity check).
    Rejected,
}

/// One plan recorded in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Plan fingerprint.
    pub fingerprint: String,
    /// Source revision the plan was generated from.
    pub revision: String,
    /// Approval state.
    pub state: ApprovalState,
    /// When the entry was recorded.
    pub created_at: DateTime<Utc>,
    /// When the state last changed.
    pub updated_at: DateTime<Utc>,
    /// Why the entry reached its state, for rejected entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Per-resource plan ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanLedger {
    /// Ledger format version.
    pub version: String,
    /// Entries, oldest first.
    #[serde(default)]
    pub entries: Vec<LedgerEntry>,
    /// Fingerprint of the last applied plan.
    #[serde(default)]
    pub last_applied: Option<String>,
    /// Final states of superseded or rejected fingerprints evicted from `entries`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub retired: BTreeMap<String, ApprovalState>,
}

impl ApprovalState {
    /// Returns true while the plan can still be applied.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Applied => "Applied",
            Self::Superseded => "Superseded",
            Self::NoChanges => "NoChanges",
            Self::Rejected => "Rejected",
        };
        write!(f, "{s}")
    }
}

impl Default for PlanLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: LEDGER_VERSION.to_string(),
            entries: Vec::new(),
            last_applied: None,
            retired: BTreeMap::new(),
        }
    }

    /// Gets the entry for a fingerprint.
    #[must_use]
    pub fn entry(&self, fingerprint: &str) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.fingerprint == fingerprint)
    }

    /// Gets the state of a fingerprint, including retired ones.
    #[must_use]
    pub fn state_of(&self, fingerprint: &str) -> Option<ApprovalState> {
        self.entry(fingerprint)
            .map(|e| e.state)
            .or_else(|| self.retired.get(fingerprint).copied())
    }

    /// Returns the active (`Pending` or `Approved`) entry, if any.
    #[must_use]
    pub fn active(&self) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.state.is_active())
    }

    fn entry_mut(&mut self, fingerprint: &str) -> Option<&mut LedgerEntry> {
        self.entries.iter_mut().find(|e| e.fingerprint == fingerprint)
    }

    /// Records a freshly stored plan.
    ///
    /// A fingerprint already in the ledger keeps its state. Otherwise the
    /// active entry is superseded and the plan enters as `Pending`, or
    /// `NoChanges` when it has nothing to apply.
    pub fn record_plan(
        &mut self,
        fingerprint: &str,
        revision: &str,
        has_changes: bool,
    ) -> ApprovalState {
        let state = if has_changes {
            ApprovalState::Pending
        } else {
            ApprovalState::NoChanges
        };
        self.record(fingerprint, revision, state, None)
    }

    /// Records a revision that cannot be planned.
    pub fn record_rejected(
        &mut self,
        fingerprint: &str,
        revision: &str,
        reason: impl Into<String>,
    ) -> ApprovalState {
        self.record(
            fingerprint,
            revision,
            ApprovalState::Rejected,
            Some(reason.into()),
        )
    }

    fn record(
        &mut self,
        fingerprint: &str,
        revision: &str,
        state: ApprovalState,
        reason: Option<String>,
    ) -> ApprovalState {
        if let Some(existing) = self.state_of(fingerprint) {
            debug!("Fingerprint {fingerprint} already recorded as {existing}");
            return existing;
        }

        let now = Utc::now();
        for entry in &mut self.entries {
            if entry.state.is_active() {
                info!(
                    "Plan {} superseded by {fingerprint}",
                    entry.fingerprint
                );
                entry.state = ApprovalState::Superseded;
                entry.updated_at = now;
            }
        }

        if self.entries.len() >= MAX_HISTORY {
            self.evict_oldest();
        }

        self.entries.push(LedgerEntry {
            fingerprint: fingerprint.to_string(),
            revision: revision.to_string(),
            state,
            created_at: now,
            updated_at: now,
            reason,
        });
        state
    }

    /// Moves a `Pending` plan to `Approved`.
    ///
    /// Returns false if the plan is not pending.
    pub fn approve(&mut self, fingerprint: &str) -> bool {
        self.transition(fingerprint, ApprovalState::Pending, ApprovalState::Approved)
    }

    /// Moves an `Approved` plan to `Applied` and records it as last applied.
    ///
    /// Returns false if the plan is not approved.
    pub fn mark_applied(&mut self, fingerprint: &str) -> bool {
        let moved =
            self.transition(fingerprint, ApprovalState::Approved, ApprovalState::Applied);
        if moved {
            self.last_applied = Some(fingerprint.to_string());
        }
        moved
    }

    /// Supersedes an active plan.
    ///
    /// Returns false if the plan is not active.
    pub fn supersede(&mut self, fingerprint: &str) -> bool {
        match self.entry_mut(fingerprint) {
            Some(entry) if entry.state.is_active() => {
                entry.state = ApprovalState::Superseded;
                entry.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Reconciles the ledger with the fingerprint recorded on the state blob.
    ///
    /// An apply that committed state but crashed before the ledger was
    /// updated leaves its plan `Approved`; it is marked `Applied` here.
    /// Returns true if the ledger changed.
    pub fn repair(&mut self, applied_plan: Option<&str>) -> bool {
        let Some(fingerprint) = applied_plan else {
            return false;
        };

        if self.state_of(fingerprint) == Some(ApprovalState::Approved) {
            info!("Recovering applied state for {fingerprint} from the state store");
            return self.mark_applied(fingerprint);
        }
        false
    }

    /// Drops the oldest entry other than the last applied one.
    fn evict_oldest(&mut self) {
        let last_applied = self.last_applied.as_deref();
        let Some(index) = self
            .entries
            .iter()
            .position(|e| Some(e.fingerprint.as_str()) != last_applied)
        else {
            return;
        };

        let evicted = self.entries.remove(index);
        if matches!(
            evicted.state,
            ApprovalState::Superseded | ApprovalState::Rejected
        ) {
            self.retired.insert(evicted.fingerprint, evicted.state);
        }
    }

    fn transition(&mut self, fingerprint: &str, from: ApprovalState, to: ApprovalState) -> bool {
        match self.entry_mut(fingerprint) {
            Some(entry) if entry.state == from => {
                debug!("Plan {fingerprint}: {from} -> {to}");
                entry.state = to;
                entry.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FP1: &str = "plan-r1-0000000001";
    const FP2: &str = "plan-r2-0000000002";

    #[test]
    fn test_record_and_approve() {
        let mut ledger = PlanLedger::new();
        assert_eq!(ledger.record_plan(FP1, "r1", true), ApprovalState::Pending);
        assert!(ledger.approve(FP1));
        assert!(!ledger.approve(FP1));
        assert!(ledger.mark_applied(FP1));
        assert_eq!(ledger.last_applied.as_deref(), Some(FP1));
        assert!(ledger.active().is_none());
    }

    #[test]
    fn test_no_changes_never_approvable() {
        let mut ledger = PlanLedger::new();
        assert_eq!(ledger.record_plan(FP1, "r1", false), ApprovalState::NoChanges);
        assert!(!ledger.approve(FP1));
        assert!(!ledger.mark_applied(FP1));
        assert!(ledger.last_applied.is_none());
    }

    #[test]
    fn test_newer_plan_supersedes() {
        let mut ledger = PlanLedger::new();
        ledger.record_plan(FP1, "r1", true);
        ledger.record_plan(FP2, "r2", true);

        assert_eq!(ledger.state_of(FP1), Some(ApprovalState::Superseded));
        assert!(!ledger.approve(FP1));

        // Re-recording the superseded fingerprint does not revive it
        assert_eq!(ledger.record_plan(FP1, "r1", true), ApprovalState::Superseded);
        assert_eq!(ledger.active().map(|e| e.fingerprint.as_str()), Some(FP2));
    }

    #[test]
    fn test_approved_not_applied_is_superseded() {
        let mut ledger = PlanLedger::new();
        ledger.record_plan(FP1, "r1", true);
        ledger.approve(FP1);
        ledger.record_plan(FP2, "r2", true);
        assert_eq!(ledger.state_of(FP1), Some(ApprovalState::Superseded));
    }

    #[test]
    fn test_repair_from_state_label() {
        let mut ledger = PlanLedger::new();
        ledger.record_plan(FP1, "r1", true);
        ledger.approve(FP1);

        assert!(!ledger.repair(None));
        assert!(!ledger.repair(Some(FP2)));
        assert!(ledger.repair(Some(FP1)));
        assert_eq!(ledger.state_of(FP1), Some(ApprovalState::Applied));
        assert_eq!(ledger.last_applied.as_deref(), Some(FP1));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut ledger = PlanLedger::new();
        for i in 0..(MAX_HISTORY + 10) {
            ledger.record_plan(&format!("plan-r{i}-{i:010}"), &format!("r{i}"), true);
        }
        assert_eq!(ledger.entries.len(), MAX_HISTORY);
        assert_eq!(ledger.retired.len(), 10);
        assert!(ledger.active().is_some());
    }

    #[test]
    fn test_evicted_superseded_plan_stays_superseded() {
        let mut ledger = PlanLedger::new();
        ledger.record_plan(FP1, "r1", true);
        for i in 0..=MAX_HISTORY {
            ledger.record_plan(&format!("plan-x{i}-{i:010}"), &format!("x{i}"), true);
        }
        assert!(ledger.entry(FP1).is_none());
        assert_eq!(ledger.state_of(FP1), Some(ApprovalState::Superseded));

        // Republishing the old revision cannot produce an approvable plan
        assert_eq!(ledger.record_plan(FP1, "r1", true), ApprovalState::Superseded);
        assert!(!ledger.approve(FP1));
        assert_ne!(ledger.active().map(|e| e.fingerprint.as_str()), Some(FP1));
    }

    #[test]
    fn test_eviction_keeps_last_applied_and_rejections() {
        let mut ledger = PlanLedger::new();
        ledger.record_plan(FP1, "r1", true);
        ledger.approve(FP1);
        ledger.mark_applied(FP1);
        ledger.record_rejected(FP2, "r2", "checksum mismatch");
        for i in 0..MAX_HISTORY {
            ledger.record_plan(&format!("plan-x{i}-{i:010}"), &format!("x{i}"), false);
        }

        assert_eq!(ledger.state_of(FP1), Some(ApprovalState::Applied));
        assert!(ledger.entry(FP1).is_some());
        assert_eq!(ledger.state_of(FP2), Some(ApprovalState::Rejected));
        assert_eq!(ledger.entries.len(), MAX_HISTORY);

        let json = serde_json::to_string(&ledger).expect("serialize");
        let restored: PlanLedger = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored.state_of(FP2), Some(ApprovalState::Rejected));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Record(usize, bool),
        Approve(usize),
        Apply(usize),
        Supersede(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize, any::<bool>()).prop_map(|(i, c)| Op::Record(i, c)),
            (0..4usize).prop_map(Op::Approve),
            (0..4usize).prop_map(Op::Apply),
            (0..4usize).prop_map(Op::Supersede),
        ]
    }

    proptest! {
        #[test]
        fn prop_ledger_invariants(ops in proptest::collection::vec(op_strategy(), 0..40)) {
            let fingerprints: Vec<String> = (0..4).map(|i| format!("plan-r{i}-{i:010}")).collect();
            let mut ledger = PlanLedger::new();
            let mut superseded = std::collections::HashSet::<String>::new();

            for op in ops {
                match op {
                    Op::Record(i, changes) => {
                        ledger.record_plan(&fingerprints[i], &format!("r{i}"), changes);
                    }
                    Op::Approve(i) => {
                        ledger.approve(&fingerprints[i]);
                    }
                    Op::Apply(i) => {
                        ledger.mark_applied(&fingerprints[i]);
                    }
                    Op::Supersede(i) => {
                        ledger.supersede(&fingerprints[i]);
                    }
                }

                let active = ledger.entries.iter().filter(|e| e.state.is_active()).count();
                prop_assert!(active <= 1);

                for fp in &superseded {
                    prop_assert_eq!(ledger.state_of(fp), Some(ApprovalState::Superseded));
                }
                for entry in &ledger.entries {
                    if entry.state == ApprovalState::Superseded {
                        superseded.insert(entry.fingerprint.clone());
                    }
                }

                if let Some(last) = &ledger.last_applied {
                    prop_assert_eq!(ledger.state_of(last), Some(ApprovalState::Applied));
                }
            }
        }
    }
}
