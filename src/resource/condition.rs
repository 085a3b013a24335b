//! Status conditions attached to resources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition reasons surfaced to operators.
pub mod reasons {
    /// A plan with changes was generated.
    pub const PLANNED_SUCCEED: &str = "TerraformPlannedSucceed";
    /// A plan without changes was generated.
    pub const PLANNED_NO_CHANGES: &str = "TerraformPlannedNoChanges";
    /// The engine failed to plan.
    pub const PLANNED_FAILED: &str = "TerraformPlannedFailed";
    /// The engine never returned from planning.
    pub const PLAN_TIMED_OUT: &str = "TerraformPlanTimedOut";
    /// The artifact checksum did not match.
    pub const ARTIFACT_INTEGRITY_FAILED: &str = "ArtifactIntegrityFailed";
    /// The artifact could not be fetched or extracted.
    pub const ARTIFACT_FAILED: &str = "ArtifactFailed";
    /// The current revision's plan was superseded.
    pub const PLAN_SUPERSEDED: &str = "PlanSuperseded";
    /// The resource spec failed validation.
    pub const INVALID_SPEC: &str = "InvalidSpec";
    /// A store invariant was violated.
    pub const STORE_CONFLICT: &str = "StoreConflict";
    /// The plan was applied.
    pub const APPLIED_SUCCEED: &str = "TerraformAppliedSucceed";
    /// The engine failed to apply.
    pub const APPLIED_FAIL: &str = "TerraformAppliedFail";
    /// The engine never returned from applying.
    pub const APPLY_TIMED_OUT: &str = "TerraformApplyTimedOut";
    /// Outputs were parsed from a successful apply.
    pub const OUTPUTS_AVAILABLE: &str = "TerraformOutputsAvailable";
    /// Outputs were written to the configured blob.
    pub const OUTPUTS_WRITTEN: &str = "TerraformOutputsWritten";
}

/// Condition types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// Plan stage.
    Plan,
    /// Apply stage.
    Apply,
    /// Output extraction.
    Output,
}

/// Condition status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConditionStatus {
    /// The stage succeeded.
    True,
    /// The stage failed.
    False,
    /// Not yet known.
    Unknown,
}

/// A typed status fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type.
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    /// Condition status.
    pub status: ConditionStatus,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
    /// When the fact last changed.
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Creates a condition stamped with the current time.
    #[must_use]
    pub fn new(
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type,
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Creates a `True` condition.
    #[must_use]
    pub fn succeeded(condition_type: ConditionType, reason: &str, message: impl Into<String>) -> Self {
        Self::new(condition_type, ConditionStatus::True, reason, message)
    }

    /// Creates a `False` condition.
    #[must_use]
    pub fn failed(condition_type: ConditionType, reason: &str, message: impl Into<String>) -> Self {
        Self::new(condition_type, ConditionStatus::False, reason, message)
    }

    /// Returns true if both conditions state the same fact, ignoring time.
    #[must_use]
    pub fn same_fact(&self, other: &Self) -> bool {
        self.condition_type == other.condition_type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }

    /// Returns true if the condition reports success.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Plan => "Plan",
            Self::Apply => "Apply",
            Self::Output => "Output",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}
