//! Reconciliation phases as projected into the status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Fetching or materializing the source.
    Source,
    /// Planning.
    Plan,
    /// Applying.
    Apply,
    /// Writing to the stores.
    Store,
}

/// Position of a resource in the reconciliation state machine.
///
/// Serialized as a plain string such as `AwaitingApproval` or
/// `Failed(Plan)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReconcilePhase {
    /// Never reconciled.
    #[default]
    Pending,
    /// The source has no ready artifact.
    SourceNotReady,
    /// A plan is being generated.
    Planning,
    /// The current plan has nothing to apply.
    NoChanges,
    /// The current plan waits for approval.
    AwaitingApproval,
    /// The approved plan is being applied.
    Applying,
    /// The current plan was applied.
    Applied,
    /// The current revision can no longer be applied.
    Superseded,
    /// A stage failed; a retry is scheduled.
    Failed(Stage),
    /// A failed stage is being retried.
    Retrying(Stage),
}

impl ReconcilePhase {
    /// Returns true if the phase is a resting state.
    #[must_use]
    pub const fn is_idle(self) -> bool {
        matches!(
            self,
            Self::NoChanges | Self::AwaitingApproval | Self::Applied | Self::Superseded
        )
    }

    /// Returns the phase entered when the given stage is re-run.
    ///
    /// A stage re-run right after it failed is a retry.
    #[must_use]
    pub fn entering(self, stage: Stage) -> Self {
        match self {
            Self::Failed(failed) | Self::Retrying(failed) if failed == stage => {
                Self::Retrying(stage)
            }
            _ => match stage {
                Stage::Source | Stage::Plan | Stage::Store => Self::Planning,
                Stage::Apply => Self::Applying,
            },
        }
    }

    /// Parses a phase from its string form.
    ///
    /// # Errors
    ///
    /// Returns an error if the string names no phase.
    pub fn parse(s: &str) -> Result<Self, String> {
        if let Some(inner) = s.strip_prefix("Failed(").and_then(|r| r.strip_suffix(')')) {
            return Stage::parse(inner).map(Self::Failed);
        }
        if let Some(inner) = s.strip_prefix("Retrying(").and_then(|r| r.strip_suffix(')')) {
            return Stage::parse(inner).map(Self::Retrying);
        }

        match s {
            "Pending" => Ok(Self::Pending),
            "SourceNotReady" => Ok(Self::SourceNotReady),
            "Planning" => Ok(Self::Planning),
            "NoChanges" => Ok(Self::NoChanges),
            "AwaitingApproval" => Ok(Self::AwaitingApproval),
            "Applying" => Ok(Self::Applying),
            "Applied" => Ok(Self::Applied),
            "Superseded" => Ok(Self::Superseded),
            _ => Err(format!("Unknown phase: {s}")),
        }
    }
}

impl Stage {
    fn parse(s: &str) -> Result<Self, String> {
        match s {
            "Source" => Ok(Self::Source),
            "Plan" => Ok(Self::Plan),
            "Apply" => Ok(Self::Apply),
            "Store" => Ok(Self::Store),
            _ => Err(format!("Unknown stage: {s}")),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Source => "Source",
            Self::Plan => "Plan",
            Self::Apply => "Apply",
            Self::Store => "Store",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::SourceNotReady => write!(f, "SourceNotReady"),
            Self::Planning => write!(f, "Planning"),
            Self::NoChanges => write!(f, "NoChanges"),
            Self::AwaitingApproval => write!(f, "AwaitingApproval"),
            Self::Applying => write!(f, "Applying"),
            Self::Applied => write!(f, "Applied"),
            Self::Superseded => write!(f, "Superseded"),
            Self::Failed(stage) => write!(f, "Failed({stage})"),
            Self::Retrying(stage) => write!(f, "Retrying({stage})"),
        }
    }
}

impl TryFrom<String> for ReconcilePhase {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ReconcilePhase> for String {
    fn from(phase: ReconcilePhase) -> Self {
        phase.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_form() {
        for phase in [
            ReconcilePhase::Pending,
            ReconcilePhase::AwaitingApproval,
            ReconcilePhase::Failed(Stage::Plan),
            ReconcilePhase::Retrying(Stage::Apply),
        ] {
            assert_eq!(ReconcilePhase::parse(&phase.to_string()), Ok(phase));
        }
        assert!(ReconcilePhase::parse("Failed(Nowhere)").is_err());
        assert!(ReconcilePhase::parse("Done").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&ReconcilePhase::Failed(Stage::Apply)).expect("serialize");
        assert_eq!(json, "\"Failed(Apply)\"");
        let phase: ReconcilePhase = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(phase, ReconcilePhase::Failed(Stage::Apply));
    }

    #[test]
    fn test_entering_after_failure_is_retry() {
        assert_eq!(
            ReconcilePhase::Failed(Stage::Apply).entering(Stage::Apply),
            ReconcilePhase::Retrying(Stage::Apply)
        );
        assert_eq!(
            ReconcilePhase::Failed(Stage::Plan).entering(Stage::Apply),
            ReconcilePhase::Applying
        );
        assert_eq!(
            ReconcilePhase::SourceNotReady.entering(Stage::Plan),
            ReconcilePhase::Planning
        );
    }
}
