//! Declared approval policy.

use std::fmt;

/// Declared value selecting automatic approval.
pub const AUTO_APPROVE: &str = "auto";

/// How plans of a resource get approved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Every plan with changes is approved as soon as it is stored.
    Auto,
    /// An operator approves a plan by declaring its fingerprint.
    Manual {
        /// Fingerprint currently declared, if any.
        approved: Option<String>,
    },
}

impl ApprovalPolicy {
    /// Interprets a declared `approvePlan` value.
    ///
    /// `auto` selects automatic approval, an empty value waits for an
    /// operator, and anything else names the approved fingerprint.
    #[must_use]
    pub fn from_declared(value: &str) -> Self {
        match value.trim() {
            AUTO_APPROVE => Self::Auto,
            "" => Self::Manual { approved: None },
            fingerprint => Self::Manual {
                approved: Some(fingerprint.to_string()),
            },
        }
    }

    /// Returns true if this policy approves the given fingerprint.
    #[must_use]
    pub fn approves(&self, fingerprint: &str) -> bool {
        match self {
            Self::Auto => true,
            Self::Manual { approved } => approved.as_deref() == Some(fingerprint),
        }
    }

    /// Returns true for automatic approval.
    #[must_use]
    pub const fn is_auto(&self) -> bool {
        matches!(self, Self::Auto)
    }
}

impl fmt::Display for ApprovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Manual { approved: None } => write!(f, "manual"),
            Self::Manual {
                approved: Some(fingerprint),
            } => write!(f, "manual ({fingerprint})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_declared() {
        assert_eq!(ApprovalPolicy::from_declared("auto"), ApprovalPolicy::Auto);
        assert_eq!(
            ApprovalPolicy::from_declared(""),
            ApprovalPolicy::Manual { approved: None }
        );
        assert_eq!(
            ApprovalPolicy::from_declared("plan-main-0123456789"),
            ApprovalPolicy::Manual {
                approved: Some(String::from("plan-main-0123456789"))
            }
        );
    }

    #[test]
    fn test_approves() {
        assert!(ApprovalPolicy::Auto.approves("plan-main-0123456789"));
        assert!(!ApprovalPolicy::from_declared("").approves("plan-main-0123456789"));
        assert!(ApprovalPolicy::from_declared("plan-main-0123456789").approves("plan-main-0123456789"));
        assert!(!ApprovalPolicy::from_declared("plan-main-0123456789").approves("plan-main-9876543210"));
    }
}
