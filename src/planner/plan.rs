//! Plan artifact types.
//!
//! A plan artifact is the engine's binary plan output plus the metadata
//! needed to approve and apply it later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata of a stored plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetadata {
    /// Plan fingerprint.
    pub fingerprint: String,
    /// Source revision the plan was generated from.
    pub revision: String,
    /// Whether applying the plan would change anything.
    pub has_changes: bool,
    /// When the plan was generated.
    pub created_at: DateTime<Utc>,
}

/// A generated plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanArtifact {
    /// Plan metadata.
    pub metadata: PlanMetadata,
    /// Opaque engine plan bytes.
    pub plan: Vec<u8>,
    /// Engine diagnostics captured while planning.
    pub diagnostics: String,
}

impl PlanArtifact {
    /// Creates an artifact stamped with the current time.
    #[must_use]
    pub fn new(
        fingerprint: impl Into<String>,
        revision: impl Into<String>,
        has_changes: bool,
        plan: Vec<u8>,
    ) -> Self {
        Self {
            metadata: PlanMetadata {
                fingerprint: fingerprint.into(),
                revision: revision.into(),
                has_changes,
                created_at: Utc::now(),
            },
            plan,
            diagnostics: String::new(),
        }
    }

    /// Attaches engine diagnostics.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: impl Into<String>) -> Self {
        self.diagnostics = diagnostics.into();
        self
    }

    /// Gets the fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.metadata.fingerprint
    }

    /// Gets the revision.
    #[must_use]
    pub fn revision(&self) -> &str {
        &self.metadata.revision
    }

    /// Returns whether applying the plan would change anything.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.metadata.has_changes
    }
}

impl fmt::Display for PlanMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (revision {}, {})",
            self.fingerprint,
            self.revision,
            if self.has_changes {
                "changes"
            } else {
                "no changes"
            }
        )
    }
}
