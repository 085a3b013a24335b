//! Plan store: immutable plan blobs keyed by fingerprint.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{ReconcilerError, Result, StoreError};
use crate::planner::{PlanArtifact, PlanMetadata};
use crate::resource::ResourceId;

use super::blob::{BlobKey, BlobStore, Labels, PutOutcome};
use super::keys::{
    plan_key, plan_prefix, LABEL_CREATED_AT, LABEL_HAS_CHANGES, LABEL_REVISION, LABEL_SAVED_PLAN,
};

/// Plan store.
#[derive(Clone)]
pub struct PlanStore {
    blobs: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for PlanStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanStore")
            .field("backend", &self.blobs.backend_type())
            .finish()
    }
}

fn plan_labels(metadata: &PlanMetadata) -> Labels {
    Labels::from([
        (LABEL_SAVED_PLAN.to_string(), metadata.fingerprint.clone()),
        (LABEL_REVISION.to_string(), metadata.revision.clone()),
        (LABEL_HAS_CHANGES.to_string(), metadata.has_changes.to_string()),
        (LABEL_CREATED_AT.to_string(), metadata.created_at.to_rfc3339()),
    ])
}

fn metadata_from_labels(key: &BlobKey, labels: &Labels) -> Result<PlanMetadata> {
    let label = |name: &str| {
        labels.get(name).cloned().ok_or_else(|| {
            ReconcilerError::Store(StoreError::corrupted(format!(
                "Plan blob {key} is missing label {name}"
            )))
        })
    };

    let has_changes = label(LABEL_HAS_CHANGES)?.parse::<bool>().map_err(|e| {
        StoreError::corrupted(format!("Invalid {LABEL_HAS_CHANGES} on {key}: {e}"))
    })?;
    let created_at = DateTime::parse_from_rfc3339(&label(LABEL_CREATED_AT)?)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupted(format!("Invalid {LABEL_CREATED_AT} on {key}: {e}")))?;

    Ok(PlanMetadata {
        fingerprint: label(LABEL_SAVED_PLAN)?,
        revision: label(LABEL_REVISION)?,
        has_changes,
        created_at,
    })
}

impl PlanStore {
    /// Creates a plan store over a blob backend.
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Stores a plan.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a different plan is stored under the same
    /// fingerprint.
    pub async fn put(
        &self,
        id: &ResourceId,
        workspace: &str,
        artifact: &PlanArtifact,
    ) -> Result<PutOutcome> {
        let key = plan_key(id, workspace, artifact.fingerprint());
        let result = self
            .blobs
            .put(&key, &artifact.plan, &plan_labels(&artifact.metadata))
            .await;

        match &result {
            Ok(outcome) => debug!("Plan {key}: {outcome:?}"),
            Err(ReconcilerError::Store(StoreError::Conflict { .. })) => {
                error!("Plan blob {key} already holds different content");
            }
            Err(_) => {}
        }
        result
    }

    /// Gets the plan stored for a fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the blob is corrupted.
    pub async fn get(
        &self,
        id: &ResourceId,
        workspace: &str,
        fingerprint: &str,
    ) -> Result<Option<PlanArtifact>> {
        let key = plan_key(id, workspace, fingerprint);
        match self.blobs.get(&key).await {
            Ok(blob) => Ok(Some(PlanArtifact {
                metadata: metadata_from_labels(&key, &blob.labels)?,
                plan: blob.data,
                diagnostics: String::new(),
            })),
            Err(ReconcilerError::Store(StoreError::NotFound { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Lists metadata of every stored plan of a resource, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn list(&self, id: &ResourceId, workspace: &str) -> Result<Vec<PlanMetadata>> {
        let keys = self
            .blobs
            .list(&id.namespace, &plan_prefix(id, workspace))
            .await?;

        let mut plans = Vec::with_capacity(keys.len());
        for key in keys {
            let blob = self.blobs.get(&key).await?;
            plans.push(metadata_from_labels(&key, &blob.labels)?);
        }
        plans.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(plans)
    }
}
