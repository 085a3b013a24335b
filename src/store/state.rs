//! State, ledger and outputs stores: one mutable slot per resource.
//!
//! Every slot is written with the backend's atomic `replace`, so a reader
//! sees the previous value until the new one commits.

use std::sync::Arc;
use tracing::{debug, info};

use crate::approval::PlanLedger;
use crate::error::{ReconcilerError, Result, StoreError};
use crate::outputs::OutputSet;
use crate::resource::ResourceId;

use super::blob::{BlobKey, BlobStore, Labels, StoredBlob};
use super::keys::{ledger_key, state_key, LABEL_APPLIED_PLAN, LABEL_OUTPUT_NAMES};

/// Current state of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSnapshot {
    /// Opaque engine state.
    pub data: Vec<u8>,
    /// Fingerprint of the plan that produced this state.
    pub applied_plan: Option<String>,
}

async fn get_optional(blobs: &dyn BlobStore, key: &BlobKey) -> Result<Option<StoredBlob>> {
    match blobs.get(key).await {
        Ok(blob) => Ok(Some(blob)),
        Err(ReconcilerError::Store(StoreError::NotFound { .. })) => Ok(None),
        Err(e) => Err(e),
    }
}

/// State store.
#[derive(Clone)]
pub struct StateStore {
    blobs: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("backend", &self.blobs.backend_type())
            .finish()
    }
}

impl StateStore {
    /// Creates a state store over a blob backend.
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Loads the current state. Absent state is `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn load(&self, id: &ResourceId, workspace: &str) -> Result<Option<StateSnapshot>> {
        let key = state_key(id, workspace);
        let snapshot = get_optional(self.blobs.as_ref(), &key)
            .await?
            .map(|blob| StateSnapshot {
                applied_plan: blob.labels.get(LABEL_APPLIED_PLAN).cloned(),
                data: blob.data,
            });

        if snapshot.is_none() {
            debug!("No state stored at {key}");
        }
        Ok(snapshot)
    }

    /// Replaces the state with the result of applying `applied_plan`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn save(
        &self,
        id: &ResourceId,
        workspace: &str,
        data: &[u8],
        applied_plan: &str,
    ) -> Result<()> {
        let key = state_key(id, workspace);
        let labels = Labels::from([(LABEL_APPLIED_PLAN.to_string(), applied_plan.to_string())]);
        self.blobs.replace(&key, data, &labels).await?;
        info!("State {key} replaced by {applied_plan}");
        Ok(())
    }
}

/// Plan ledger store.
#[derive(Clone)]
pub struct LedgerStore {
    blobs: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("backend", &self.blobs.backend_type())
            .finish()
    }
}

impl LedgerStore {
    /// Creates a ledger store over a blob backend.
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Loads the ledger, empty if none was saved yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the ledger is corrupted.
    pub async fn load(&self, id: &ResourceId, workspace: &str) -> Result<PlanLedger> {
        let key = ledger_key(id, workspace);
        match get_optional(self.blobs.as_ref(), &key).await? {
            Some(blob) => serde_json::from_slice(&blob.data).map_err(|e| {
                ReconcilerError::Store(StoreError::corrupted(format!(
                    "Failed to parse ledger {key}: {e}"
                )))
            }),
            None => Ok(PlanLedger::new()),
        }
    }

    /// Saves the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn save(&self, id: &ResourceId, workspace: &str, ledger: &PlanLedger) -> Result<()> {
        let key = ledger_key(id, workspace);
        let content = serde_json::to_vec_pretty(ledger).map_err(|e| {
            StoreError::serialization(format!("Failed to serialize ledger {key}: {e}"))
        })?;
        self.blobs.replace(&key, &content, &Labels::new()).await?;
        debug!("Ledger {key} saved ({} entries)", ledger.entries.len());
        Ok(())
    }
}

/// Outputs store.
#[derive(Clone)]
pub struct OutputStore {
    blobs: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for OutputStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStore")
            .field("backend", &self.blobs.backend_type())
            .finish()
    }
}

impl OutputStore {
    /// Creates an outputs store over a blob backend.
    #[must_use]
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Writes output values.
    ///
    /// `names` lists every output of the apply, which can be more than the
    /// values written when the target selects a subset.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn write(
        &self,
        key: &BlobKey,
        outputs: &OutputSet,
        names: &[String],
        applied_plan: &str,
    ) -> Result<()> {
        let content = serde_json::to_vec_pretty(outputs).map_err(|e| {
            StoreError::serialization(format!("Failed to serialize outputs {key}: {e}"))
        })?;
        let labels = Labels::from([
            (LABEL_APPLIED_PLAN.to_string(), applied_plan.to_string()),
            (LABEL_OUTPUT_NAMES.to_string(), names.join(",")),
        ]);
        self.blobs.replace(key, &content, &labels).await?;
        debug!("Wrote {} outputs to {key}", outputs.len());
        Ok(())
    }

    /// Reads output values. Absent outputs are `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the blob is corrupted.
    pub async fn read(&self, key: &BlobKey) -> Result<Option<OutputSet>> {
        get_optional(self.blobs.as_ref(), key)
            .await?
            .map(|blob| {
                serde_json::from_slice(&blob.data).map_err(|e| {
                    ReconcilerError::Store(StoreError::corrupted(format!(
                        "Failed to parse outputs {key}: {e}"
                    )))
                })
            })
            .transpose()
    }

    /// Reads the output names recorded with the values. Absent outputs are
    /// `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the blob is corrupted.
    pub async fn names(&self, key: &BlobKey) -> Result<Option<Vec<String>>> {
        let Some(blob) = get_optional(self.blobs.as_ref(), key).await? else {
            return Ok(None);
        };

        if let Some(names) = blob.labels.get(LABEL_OUTPUT_NAMES) {
            return Ok(Some(
                names
                    .split(',')
                    .filter(|n| !n.is_empty())
                    .map(String::from)
                    .collect(),
            ));
        }

        let outputs: OutputSet = serde_json::from_slice(&blob.data).map_err(|e| {
            StoreError::corrupted(format!("Failed to parse outputs {key}: {e}"))
        })?;
        Ok(Some(outputs.names()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::OutputExtractor;
    use crate::store::MemoryBlobStore;

    #[tokio::test]
    async fn test_state_absent_then_replaced() {
        let store = StateStore::new(Arc::new(MemoryBlobStore::new()));
        let id = ResourceId::new("flux-system", "helloworld");

        assert!(store.load(&id, "default").await.expect("load").is_none());

        store
            .save(&id, "default", b"state-1", "plan-r1-0123456789")
            .await
            .expect("save");
        store
            .save(&id, "default", b"state-2", "plan-r2-0123456789")
            .await
            .expect("save");

        let snapshot = store.load(&id, "default").await.expect("load").expect("present");
        assert_eq!(snapshot.data, b"state-2");
        assert_eq!(snapshot.applied_plan.as_deref(), Some("plan-r2-0123456789"));
    }

    #[tokio::test]
    async fn test_ledger_round_trip() {
        let store = LedgerStore::new(Arc::new(MemoryBlobStore::new()));
        let id = ResourceId::new("flux-system", "helloworld");

        let mut ledger = store.load(&id, "default").await.expect("load empty");
        assert!(ledger.entries.is_empty());

        ledger.record_plan("plan-r1-0123456789", "r1", true);
        store.save(&id, "default", &ledger).await.expect("save");
        assert_eq!(store.load(&id, "default").await.expect("load"), ledger);
    }

    #[tokio::test]
    async fn test_outputs_round_trip() {
        let store = OutputStore::new(Arc::new(MemoryBlobStore::new()));
        let key = BlobKey::new("flux-system", "tfoutputs.default.helloworld");
        let outputs = OutputExtractor::new()
            .extract(br#"{"hello_world": {"value": "hey", "type": "string", "sensitive": false}}"#)
            .expect("extract");

        assert!(store.read(&key).await.expect("read").is_none());
        assert!(store.names(&key).await.expect("names").is_none());
        store
            .write(&key, &outputs, &outputs.names(), "plan-r1-0123456789")
            .await
            .expect("write");
        assert_eq!(store.read(&key).await.expect("read"), Some(outputs));
    }

    #[tokio::test]
    async fn test_output_names_cover_unselected_outputs() {
        let store = OutputStore::new(Arc::new(MemoryBlobStore::new()));
        let key = BlobKey::new("flux-system", "helloworld-outputs");
        let outputs = OutputExtractor::new()
            .extract(
                br#"{"a": {"value": 1, "type": "number"}, "b": {"value": 2, "type": "number"}}"#,
            )
            .expect("extract");
        let selected = outputs.filtered(&[String::from("a")]);

        store
            .write(&key, &selected, &outputs.names(), "plan-r1-0123456789")
            .await
            .expect("write");
        assert_eq!(
            store.names(&key).await.expect("names"),
            Some(vec![String::from("a"), String::from("b")])
        );
        assert_eq!(store.read(&key).await.expect("read"), Some(selected));
    }
}
