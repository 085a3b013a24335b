//! In-memory blob store for tests and dry runs.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{Result, StoreError};

use super::blob::{BlobKey, BlobStore, Labels, PutOutcome, StoredBlob};

/// In-memory blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<BlobKey, StoredBlob>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &BlobKey, data: &[u8], labels: &Labels) -> Result<PutOutcome> {
        match self.blobs.entry(key.clone()) {
            Entry::Occupied(existing) => {
                if existing.get().data == data {
                    Ok(PutOutcome::Unchanged)
                } else {
                    Err(StoreError::conflict(key.to_string()).into())
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(StoredBlob {
                    data: data.to_vec(),
                    labels: labels.clone(),
                });
                Ok(PutOutcome::Created)
            }
        }
    }

    async fn replace(&self, key: &BlobKey, data: &[u8], labels: &Labels) -> Result<()> {
        self.blobs.insert(
            key.clone(),
            StoredBlob {
                data: data.to_vec(),
                labels: labels.clone(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> Result<StoredBlob> {
        self.blobs
            .get(key)
            .map(|blob| blob.clone())
            .ok_or_else(|| StoreError::not_found(key.to_string()).into())
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        Ok(self.blobs.contains_key(key))
    }

    async fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<BlobKey>> {
        let mut keys: Vec<BlobKey> = self
            .blobs
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.namespace == namespace && key.name.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        self.blobs.remove(key);
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcilerError;

    #[tokio::test]
    async fn test_put_is_create_or_identical() {
        let store = MemoryBlobStore::new();
        let key = BlobKey::new("default", "tfplan.default.hello.plan-main-0123456789");
        let labels = Labels::new();

        assert_eq!(
            store.put(&key, b"plan", &labels).await.expect("create"),
            PutOutcome::Created
        );
        assert_eq!(
            store.put(&key, b"plan", &labels).await.expect("identical"),
            PutOutcome::Unchanged
        );

        let err = store
            .put(&key, b"other", &labels)
            .await
            .expect_err("different content conflicts");
        assert!(matches!(
            err,
            ReconcilerError::Store(StoreError::Conflict { .. })
        ));
        assert_eq!(store.get(&key).await.expect("get").data, b"plan");
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = MemoryBlobStore::new();
        let labels = Labels::new();
        for name in ["tfplan.default.a.1", "tfplan.default.a.2", "tfstate.default.a"] {
            store
                .replace(&BlobKey::new("ns", name), b"x", &labels)
                .await
                .expect("replace");
        }
        store
            .replace(&BlobKey::new("other", "tfplan.default.a.3"), b"x", &labels)
            .await
            .expect("replace");

        let keys = store.list("ns", "tfplan.default.a.").await.expect("list");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].name, "tfplan.default.a.1");
    }
}
