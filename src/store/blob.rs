//! Blob store trait definition.
//!
//! This module defines the common interface for plan, state and ledger
//! storage backends: named, labeled, opaque blobs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;

/// Labels attached to a blob.
pub type Labels = BTreeMap<String, String>;

/// Name of a blob within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey {
    /// Namespace of the owning resource.
    pub namespace: String,
    /// Blob name.
    pub name: String,
}

/// A blob with its labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Opaque content.
    pub data: Vec<u8>,
    /// Labels.
    pub labels: Labels,
}

/// Result of a create-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The blob was created.
    Created,
    /// An identical blob was already stored.
    Unchanged,
}

impl BlobKey {
    /// Creates a new key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Trait for blob storage backends.
///
/// Keys of different resources never contend: backends take no global lock.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Creates a blob.
    ///
    /// Storing content identical to the existing blob is a no-op; storing
    /// different content under an existing key fails with `Conflict`.
    async fn put(&self, key: &BlobKey, data: &[u8], labels: &Labels) -> Result<PutOutcome>;

    /// Atomically replaces a blob. Readers see either the old or the new one.
    async fn replace(&self, key: &BlobKey, data: &[u8], labels: &Labels) -> Result<()>;

    /// Gets a blob, failing with `NotFound` if absent.
    async fn get(&self, key: &BlobKey) -> Result<StoredBlob>;

    /// Checks if a blob exists.
    async fn exists(&self, key: &BlobKey) -> Result<bool>;

    /// Lists keys in a namespace whose name starts with `prefix`, sorted.
    async fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<BlobKey>>;

    /// Removes a blob. Removing a missing blob succeeds.
    async fn delete(&self, key: &BlobKey) -> Result<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
