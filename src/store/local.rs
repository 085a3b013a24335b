//! Local file-based blob storage backend.
//!
//! Each blob is one file at `<root>/<namespace>/<name>`: a single line of
//! JSON labels, a newline, then the raw data. Writes go through a temporary
//! file that is synced and renamed into place, so labels and data always
//! change together.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::{ReconcilerError, Result, StoreError};

use super::blob::{BlobKey, BlobStore, Labels, PutOutcome, StoredBlob};

/// Suffix of in-progress writes.
const TEMP_SUFFIX: &str = ".tmp";

/// Local file-based blob store.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    /// Base directory for blobs.
    base_dir: PathBuf,
}

impl LocalBlobStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn blob_path(&self, key: &BlobKey) -> PathBuf {
        self.base_dir.join(&key.namespace).join(&key.name)
    }

    /// Ensures the namespace directory exists.
    async fn ensure_dir(&self, key: &BlobKey) -> Result<()> {
        let dir = self.base_dir.join(&key.namespace);
        fs::create_dir_all(&dir).await.map_err(|e| {
            ReconcilerError::Store(StoreError::io(format!(
                "Failed to create store directory {}: {e}",
                dir.display()
            )))
        })
    }

    /// Writes a file atomically through a uniquely named temporary sibling.
    async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!("{file_name}.{}{TEMP_SUFFIX}", Uuid::new_v4()));

        let io_err = |what: &str, e: std::io::Error| {
            ReconcilerError::Store(StoreError::io(format!(
                "Failed to {what} {}: {e}",
                temp_path.display()
            )))
        };

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| io_err("create", e))?;
        file.write_all(content)
            .await
            .map_err(|e| io_err("write", e))?;
        file.sync_all().await.map_err(|e| io_err("sync", e))?;
        drop(file);

        fs::rename(&temp_path, path).await.map_err(|e| {
            ReconcilerError::Store(StoreError::io(format!(
                "Failed to rename into {}: {e}",
                path.display()
            )))
        })
    }

    async fn read(&self, key: &BlobKey) -> Result<Option<StoredBlob>> {
        let content = match fs::read(self.blob_path(key)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(format!("Failed to read {key}: {e}")).into()),
        };
        decode(key, &content).map(Some)
    }

    async fn write(&self, key: &BlobKey, data: &[u8], labels: &Labels) -> Result<()> {
        self.ensure_dir(key).await?;
        Self::write_atomic(&self.blob_path(key), &encode(key, data, labels)?).await
    }
}

fn encode(key: &BlobKey, data: &[u8], labels: &Labels) -> Result<Vec<u8>> {
    let mut content = serde_json::to_vec(labels).map_err(|e| {
        StoreError::serialization(format!("Failed to serialize labels of {key}: {e}"))
    })?;
    content.push(b'\n');
    content.extend_from_slice(data);
    Ok(content)
}

fn decode(key: &BlobKey, content: &[u8]) -> Result<StoredBlob> {
    let split = content
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| StoreError::corrupted(format!("Missing label header in {key}")))?;
    let labels = serde_json::from_slice(&content[..split]).map_err(|e| {
        StoreError::corrupted(format!("Failed to parse labels of {key}: {e}"))
    })?;
    Ok(StoredBlob {
        data: content[split + 1..].to_vec(),
        labels,
    })
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &BlobKey, data: &[u8], labels: &Labels) -> Result<PutOutcome> {
        if let Some(existing) = self.read(key).await? {
            return if existing.data == data {
                debug!("Identical blob already stored at {key}");
                Ok(PutOutcome::Unchanged)
            } else {
                Err(StoreError::conflict(key.to_string()).into())
            };
        }

        self.write(key, data, labels).await?;
        debug!("Created blob {key} ({} bytes)", data.len());
        Ok(PutOutcome::Created)
    }

    async fn replace(&self, key: &BlobKey, data: &[u8], labels: &Labels) -> Result<()> {
        self.write(key, data, labels).await?;
        debug!("Replaced blob {key} ({} bytes)", data.len());
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> Result<StoredBlob> {
        self.read(key)
            .await?
            .ok_or_else(|| StoreError::not_found(key.to_string()).into())
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        Ok(fs::try_exists(self.blob_path(key)).await.unwrap_or(false))
    }

    async fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<BlobKey>> {
        let dir = self.base_dir.join(namespace);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StoreError::io(format!("Failed to list {}: {e}", dir.display())).into());
            }
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            if name.starts_with(prefix) {
                keys.push(BlobKey::new(namespace, name));
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        let path = self.blob_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(format!("Failed to delete {}: {e}", path.display())).into()),
        }
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
