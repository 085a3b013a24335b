//! Directory-backed resource store.
//!
//! Manifests live at `<root>/<namespace>/<name>.yaml`. Status is kept in a
//! sibling `<name>.status.json` so spec edits never clobber it.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{ReconcilerError, ResourceError, Result};

use super::store::ResourceStore;
use super::types::{Resource, ResourceId, TerraformStatus};

/// Manifest file extension.
const MANIFEST_EXT: &str = "yaml";

/// Status file suffix.
const STATUS_SUFFIX: &str = ".status.json";

/// Directory-backed resource store.
#[derive(Debug, Clone)]
pub struct LocalResourceStore {
    /// Root directory holding one subdirectory per namespace.
    root: PathBuf,
}

impl LocalResourceStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest_path(&self, id: &ResourceId) -> PathBuf {
        self.root
            .join(&id.namespace)
            .join(format!("{}.{MANIFEST_EXT}", id.name))
    }

    fn status_path(&self, id: &ResourceId) -> PathBuf {
        self.root
            .join(&id.namespace)
            .join(format!("{}{STATUS_SUFFIX}", id.name))
    }

    /// Reads the raw manifest bytes.
    async fn read_manifest(&self, id: &ResourceId) -> Result<Vec<u8>> {
        let path = self.manifest_path(id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ResourceError::NotFound { id: id.to_string() }.into())
            }
            Err(e) => Err(storage_error(format!(
                "Failed to read manifest {}: {e}",
                path.display()
            ))),
        }
    }

    fn parse_manifest(id: &ResourceId, bytes: &[u8]) -> Result<Resource> {
        let resource: Resource = serde_yaml::from_slice(bytes).map_err(|e| {
            ReconcilerError::Resource(ResourceError::Corrupted {
                message: format!("Failed to parse manifest for {id}: {e}"),
            })
        })?;

        if resource.id() != *id {
            return Err(ResourceError::Corrupted {
                message: format!(
                    "Manifest at {id} declares identity {}",
                    resource.id()
                ),
            }
            .into());
        }

        Ok(resource)
    }

    /// Writes a file atomically through a temporary sibling.
    async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            storage_error(format!("Failed to create {}: {e}", temp_path.display()))
        })?;
        file.write_all(content)
            .await
            .map_err(|e| storage_error(format!("Failed to write {}: {e}", temp_path.display())))?;
        file.sync_all()
            .await
            .map_err(|e| storage_error(format!("Failed to sync {}: {e}", temp_path.display())))?;

        fs::rename(&temp_path, path)
            .await
            .map_err(|e| storage_error(format!("Failed to rename {}: {e}", path.display())))?;

        Ok(())
    }
}

fn storage_error(message: String) -> ReconcilerError {
    ReconcilerError::Resource(ResourceError::Storage { message })
}

fn spec_version(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes)).chars().take(16).collect()
}

#[async_trait]
impl ResourceStore for LocalResourceStore {
    async fn get(&self, id: &ResourceId) -> Result<Resource> {
        let bytes = self.read_manifest(id).await?;
        let mut resource = Self::parse_manifest(id, &bytes)?;

        let status_path = self.status_path(id);
        match fs::read(&status_path).await {
            Ok(content) => {
                resource.status = serde_json::from_slice(&content).map_err(|e| {
                    ReconcilerError::Resource(ResourceError::Corrupted {
                        message: format!("Failed to parse status for {id}: {e}"),
                    })
                })?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No status recorded yet for {id}");
            }
            Err(e) => {
                return Err(storage_error(format!(
                    "Failed to read status {}: {e}",
                    status_path.display()
                )));
            }
        }

        Ok(resource)
    }

    async fn list(&self) -> Result<BTreeMap<ResourceId, String>> {
        let mut resources = BTreeMap::new();

        let mut namespaces = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(resources),
            Err(e) => {
                return Err(storage_error(format!(
                    "Failed to list {}: {e}",
                    self.root.display()
                )));
            }
        };

        while let Some(ns_entry) = namespaces.next_entry().await? {
            if !ns_entry.file_type().await?.is_dir() {
                continue;
            }
            let namespace = ns_entry.file_name().to_string_lossy().to_string();

            let mut files = fs::read_dir(ns_entry.path()).await?;
            while let Some(entry) = files.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(MANIFEST_EXT) {
                    continue;
                }
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };

                match fs::read(&path).await {
                    Ok(bytes) => {
                        resources.insert(ResourceId::new(&namespace, name), spec_version(&bytes));
                    }
                    Err(e) => warn!("Skipping unreadable manifest {}: {e}", path.display()),
                }
            }
        }

        Ok(resources)
    }

    async fn update_status(&self, id: &ResourceId, status: &TerraformStatus) -> Result<()> {
        // The resource must still exist
        self.read_manifest(id).await?;

        let content = serde_json::to_vec_pretty(status).map_err(|e| {
            storage_error(format!("Failed to serialize status for {id}: {e}"))
        })?;

        Self::write_atomic(&self.status_path(id), &content).await?;
        debug!("Status written for {id}");
        Ok(())
    }

    async fn set_approval(&self, id: &ResourceId, value: &str) -> Result<()> {
        let bytes = self.read_manifest(id).await?;
        let mut resource = Self::parse_manifest(id, &bytes)?;
        resource.spec.approve_plan = value.to_string();

        // Status never lives in the manifest
        resource.status = TerraformStatus::default();
        let mut manifest = serde_yaml::to_value(&resource).map_err(|e| {
            storage_error(format!("Failed to serialize manifest for {id}: {e}"))
        })?;
        if let serde_yaml::Value::Mapping(map) = &mut manifest {
            map.remove("status");
        }
        let content = serde_yaml::to_string(&manifest).map_err(|e| {
            storage_error(format!("Failed to serialize manifest for {id}: {e}"))
        })?;

        Self::write_atomic(&self.manifest_path(id), content.as_bytes()).await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::condition::{reasons, Condition, ConditionType};
    use tempfile::TempDir;

    const MANIFEST: &str = r"
metadata:
  name: helloworld
  namespace: flux-system
spec:
  sourceRef:
    kind: GitRepository
    name: podinfo
  approvePlan: auto
";

    async fn create_test_store() -> (LocalResourceStore, TempDir, ResourceId) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let ns_dir = temp_dir.path().join("flux-system");
        fs::create_dir_all(&ns_dir).await.expect("create namespace dir");
        fs::write(ns_dir.join("helloworld.yaml"), MANIFEST)
            .await
            .expect("write manifest");
        let store = LocalResourceStore::new(temp_dir.path());
        (store, temp_dir, ResourceId::new("flux-system", "helloworld"))
    }

    #[tokio::test]
    async fn test_get_and_list() {
        let (store, _temp, id) = create_test_store().await;

        let resource = store.get(&id).await.expect("get resource");
        assert_eq!(resource.spec.approve_plan, "auto");

        let listed = store.list().await.expect("list resources");
        assert_eq!(listed.len(), 1);
        assert!(listed.contains_key(&id));
    }

    #[tokio::test]
    async fn test_missing_resource() {
        let (store, _temp, _id) = create_test_store().await;
        let missing = ResourceId::new("flux-system", "nope");

        let err = store.get(&missing).await.expect_err("should be missing");
        assert!(matches!(
            err,
            ReconcilerError::Resource(ResourceError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_survives_spec_edit() {
        let (store, _temp, id) = create_test_store().await;

        let mut status = TerraformStatus::default();
        status.set_condition(Condition::succeeded(
            ConditionType::Plan,
            reasons::PLANNED_SUCCEED,
            "Terraform Plan Generated Successfully",
        ));
        store.update_status(&id, &status).await.expect("write status");

        let before = store.list().await.expect("list")[&id].clone();
        store
            .set_approval(&id, "plan-main-0123456789")
            .await
            .expect("set approval");
        let after = store.list().await.expect("list")[&id].clone();
        assert_ne!(before, after);

        let resource = store.get(&id).await.expect("get resource");
        assert_eq!(resource.spec.approve_plan, "plan-main-0123456789");
        assert_eq!(resource.status, status);
    }
}
