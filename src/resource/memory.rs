//! In-memory resource store for tests and dry runs.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;

use crate::error::{ResourceError, Result};

use super::store::ResourceStore;
use super::types::{Resource, ResourceId, TerraformStatus};

/// In-memory resource store.
///
/// Spec edits bump a per-resource version; status writes do not.
#[derive(Debug, Default)]
pub struct MemoryResourceStore {
    resources: DashMap<ResourceId, (Resource, u64)>,
}

impl MemoryResourceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a resource's spec, keeping any existing status.
    pub fn apply(&self, resource: Resource) {
        let id = resource.id();
        self.resources
            .entry(id)
            .and_modify(|(existing, version)| {
                existing.spec = resource.spec.clone();
                *version += 1;
            })
            .or_insert((resource, 1));
    }

    /// Removes a resource.
    pub fn remove(&self, id: &ResourceId) {
        self.resources.remove(id);
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn get(&self, id: &ResourceId) -> Result<Resource> {
        self.resources
            .get(id)
            .map(|entry| entry.0.clone())
            .ok_or_else(|| ResourceError::NotFound { id: id.to_string() }.into())
    }

    async fn list(&self) -> Result<BTreeMap<ResourceId, String>> {
        Ok(self
            .resources
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().1.to_string()))
            .collect())
    }

    async fn update_status(&self, id: &ResourceId, status: &TerraformStatus) -> Result<()> {
        let mut entry = self
            .resources
            .get_mut(id)
            .ok_or_else(|| ResourceError::NotFound { id: id.to_string() })?;
        entry.0.status = status.clone();
        Ok(())
    }

    async fn set_approval(&self, id: &ResourceId, value: &str) -> Result<()> {
        let mut entry = self
            .resources
            .get_mut(id)
            .ok_or_else(|| ResourceError::NotFound { id: id.to_string() })?;
        entry.0.spec.approve_plan = value.to_string();
        entry.1 += 1;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
