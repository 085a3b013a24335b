//! Resource store trait definition.
//!
//! This module defines the interface to the cluster's resource storage.
//! The controller reads specs through it and writes only status.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::error::Result;

use super::types::{Resource, ResourceId, TerraformStatus};

/// Trait for resource storage backends.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Gets a resource, including its last written status.
    async fn get(&self, id: &ResourceId) -> Result<Resource>;

    /// Lists all resources with an opaque version of their spec.
    ///
    /// The version changes whenever the spec changes, which is how watchers
    /// detect approval and configuration edits.
    async fn list(&self) -> Result<BTreeMap<ResourceId, String>>;

    /// Replaces the status of a resource.
    async fn update_status(&self, id: &ResourceId, status: &TerraformStatus) -> Result<()>;

    /// Sets the declared approval value of a resource.
    async fn set_approval(&self, id: &ResourceId, value: &str) -> Result<()>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
