//! In-memory source provider for tests and dry runs.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;

use crate::error::{Result, SourceError};
use crate::resource::SourceReference;

use super::artifact::{ArtifactLocation, SourceArtifact, SourceProvider};

/// Source provider whose artifacts are set programmatically.
///
/// Only local artifact paths are supported.
#[derive(Debug, Default)]
pub struct MemorySourceProvider {
    artifacts: DashMap<(String, String, String), Option<SourceArtifact>>,
}

impl MemorySourceProvider {
    /// Creates a provider with no sources.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(reference: &SourceReference, default_namespace: &str) -> (String, String, String) {
        (
            reference.kind.clone(),
            reference.namespace_or(default_namespace).to_string(),
            reference.name.clone(),
        )
    }

    /// Publishes an artifact for a source.
    pub fn publish(&self, reference: &SourceReference, namespace: &str, artifact: SourceArtifact) {
        self.artifacts
            .insert(Self::slot(reference, namespace), Some(artifact));
    }

    /// Marks a source as not ready.
    pub fn set_not_ready(&self, reference: &SourceReference, namespace: &str) {
        self.artifacts.insert(Self::slot(reference, namespace), None);
    }
}

#[async_trait]
impl SourceProvider for MemorySourceProvider {
    async fn artifact(
        &self,
        reference: &SourceReference,
        default_namespace: &str,
    ) -> Result<Option<SourceArtifact>> {
        Ok(self
            .artifacts
            .get(&Self::slot(reference, default_namespace))
            .and_then(|entry| entry.value().clone()))
    }

    async fn local_path(&self, artifact: &SourceArtifact) -> Result<PathBuf> {
        match &artifact.location {
            ArtifactLocation::Path(path) => Ok(path.clone()),
            ArtifactLocation::Url(url) => Err(SourceError::fetch(format!(
                "remote artifact {url} is not supported by the in-memory provider"
            ))
            .into()),
        }
    }
}
