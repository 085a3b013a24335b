//! Source artifacts and the provider interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::Result;
use crate::resource::SourceReference;

/// Where an artifact tarball can be read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactLocation {
    /// A local file.
    Path(PathBuf),
    /// A remote URL.
    Url(String),
}

/// An immutable, revisioned source artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceArtifact {
    /// Revision string, e.g. `main/3f2a...`.
    pub revision: String,
    /// Hex SHA-256 of the tarball.
    pub checksum: String,
    /// Tarball location.
    pub location: ArtifactLocation,
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Url(url) => write!(f, "{url}"),
        }
    }
}

/// Supplies source artifacts for references.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Gets the current artifact of a source.
    ///
    /// Returns `None` while the source has no ready artifact.
    async fn artifact(
        &self,
        reference: &SourceReference,
        default_namespace: &str,
    ) -> Result<Option<SourceArtifact>>;

    /// Returns a local path holding the artifact tarball, fetching it if
    /// needed.
    async fn local_path(&self, artifact: &SourceArtifact) -> Result<PathBuf>;
}
