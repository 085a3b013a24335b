//! File-based source index.
//!
//! The index is a YAML document listing the current artifact of every
//! source. It is re-read on each lookup so edits are picked up without a
//! restart. Artifacts given by URL are downloaded into a cache keyed by
//! checksum.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ConfigError, ReconcilerError, Result, SourceError};
use crate::resource::SourceReference;

use super::artifact::{ArtifactLocation, SourceArtifact, SourceProvider};

/// Source index document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceIndex {
    /// Indexed sources.
    #[serde(default)]
    pub sources: Vec<IndexEntry>,
}

/// One source in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Source kind.
    pub kind: String,
    /// Source namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Source name.
    pub name: String,
    /// Current revision.
    #[serde(default)]
    pub revision: Option<String>,
    /// Hex SHA-256 of the tarball.
    #[serde(default)]
    pub checksum: Option<String>,
    /// Local tarball path, relative to the index file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Remote tarball URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Whether the artifact is ready.
    #[serde(default = "default_ready")]
    pub ready: bool,
}

fn default_namespace() -> String {
    String::from("default")
}

const fn default_ready() -> bool {
    true
}

/// Source provider backed by an index file.
#[derive(Debug, Clone)]
pub struct IndexSourceProvider {
    /// Index file path.
    index_path: PathBuf,
    /// Download cache directory.
    cache_dir: PathBuf,
    /// HTTP client for remote artifacts.
    client: reqwest::Client,
}

impl IndexSourceProvider {
    /// Creates a provider reading the given index file.
    #[must_use]
    pub fn new(index_path: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_path: index_path.into(),
            cache_dir: cache_dir.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Loads and parses the index.
    ///
    /// A missing index is treated as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read or parsed.
    pub async fn load_index(&self) -> Result<SourceIndex> {
        let content = match fs::read_to_string(&self.index_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Source index {} not found", self.index_path.display());
                return Ok(SourceIndex::default());
            }
            Err(e) => return Err(e.into()),
        };

        serde_yaml::from_str(&content).map_err(|e| {
            ReconcilerError::Config(ConfigError::ParseError {
                message: format!("Invalid source index: {e}"),
                location: Some(self.index_path.display().to_string()),
            })
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        self.index_path
            .parent()
            .map_or_else(|| path.to_path_buf(), |dir| dir.join(path))
    }

    /// Downloads a remote artifact into the cache.
    async fn download(&self, url: &str, artifact: &SourceArtifact) -> Result<PathBuf> {
        let cached = self
            .cache_dir
            .join(format!("{}.tar.gz", artifact.checksum.to_ascii_lowercase()));
        if fs::try_exists(&cached).await.unwrap_or(false) {
            debug!("Using cached artifact {}", cached.display());
            return Ok(cached);
        }

        info!("Downloading artifact {url} for revision {}", artifact.revision);
        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| SourceError::fetch(format!("GET {url}: {e}")))?
            .bytes()
            .await
            .map_err(|e| SourceError::fetch(format!("Reading {url}: {e}")))?;

        let actual = hex::encode(Sha256::digest(&bytes));
        if !actual.eq_ignore_ascii_case(&artifact.checksum) {
            return Err(
                SourceError::integrity(&artifact.revision, &artifact.checksum, actual).into(),
            );
        }

        fs::create_dir_all(&self.cache_dir).await?;
        let temp = self.cache_dir.join(format!(".{}.download", Uuid::new_v4()));
        fs::write(&temp, &bytes).await?;
        fs::rename(&temp, &cached).await?;

        debug!("Cached {} bytes at {}", bytes.len(), cached.display());
        Ok(cached)
    }
}

#[async_trait]
impl SourceProvider for IndexSourceProvider {
    async fn artifact(
        &self,
        reference: &SourceReference,
        default_namespace: &str,
    ) -> Result<Option<SourceArtifact>> {
        let namespace = reference.namespace_or(default_namespace);
        let index = self.load_index().await?;

        let Some(entry) = index.sources.into_iter().find(|e| {
            e.kind == reference.kind && e.namespace == namespace && e.name == reference.name
        }) else {
            debug!("Source {reference} not in index");
            return Ok(None);
        };

        if !entry.ready {
            return Ok(None);
        }

        let location = match (entry.path, entry.url) {
            (Some(path), _) => ArtifactLocation::Path(self.resolve(&path)),
            (None, Some(url)) => ArtifactLocation::Url(url),
            (None, None) => return Ok(None),
        };

        Ok(entry
            .revision
            .zip(entry.checksum)
            .map(|(revision, checksum)| SourceArtifact {
                revision,
                checksum,
                location,
            }))
    }

    async fn local_path(&self, artifact: &SourceArtifact) -> Result<PathBuf> {
        match &artifact.location {
            ArtifactLocation::Path(path) => Ok(path.clone()),
            ArtifactLocation::Url(url) => self.download(url, artifact).await,
        }
    }
}
