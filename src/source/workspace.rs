//! Workspace materialization.
//!
//! A workspace is the extracted artifact of one revision, scoped to one
//! resource. Extraction happens in a sibling staging directory that is
//! renamed into place once complete, and a marker file records the
//! checksum that was extracted so repeated calls reuse the directory.

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, SourceError};
use crate::resource::ResourceId;

use super::artifact::SourceArtifact;

/// Name of the file marking a completed extraction.
pub const COMPLETION_MARKER: &str = ".tf-reconciler-complete";

/// A materialized workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Root of the extracted artifact.
    pub root: PathBuf,
    /// Directory the engine runs in (`root` joined with the relative path).
    pub dir: PathBuf,
    /// Revision the workspace was extracted from.
    pub revision: String,
}

/// Extracts source artifacts into per-resource workspaces.
#[derive(Debug, Clone)]
pub struct WorkspaceMaterializer {
    root: PathBuf,
}

impl WorkspaceMaterializer {
    /// Creates a materializer rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every workspace of a resource.
    #[must_use]
    pub fn resource_dir(&self, id: &ResourceId) -> PathBuf {
        self.root.join(&id.namespace).join(&id.name)
    }

    /// Directory of the workspace for a revision.
    #[must_use]
    pub fn workspace_dir(&self, id: &ResourceId, revision: &str) -> PathBuf {
        self.resource_dir(id).join(sanitize_revision(revision))
    }

    /// Materializes an artifact and resolves `rel_path` inside it.
    ///
    /// # Errors
    ///
    /// Returns an integrity error if the archive checksum does not match,
    /// an extraction error if the archive is unreadable, `PathEscapes` if
    /// an entry or `rel_path` leaves the workspace, and `PathNotFound` if
    /// `rel_path` does not exist in the artifact.
    pub async fn materialize(
        &self,
        id: &ResourceId,
        artifact: &SourceArtifact,
        archive: &Path,
        rel_path: &str,
    ) -> Result<Workspace> {
        let dir = self.workspace_dir(id, &artifact.revision);
        let marker = dir.join(COMPLETION_MARKER);

        if let Ok(recorded) = fs::read_to_string(&marker).await
            && recorded.trim().eq_ignore_ascii_case(&artifact.checksum)
        {
            debug!("Reusing workspace {} for {id}", dir.display());
            return resolve(dir, &artifact.revision, rel_path).await;
        }
        if fs::try_exists(&dir).await.unwrap_or(false) {
            warn!("Workspace {} is stale or incomplete, re-extracting", dir.display());
            fs::remove_dir_all(&dir).await?;
        }

        let data = fs::read(archive).await.map_err(|e| {
            SourceError::extraction(format!("Failed to read {}: {e}", archive.display()))
        })?;

        let actual = hex::encode(Sha256::digest(&data));
        if !actual.eq_ignore_ascii_case(&artifact.checksum) {
            return Err(SourceError::integrity(&artifact.revision, &artifact.checksum, actual).into());
        }

        let parent = self.resource_dir(id);
        fs::create_dir_all(&parent).await?;
        let staging = parent.join(format!(
            ".{}.partial-{}",
            sanitize_revision(&artifact.revision),
            Uuid::new_v4()
        ));
        fs::create_dir_all(&staging).await?;

        let target = staging.clone();
        let unpacked = tokio::task::spawn_blocking(move || unpack_confined(&data, &target))
            .await
            .map_err(|e| SourceError::extraction(format!("Extraction task failed: {e}")))?;

        if let Err(e) = unpacked {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e.into());
        }

        fs::write(staging.join(COMPLETION_MARKER), &artifact.checksum).await?;
        fs::rename(&staging, &dir).await?;

        info!("Materialized {id} revision {} at {}", artifact.revision, dir.display());
        resolve(dir, &artifact.revision, rel_path).await
    }

    /// Removes every workspace of a resource except the one for
    /// `keep_revision`. Returns the number of directories removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource directory cannot be listed or an
    /// entry cannot be removed.
    pub async fn reclaim_stale(&self, id: &ResourceId, keep_revision: &str) -> Result<usize> {
        let parent = self.resource_dir(id);
        let keep = sanitize_revision(keep_revision);

        let mut entries = match fs::read_dir(&parent).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy() == keep {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(entry.path()).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Reclaimed {removed} stale workspaces of {id}");
        }
        Ok(removed)
    }
}

/// Maps a revision to a single safe directory name.
fn sanitize_revision(revision: &str) -> String {
    let sanitized: String = revision
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if sanitized.is_empty() {
        String::from("_")
    } else {
        sanitized
    }
}

/// Checks that a relative path stays inside its root.
fn confined(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

async fn resolve(root: PathBuf, revision: &str, rel_path: &str) -> Result<Workspace> {
    let rel = Path::new(rel_path);
    if !confined(rel) {
        return Err(SourceError::PathEscapes {
            path: rel_path.to_string(),
        }
        .into());
    }

    let dir = root.join(rel);
    if !fs::try_exists(&dir).await.unwrap_or(false) {
        return Err(SourceError::PathNotFound {
            path: rel_path.to_string(),
        }
        .into());
    }

    Ok(Workspace {
        root,
        dir,
        revision: revision.to_string(),
    })
}

/// Unpacks a gzip tarball, refusing entries and link targets that leave
/// `dest`.
fn unpack_confined(data: &[u8], dest: &Path) -> std::result::Result<(), SourceError> {
    let mut archive = tar::Archive::new(GzDecoder::new(data));
    let entries = archive
        .entries()
        .map_err(|e| SourceError::extraction(format!("Invalid archive: {e}")))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| SourceError::extraction(format!("Invalid archive entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| SourceError::extraction(format!("Invalid entry path: {e}")))?
            .into_owned();

        if !confined(&path) {
            return Err(SourceError::PathEscapes {
                path: path.display().to_string(),
            });
        }

        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            let target = entry
                .link_name()
                .map_err(|e| SourceError::extraction(format!("Invalid link target: {e}")))?
                .map(std::borrow::Cow::into_owned)
                .unwrap_or_default();
            if !confined(&target) {
                return Err(SourceError::PathEscapes {
                    path: format!("{} -> {}", path.display(), target.display()),
                });
            }
        }

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| SourceError::extraction(format!("Failed to unpack {}: {e}", path.display())))?;
        if !unpacked {
            return Err(SourceError::PathEscapes {
                path: path.display().to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcilerError;
    use crate::source::ArtifactLocation;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .expect("append entry");
        }
        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip")
    }

    fn write_artifact(dir: &TempDir, revision: &str, data: &[u8]) -> (SourceArtifact, PathBuf) {
        let path = dir.path().join(format!("{}.tar.gz", sanitize_revision(revision)));
        std::fs::write(&path, data).expect("write archive");
        let artifact = SourceArtifact {
            revision: revision.to_string(),
            checksum: hex::encode(Sha256::digest(data)),
            location: ArtifactLocation::Path(path.clone()),
        };
        (artifact, path)
    }

    fn id() -> ResourceId {
        ResourceId::new("flux-system", "helloworld")
    }

    #[tokio::test]
    async fn test_materialize_and_reuse() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let materializer = WorkspaceMaterializer::new(temp_dir.path().join("ws"));
        let data = tarball(&[
            ("main.tf", "output \"hello_world\" { value = \"hey\" }"),
            ("modules/net/main.tf", "# net"),
        ]);
        let (artifact, archive) = write_artifact(&temp_dir, "main/b8e362c206", &data);

        let workspace = materializer
            .materialize(&id(), &artifact, &archive, ".")
            .await
            .expect("materialize");
        assert!(workspace.dir.join("main.tf").exists());
        assert_eq!(workspace.revision, "main/b8e362c206");
        assert_eq!(
            workspace.root,
            materializer.workspace_dir(&id(), "main/b8e362c206")
        );

        // The archive is not needed once the marker is written
        std::fs::remove_file(&archive).expect("remove archive");
        let again = materializer
            .materialize(&id(), &artifact, &archive, "modules/net")
            .await
            .expect("reuse");
        assert!(again.dir.ends_with("modules/net"));
        assert_eq!(again.root, workspace.root);
    }

    #[tokio::test]
    async fn test_checksum_mismatch() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let materializer = WorkspaceMaterializer::new(temp_dir.path().join("ws"));
        let data = tarball(&[("main.tf", "")]);
        let (mut artifact, archive) = write_artifact(&temp_dir, "main/abc", &data);
        artifact.checksum = String::from("deadbeef");

        let err = materializer
            .materialize(&id(), &artifact, &archive, ".")
            .await
            .expect_err("mismatch");
        assert!(matches!(
            err,
            ReconcilerError::Source(SourceError::IntegrityMismatch { .. })
        ));
        assert!(!materializer.workspace_dir(&id(), "main/abc").exists());
    }

    #[tokio::test]
    async fn test_missing_and_escaping_paths() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let materializer = WorkspaceMaterializer::new(temp_dir.path().join("ws"));
        let data = tarball(&[("main.tf", "")]);
        let (artifact, archive) = write_artifact(&temp_dir, "main/abc", &data);

        let err = materializer
            .materialize(&id(), &artifact, &archive, "does/not/exist")
            .await
            .expect_err("missing path");
        assert!(matches!(
            err,
            ReconcilerError::Source(SourceError::PathNotFound { .. })
        ));

        let err = materializer
            .materialize(&id(), &artifact, &archive, "../other")
            .await
            .expect_err("escaping path");
        assert!(matches!(
            err,
            ReconcilerError::Source(SourceError::PathEscapes { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejects_escaping_entry() {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        let name = b"../evil.txt";
        header.as_gnu_mut().expect("gnu header").name[..name.len()].copy_from_slice(name);
        header.set_size(4);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, &b"evil"[..]).expect("append");
        let data = builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip");

        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let materializer = WorkspaceMaterializer::new(temp_dir.path().join("ws"));
        let (artifact, archive) = write_artifact(&temp_dir, "main/evil", &data);

        let err = materializer
            .materialize(&id(), &artifact, &archive, ".")
            .await
            .expect_err("escaping entry");
        assert!(matches!(
            err,
            ReconcilerError::Source(SourceError::PathEscapes { .. })
        ));
        assert!(!temp_dir.path().join("ws/flux-system/helloworld/evil.txt").exists());
        assert!(!materializer.workspace_dir(&id(), "main/evil").exists());
    }

    #[tokio::test]
    async fn test_reclaim_stale() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let materializer = WorkspaceMaterializer::new(temp_dir.path().join("ws"));

        for revision in ["main/r1", "main/r2"] {
            let data = tarball(&[("main.tf", revision)]);
            let (artifact, archive) = write_artifact(&temp_dir, revision, &data);
            materializer
                .materialize(&id(), &artifact, &archive, ".")
                .await
                .expect("materialize");
        }

        let removed = materializer
            .reclaim_stale(&id(), "main/r2")
            .await
            .expect("reclaim");
        assert_eq!(removed, 1);
        assert!(!materializer.workspace_dir(&id(), "main/r1").exists());
        assert!(materializer.workspace_dir(&id(), "main/r2").exists());

        let none = materializer
            .reclaim_stale(&ResourceId::new("other", "absent"), "x")
            .await
            .expect("reclaim missing");
        assert_eq!(none, 0);
    }

    #[test]
    fn test_sanitize_revision() {
        assert_eq!(sanitize_revision("main/b8e362c206"), "main_b8e362c206");
        assert_eq!(sanitize_revision(".."), "__");
        assert_eq!(sanitize_revision(""), "_");
    }
}
