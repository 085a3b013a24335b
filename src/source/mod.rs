//! Source artifacts.
//!
//! This module defines the source collaborator interface, its file-backed
//! and in-memory providers, and the materializer that turns an artifact
//! revision into a workspace the engine can run in.

mod artifact;
mod index;
mod memory;
mod workspace;

pub use artifact::{ArtifactLocation, SourceArtifact, SourceProvider};
pub use index::{IndexEntry, IndexSourceProvider, SourceIndex};
pub use memory::MemorySourceProvider;
pub use workspace::{Workspace, WorkspaceMaterializer, COMPLETION_MARKER};
