//! Error types for the Terraform reconciler.
//!
//! This module provides the error hierarchy for every stage of the
//! reconciliation lifecycle: configuration, resource storage, source
//! artifacts, plan/state persistence, planning, applying and output
//! extraction.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the reconciler.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource storage errors.
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Source artifact errors.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Plan/state persistence errors.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Planning errors.
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// Apply errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// Output parsing errors.
    #[error("Output error: {0}")]
    Output(#[from] OutputParseError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// A duration string could not be parsed.
    #[error("Invalid duration '{value}': expected forms like 90s, 5m or 1h")]
    InvalidDuration {
        /// The rejected value.
        value: String,
    },
}

/// Resource storage errors.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The resource does not exist.
    #[error("Resource not found: {id}")]
    NotFound {
        /// Identity of the missing resource.
        id: String,
    },

    /// A `namespace/name` identity could not be parsed.
    #[error("Invalid resource identity '{value}': expected <namespace>/<name>")]
    InvalidIdentity {
        /// The rejected value.
        value: String,
    },

    /// A manifest or status file is unreadable.
    #[error("Resource data is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Storage IO failed.
    #[error("Resource storage failed: {message}")]
    Storage {
        /// Description of the failure.
        message: String,
    },
}

/// Source artifact errors.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The referenced source has no ready artifact yet.
    #[error("Source {reference} is not ready")]
    NotReady {
        /// The source reference.
        reference: String,
    },

    /// The artifact checksum did not match the published checksum.
    #[error("Artifact for revision {revision} failed integrity check: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// Revision being materialized.
        revision: String,
        /// Checksum published by the source.
        expected: String,
        /// Checksum computed locally.
        actual: String,
    },

    /// Fetching a remote artifact failed.
    #[error("Failed to fetch artifact: {message}")]
    Fetch {
        /// Description of the failure.
        message: String,
    },

    /// Extracting the artifact failed.
    #[error("Failed to extract artifact: {message}")]
    Extraction {
        /// Description of the failure.
        message: String,
    },

    /// The configured relative path does not exist in the artifact.
    #[error("Path {path} not found in artifact")]
    PathNotFound {
        /// The relative path.
        path: String,
    },

    /// A path would escape the workspace root.
    #[error("Path {path} escapes the workspace")]
    PathEscapes {
        /// The offending path.
        path: String,
    },
}

/// Plan/state persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A different blob already exists under an immutable key.
    #[error("Conflicting content already stored under {key}")]
    Conflict {
        /// The conflicting key.
        key: String,
    },

    /// No blob exists under the key.
    #[error("Blob not found: {key}")]
    NotFound {
        /// The missing key.
        key: String,
    },

    /// Local IO failed.
    #[error("Store IO error: {message}")]
    Io {
        /// Description of the failure.
        message: String,
    },

    /// Stored data could not be decoded.
    #[error("Stored data is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Serialization error.
    #[error("Store serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 store backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// The controller lease is held by another process.
    #[error("Store is leased by another controller (holder: {holder}, since: {since})")]
    LeasedByOther {
        /// Identifier of the lease holder.
        holder: String,
        /// When the lease was acquired.
        since: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The engine exited unsuccessfully.
    #[error("Engine plan failed (exit code {exit_code:?}): {diagnostics}")]
    Engine {
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Engine diagnostic text.
        diagnostics: String,
    },

    /// The engine did not return before the deadline.
    #[error("Engine plan timed out after {timeout_secs}s")]
    TimedOut {
        /// The deadline that elapsed.
        timeout_secs: u64,
    },

    /// The engine could not be started.
    #[error("Failed to launch engine: {message}")]
    Launch {
        /// Description of the failure.
        message: String,
    },

    /// The engine output could not be interpreted.
    #[error("Failed to interpret plan output: {message}")]
    Parse {
        /// Description of the failure.
        message: String,
    },
}

/// Apply errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The engine exited unsuccessfully.
    #[error("Engine apply failed (exit code {exit_code:?}): {diagnostics}")]
    Engine {
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Engine diagnostic text.
        diagnostics: String,
    },

    /// The engine did not return before the deadline.
    #[error("Engine apply timed out after {timeout_secs}s")]
    TimedOut {
        /// The deadline that elapsed.
        timeout_secs: u64,
    },

    /// The engine could not be started.
    #[error("Failed to launch engine: {message}")]
    Launch {
        /// Description of the failure.
        message: String,
    },

    /// The plan was generated for a revision that is no longer current.
    #[error("Plan {fingerprint} targets revision {plan_revision} but the source is at {current_revision}")]
    StalePlan {
        /// The abandoned plan.
        fingerprint: String,
        /// Revision the plan was generated from.
        plan_revision: String,
        /// Revision currently published by the source.
        current_revision: String,
    },

    /// The plan is not in the approved state.
    #[error("Plan {fingerprint} is not approved")]
    NotApproved {
        /// The plan that was refused.
        fingerprint: String,
    },
}

/// The engine's output payload could not be parsed.
#[derive(Debug, Error)]
#[error("Failed to parse engine outputs: {message}")]
pub struct OutputParseError {
    /// Description of the failure.
    pub message: String,
}

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, ReconcilerError>;

impl ReconcilerError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Source(e) => e.is_retryable(),
            Self::Store(e) => !matches!(e, StoreError::Corrupted { .. }),
            Self::Plan(_) | Self::Apply(_) | Self::Io(_) => true,
            Self::Config(_) | Self::Resource(_) | Self::Output(_) | Self::Internal(_) => false,
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Source(SourceError::NotReady { .. }) => Some(10),
            Self::Store(StoreError::LeasedByOther { .. }) => Some(30),
            Self::Store(StoreError::Io { .. } | StoreError::S3Error { .. }) => Some(5),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl SourceError {
    /// Returns true if retrying the same revision can succeed.
    ///
    /// Integrity failures are only retried when a new revision appears.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady { .. } | Self::Fetch { .. } | Self::Extraction { .. })
    }

    /// Creates an extraction error with the given message.
    #[must_use]
    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
        }
    }

    /// Creates an integrity mismatch error.
    #[must_use]
    pub fn integrity(
        revision: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::IntegrityMismatch {
            revision: revision.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a fetch error with the given message.
    #[must_use]
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
        }
    }
}

impl StoreError {
    /// Creates a conflict error for a key.
    #[must_use]
    pub fn conflict(key: impl Into<String>) -> Self {
        Self::Conflict { key: key.into() }
    }

    /// Creates a not-found error for a key.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates an IO error with the given message.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Returns true if this is a not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl PlanError {
    /// Returns true if the engine never returned.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

impl ApplyError {
    /// Returns true if the engine never returned.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

impl OutputParseError {
    /// Creates a parse error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
