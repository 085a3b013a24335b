//! Controller settings.
//!
//! This module defines the structs that map to `tf-reconciler.yaml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

use crate::error::Result;

use super::duration::parse_duration;

/// Root controller settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSettings {
    /// Number of resources reconciled in parallel.
    #[serde(default = "default_workers")]
    #[validate(range(min = 1, max = 256))]
    pub workers: usize,
    /// Periodic resync interval.
    #[serde(default = "default_resync_interval")]
    pub resync_interval: String,
    /// How often the resource directory is polled for changes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
    /// Default engine timeout per invocation.
    #[serde(default = "default_engine_timeout")]
    pub engine_timeout: String,
    /// Retry backoff.
    #[serde(default)]
    pub backoff: BackoffSettings,
    /// Execution engine.
    #[serde(default)]
    pub engine: EngineSettings,
    /// Plan/state persistence.
    #[serde(default)]
    pub store: StoreSettings,
    /// Directory receiving materialized workspaces.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// Directory holding resource manifests.
    #[serde(default = "default_resources_dir")]
    pub resources_dir: PathBuf,
    /// Source index file.
    #[serde(default = "default_sources_index")]
    pub sources_index: PathBuf,
}

/// Exponential backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffSettings {
    /// First retry delay.
    #[serde(default = "default_backoff_initial")]
    pub initial: String,
    /// Ceiling for retry delays.
    #[serde(default = "default_backoff_max")]
    pub max: String,
}

/// Execution engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// Engine binary name or path.
    #[serde(default = "default_engine_binary")]
    #[validate(length(min = 1))]
    pub binary: String,
    /// Extra environment passed to every invocation.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Upper bound on captured stdout/stderr bytes per stream.
    #[serde(default = "default_output_limit")]
    #[validate(range(min = 1024))]
    pub output_limit_bytes: usize,
}

/// Plan/state persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StoreSettings {
    /// Backend type.
    #[serde(default)]
    pub backend: StoreBackend,
    /// Local store directory (local backend).
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// S3 bucket name (s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region.
    #[serde(default)]
    pub region: Option<String>,
}

/// Store backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Local file-based storage.
    #[default]
    Local,
    /// AWS S3-based storage.
    S3,
}

const fn default_workers() -> usize {
    4
}

fn default_resync_interval() -> String {
    String::from("10m")
}

fn default_poll_interval() -> String {
    String::from("5s")
}

fn default_engine_timeout() -> String {
    String::from("20m")
}

fn default_backoff_initial() -> String {
    String::from("5s")
}

fn default_backoff_max() -> String {
    String::from("5m")
}

fn default_engine_binary() -> String {
    String::from("terraform")
}

const fn default_output_limit() -> usize {
    4 * 1024 * 1024
}

fn default_resources_dir() -> PathBuf {
    PathBuf::from("resources")
}

fn default_sources_index() -> PathBuf {
    PathBuf::from("sources.yaml")
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            resync_interval: default_resync_interval(),
            poll_interval: default_poll_interval(),
            engine_timeout: default_engine_timeout(),
            backoff: BackoffSettings::default(),
            engine: EngineSettings::default(),
            store: StoreSettings::default(),
            workspace_root: None,
            resources_dir: default_resources_dir(),
            sources_index: default_sources_index(),
        }
    }
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial: default_backoff_initial(),
            max: default_backoff_max(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            binary: default_engine_binary(),
            env: BTreeMap::new(),
            output_limit_bytes: default_output_limit(),
        }
    }
}

impl ControllerSettings {
    /// Returns the resync interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is malformed.
    pub fn resync_interval(&self) -> Result<Duration> {
        parse_duration(&self.resync_interval)
    }

    /// Returns the manifest polling interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is malformed.
    pub fn poll_interval(&self) -> Result<Duration> {
        parse_duration(&self.poll_interval)
    }

    /// Returns the default engine timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is malformed.
    pub fn engine_timeout(&self) -> Result<Duration> {
        parse_duration(&self.engine_timeout)
    }

    /// Returns the workspace root, defaulting under the user cache directory.
    #[must_use]
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("tf-reconciler")
                .join("workspaces")
        })
    }

    /// Returns the local store directory, defaulting under the user data directory.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.store.path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("tf-reconciler")
                .join("store")
        })
    }
}

impl BackoffSettings {
    /// Returns the first retry delay.
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is malformed.
    pub fn initial(&self) -> Result<Duration> {
        parse_duration(&self.initial)
    }

    /// Returns the retry delay ceiling.
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is malformed.
    pub fn max(&self) -> Result<Duration> {
        parse_duration(&self.max)
    }
}
