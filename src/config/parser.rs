//! Configuration parser for controller settings and resource manifests.
//!
//! Settings come from a YAML file, then `TF_RECONCILER_*` environment
//! variables override individual fields.

use crate::error::{ConfigError, ReconcilerError, Result};
use crate::resource::Resource;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::settings::{ControllerSettings, StoreBackend};

/// Prefix of environment overrides.
const ENV_PREFIX: &str = "TF_RECONCILER_";

/// Configuration parser for loading controller settings.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env` and relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ControllerSettings> {
        let path = path.as_ref();
        info!("Loading settings from: {}", path.display());

        if !path.exists() {
            return Err(ReconcilerError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ReconcilerError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut settings = self.parse_yaml(&content, Some(path))?;
        self.resolve_relative_paths(&mut settings, path.parent());
        Ok(settings)
    }

    /// Parses settings from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ControllerSettings> {
        debug!("Parsing YAML settings");

        // An empty document means all defaults
        if content.trim().is_empty() {
            return Ok(ControllerSettings::default());
        }

        let settings: ControllerSettings = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ReconcilerError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed settings: {} workers, {} store backend",
            settings.workers,
            backend_name(settings.store.backend)
        );
        Ok(settings)
    }

    /// Loads settings with environment variable overrides.
    ///
    /// Environment variables are checked in the format
    /// `TF_RECONCILER_<KEY>` (e.g. `TF_RECONCILER_WORKERS`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an
    /// override has an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<ControllerSettings> {
        let mut settings = self.load_file(path)?;
        Self::apply_overrides(&mut settings, |key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Loads settings from the discovered file, or defaults when none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a discovered file is invalid or an override has
    /// an invalid value.
    pub fn load_or_default(&self, start_dir: impl AsRef<Path>) -> Result<ControllerSettings> {
        match find_config_file(start_dir) {
            Ok(path) => self.load_with_env(path),
            Err(ReconcilerError::Config(ConfigError::FileNotFound { .. })) => {
                info!("No settings file found, using defaults");
                let mut settings = ControllerSettings::default();
                Self::apply_overrides(&mut settings, |key| std::env::var(key).ok())?;
                Ok(settings)
            }
            Err(e) => Err(e),
        }
    }

    /// Applies `TF_RECONCILER_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an invalid value.
    pub fn apply_overrides<F>(settings: &mut ControllerSettings, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(&format!("{ENV_PREFIX}{key}"));

        if let Some(workers) = var("WORKERS") {
            debug!("Overriding workers from environment");
            settings.workers = workers.parse().map_err(|_| {
                ReconcilerError::Config(ConfigError::validation(
                    format!("Invalid worker count: {workers}"),
                    "workers",
                ))
            })?;
        }

        if let Some(interval) = var("RESYNC_INTERVAL") {
            debug!("Overriding resync_interval from environment");
            settings.resync_interval = interval;
        }

        if let Some(timeout) = var("ENGINE_TIMEOUT") {
            debug!("Overriding engine_timeout from environment");
            settings.engine_timeout = timeout;
        }

        if let Some(binary) = var("ENGINE_BINARY") {
            debug!("Overriding engine.binary from environment");
            settings.engine.binary = binary;
        }

        if let Some(backend) = var("STORE_BACKEND") {
            debug!("Overriding store.backend from environment");
            settings.store.backend = match backend.to_ascii_lowercase().as_str() {
                "local" => StoreBackend::Local,
                "s3" => StoreBackend::S3,
                other => {
                    return Err(ReconcilerError::Config(ConfigError::validation(
                        format!("Unknown store backend: {other}"),
                        "store.backend",
                    )));
                }
            };
        }

        if let Some(bucket) = var("STORE_BUCKET") {
            debug!("Overriding store.bucket from environment");
            settings.store.bucket = Some(bucket);
        }

        if let Some(prefix) = var("STORE_PREFIX") {
            debug!("Overriding store.prefix from environment");
            settings.store.prefix = Some(prefix);
        }

        if let Some(root) = var("WORKSPACE_ROOT") {
            debug!("Overriding workspace_root from environment");
            settings.workspace_root = Some(PathBuf::from(root));
        }

        if let Some(dir) = var("RESOURCES_DIR") {
            debug!("Overriding resources_dir from environment");
            settings.resources_dir = PathBuf::from(dir);
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                ReconcilerError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Parses a resource manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_resource(&self, content: &str, source: Option<&Path>) -> Result<Resource> {
        serde_yaml::from_str(content).map_err(|e| {
            ReconcilerError::Config(ConfigError::ParseError {
                message: format!("Manifest parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })
    }

    /// Loads a resource manifest from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_resource(&self, path: impl AsRef<Path>) -> Result<Resource> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReconcilerError::Config(ConfigError::FileNotFound {
                    path: path.to_path_buf(),
                })
            } else {
                ReconcilerError::Config(ConfigError::ParseError {
                    message: format!("Failed to read file: {e}"),
                    location: Some(path.display().to_string()),
                })
            }
        })?;
        self.parse_resource(&content, Some(path))
    }

    /// Anchors relative paths at the settings file's directory.
    fn resolve_relative_paths(&self, settings: &mut ControllerSettings, dir: Option<&Path>) {
        let Some(dir) = dir.or(self.base_path.as_deref()) else {
            return;
        };

        if settings.resources_dir.is_relative() {
            settings.resources_dir = dir.join(&settings.resources_dir);
        }
        if settings.sources_index.is_relative() {
            settings.sources_index = dir.join(&settings.sources_index);
        }
        if let Some(root) = settings.workspace_root.as_mut()
            && root.is_relative()
        {
            *root = dir.join(&*root);
        }
        if let Some(path) = settings.store.path.as_mut()
            && path.is_relative()
        {
            *path = dir.join(&*path);
        }
    }
}

const fn backend_name(backend: StoreBackend) -> &'static str {
    match backend {
        StoreBackend::Local => "local",
        StoreBackend::S3 => "s3",
    }
}

/// Default settings file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "tf-reconciler.yaml",
    "tf-reconciler.yml",
    ".tf-reconciler.yaml",
];

/// Finds the settings file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no settings file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found settings file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ReconcilerError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_parse_minimal_settings() {
        let parser = ConfigParser::new();
        let settings = parser.parse_yaml("workers: 2\n", None).expect("parse");

        assert_eq!(settings.workers, 2);
        assert_eq!(settings.store.backend, StoreBackend::Local);
        assert_eq!(
            settings.resync_interval().expect("interval"),
            Duration::from_secs(600)
        );
        assert_eq!(
            settings.engine_timeout().expect("timeout"),
            Duration::from_secs(1200)
        );
    }

    #[test]
    fn test_parse_full_settings() {
        let yaml = r"
workers: 8
resyncInterval: 2m
engineTimeout: 30m
backoff:
  initial: 1s
  max: 1m
engine:
  binary: /usr/local/bin/tofu
  env:
    TF_IN_AUTOMATION: '1'
store:
  backend: s3
  bucket: tf-plans
  prefix: prod
resourcesDir: /etc/tf-reconciler/resources
";
        let parser = ConfigParser::new();
        let settings = parser.parse_yaml(yaml, None).expect("parse");

        assert_eq!(settings.workers, 8);
        assert_eq!(settings.engine.binary, "/usr/local/bin/tofu");
        assert_eq!(settings.engine.env["TF_IN_AUTOMATION"], "1");
        assert_eq!(settings.store.backend, StoreBackend::S3);
        assert_eq!(settings.store.bucket.as_deref(), Some("tf-plans"));
        assert_eq!(settings.backoff.max().expect("max"), Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TF_RECONCILER_WORKERS", "16"),
            ("TF_RECONCILER_STORE_BACKEND", "S3"),
            ("TF_RECONCILER_STORE_BUCKET", "override-bucket"),
        ]
        .into_iter()
        .collect();

        let mut settings = ControllerSettings::default();
        ConfigParser::apply_overrides(&mut settings, |key| {
            vars.get(key).map(|v| (*v).to_string())
        })
        .expect("apply overrides");

        assert_eq!(settings.workers, 16);
        assert_eq!(settings.store.backend, StoreBackend::S3);
        assert_eq!(settings.store.bucket.as_deref(), Some("override-bucket"));
    }

    #[test]
    fn test_invalid_env_override() {
        let mut settings = ControllerSettings::default();
        let result = ConfigParser::apply_overrides(&mut settings, |key| {
            (key == "TF_RECONCILER_WORKERS").then(|| String::from("many"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_find_config_file_in_parent() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let nested = temp_dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("create nested dir");
        std::fs::write(temp_dir.path().join("tf-reconciler.yaml"), "workers: 3\n")
            .expect("write settings");

        let found = find_config_file(&nested).expect("find settings");
        assert_eq!(found, temp_dir.path().join("tf-reconciler.yaml"));

        let settings = ConfigParser::new().load_file(&found).expect("load");
        assert_eq!(settings.workers, 3);
        assert_eq!(settings.resources_dir, temp_dir.path().join("resources"));
    }

    #[test]
    fn test_parse_resource_manifest() {
        let yaml = r"
apiVersion: infra.contrib.fluxcd.io/v1alpha1
kind: Terraform
metadata:
  name: helloworld
  namespace: flux-system
spec:
  sourceRef:
    kind: GitRepository
    name: podinfo
  path: ./tf
  approvePlan: auto
  vars:
    region: eu-west-1
";
        let resource = ConfigParser::new()
            .parse_resource(yaml, None)
            .expect("parse manifest");

        assert_eq!(resource.metadata.name, "helloworld");
        assert_eq!(resource.spec.path, "./tf");
        assert_eq!(resource.spec.vars["region"], "eu-west-1");
    }
}
