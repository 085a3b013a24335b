//! Configuration module for the reconciler.
//!
//! This module handles all configuration-related functionality:
//! - Parsing `tf-reconciler.yaml` controller settings
//! - Environment overrides and `.env` loading
//! - Validation of settings and resource manifests

mod duration;
mod parser;
mod settings;
mod validator;

pub use duration::parse_duration;
pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES};
pub use settings::{BackoffSettings, ControllerSettings, EngineSettings, StoreBackend, StoreSettings};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
