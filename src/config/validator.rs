//! Validation of controller settings and resource manifests.
//!
//! Problems are collected into a [`ValidationResult`] so callers see every
//! issue at once; the first error is surfaced as a `ConfigError`.

use crate::error::{ConfigError, ReconcilerError, Result};
use crate::resource::{Resource, DEFAULT_WORKSPACE};
use tracing::debug;
use validator::Validate;

use super::duration::parse_duration;
use super::settings::{ControllerSettings, StoreBackend};

/// Maximum length of resource names and namespaces.
const MAX_NAME_LEN: usize = 63;

/// Validator for settings and resources.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates controller settings.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self, settings: &ControllerSettings) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        collect_derived(settings.validate(), "", &mut result);
        collect_derived(settings.engine.validate(), "engine.", &mut result);

        for (field, value) in [
            ("resync_interval", &settings.resync_interval),
            ("poll_interval", &settings.poll_interval),
            ("engine_timeout", &settings.engine_timeout),
            ("backoff.initial", &settings.backoff.initial),
            ("backoff.max", &settings.backoff.max),
        ] {
            check_duration(field, value, &mut result);
        }

        if let (Ok(initial), Ok(max)) = (settings.backoff.initial(), settings.backoff.max())
            && initial > max
        {
            result.errors.push(ValidationError {
                field: String::from("backoff.initial"),
                message: format!(
                    "Initial backoff {} exceeds maximum {}",
                    settings.backoff.initial, settings.backoff.max
                ),
            });
        }

        match settings.store.backend {
            StoreBackend::S3 => {
                if settings.store.bucket.as_ref().is_none_or(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("store.bucket"),
                        message: String::from("S3 bucket name is required when using S3 backend"),
                    });
                }
            }
            StoreBackend::Local => {
                if settings.store.path.is_none() {
                    result.warnings.push(String::from(
                        "store.path: not set, plans and state go to the user data directory",
                    ));
                }
            }
        }

        finish(result, "Settings")
    }

    /// Validates a resource manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate_resource(&self, resource: &Resource) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();
        let spec = &resource.spec;

        check_name("metadata.name", &resource.metadata.name, &mut result);
        check_name("metadata.namespace", &resource.metadata.namespace, &mut result);

        if spec.source_ref.kind.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("spec.sourceRef.kind"),
                message: String::from("Source kind cannot be empty"),
            });
        }
        check_name("spec.sourceRef.name", &spec.source_ref.name, &mut result);

        if spec.path.split(['/', '\\']).any(|part| part == "..") {
            result.errors.push(ValidationError {
                field: String::from("spec.path"),
                message: format!("Path '{}' must not contain '..'", spec.path),
            });
        }

        if spec.workspace.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("spec.workspace"),
                message: String::from("Workspace cannot be empty"),
            });
        } else if !is_valid_name(&spec.workspace) {
            result.errors.push(ValidationError {
                field: String::from("spec.workspace"),
                message: format!(
                    "Workspace '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    spec.workspace
                ),
            });
        } else if spec.workspace != DEFAULT_WORKSPACE {
            result.warnings.push(format!(
                "spec.workspace: non-default workspace '{}'",
                spec.workspace
            ));
        }

        for key in spec.vars.keys() {
            if key.is_empty() || key.contains('=') {
                result.errors.push(ValidationError {
                    field: format!("spec.vars.{key}"),
                    message: format!("Variable name '{key}' is invalid"),
                });
            }
        }

        if let Some(timeout) = &spec.timeout {
            check_duration("spec.timeout", timeout, &mut result);
        }
        if let Some(interval) = &spec.interval {
            check_duration("spec.interval", interval, &mut result);
        }

        if let Some(target) = &spec.write_outputs_to_secret {
            check_name("spec.writeOutputsToSecret.name", &target.name, &mut result);
            if target.outputs.is_empty() {
                result.warnings.push(String::from(
                    "spec.writeOutputsToSecret.outputs: empty, all outputs will be written",
                ));
            }
        }

        if spec.suspend {
            result
                .warnings
                .push(String::from("spec.suspend: resource is suspended"));
        }

        finish(result, "Resource")
    }
}

fn finish(result: ValidationResult, what: &str) -> Result<ValidationResult> {
    if result.errors.is_empty() {
        debug!("{what} validation passed");
        Ok(result)
    } else {
        let first_error = &result.errors[0];
        Err(ReconcilerError::Config(ConfigError::ValidationError {
            message: first_error.message.clone(),
            field: Some(first_error.field.clone()),
        }))
    }
}

fn collect_derived(
    outcome: std::result::Result<(), validator::ValidationErrors>,
    prefix: &str,
    result: &mut ValidationResult,
) {
    let Err(errors) = outcome else {
        return;
    };

    for (field, failures) in errors.field_errors() {
        for failure in failures {
            result.errors.push(ValidationError {
                field: format!("{prefix}{field}"),
                message: failure.message.as_ref().map_or_else(
                    || format!("Value fails the '{}' constraint", failure.code),
                    ToString::to_string,
                ),
            });
        }
    }
}

fn check_duration(field: &str, value: &str, result: &mut ValidationResult) {
    if parse_duration(value).is_err() {
        result.errors.push(ValidationError {
            field: field.to_string(),
            message: format!("Invalid duration '{value}'"),
        });
    }
}

fn check_name(field: &str, value: &str, result: &mut ValidationResult) {
    if value.is_empty() {
        result.errors.push(ValidationError {
            field: field.to_string(),
            message: String::from("Name cannot be empty"),
        });
    } else if !is_valid_name(value) {
        result.errors.push(ValidationError {
            field: field.to_string(),
            message: format!(
                "Name '{value}' is invalid. Must be lowercase alphanumeric with hyphens."
            ),
        });
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter
/// or digit, at most 63 characters.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }

    let mut chars = name.chars();

    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase()
        && !first.is_ascii_digit()
    {
        return false;
    }

    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return false;
        }
    }

    !name.ends_with('-')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{OutputsTarget, ResourceId, SourceReference, TerraformSpec};

    fn resource(name: &str) -> Resource {
        let spec = TerraformSpec::new(SourceReference::new("GitRepository", "flux-system", "podinfo"));
        Resource::new(&ResourceId::new("flux-system", name), spec)
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("helloworld"));
        assert!(is_valid_name("tf-hello-123"));
        assert!(is_valid_name("a"));
        assert!(is_valid_name("0day"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Hello")); // uppercase
        assert!(!is_valid_name("-hello")); // starts with hyphen
        assert!(!is_valid_name("hello_world")); // underscore
        assert!(!is_valid_name("hello-")); // ends with hyphen
        assert!(!is_valid_name(&"a".repeat(64)));
    }

    #[test]
    fn test_default_settings_are_valid() {
        let result = ConfigValidator::new()
            .validate(&ControllerSettings::default())
            .expect("defaults are valid");
        assert!(result.is_valid());
    }

    #[test]
    fn test_settings_errors() {
        let mut settings = ControllerSettings::default();
        settings.workers = 0;
        assert!(ConfigValidator::new().validate(&settings).is_err());

        let mut settings = ControllerSettings::default();
        settings.store.backend = StoreBackend::S3;
        assert!(ConfigValidator::new().validate(&settings).is_err());

        let mut settings = ControllerSettings::default();
        settings.backoff.initial = String::from("10m");
        assert!(ConfigValidator::new().validate(&settings).is_err());

        let mut settings = ControllerSettings::default();
        settings.engine.binary = String::new();
        assert!(ConfigValidator::new().validate(&settings).is_err());
    }

    #[test]
    fn test_valid_resource() {
        let result = ConfigValidator::new()
            .validate_resource(&resource("helloworld"))
            .expect("valid resource");
        assert!(result.is_valid());
    }

    #[test]
    fn test_resource_errors() {
        let validator = ConfigValidator::new();

        assert!(validator.validate_resource(&resource("Hello")).is_err());

        let mut escaping = resource("helloworld");
        escaping.spec.path = String::from("../outside");
        assert!(validator.validate_resource(&escaping).is_err());

        let mut bad_timeout = resource("helloworld");
        bad_timeout.spec.timeout = Some(String::from("soon"));
        assert!(validator.validate_resource(&bad_timeout).is_err());
    }

    #[test]
    fn test_key_like_names_are_rejected() {
        let validator = ConfigValidator::new();

        let mut dotted_target = resource("helloworld");
        dotted_target.spec.write_outputs_to_secret = Some(OutputsTarget {
            name: String::from("tfstate.default.helloworld"),
            outputs: Vec::new(),
        });
        assert!(validator.validate_resource(&dotted_target).is_err());

        let mut dotted_workspace = resource("helloworld");
        dotted_workspace.spec.workspace = String::from("prod.eu");
        assert!(validator.validate_resource(&dotted_workspace).is_err());
    }

    #[test]
    fn test_resource_warnings() {
        let mut suspended = resource("helloworld");
        suspended.spec.suspend = true;
        let result = ConfigValidator::new()
            .validate_resource(&suspended)
            .expect("suspended is valid");
        assert_eq!(result.warning_count(), 1);
    }
}
