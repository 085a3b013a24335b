//! Resource types describing declared Terraform desires and their status.
//!
//! These types map to the resource manifests the controller reconciles.
//! The controller only ever mutates [`TerraformStatus`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use crate::approval::ApprovalPolicy;
use crate::config::parse_duration;
use crate::controller::ReconcilePhase;
use crate::error::{ReconcilerError, ResourceError, Result};

use super::condition::{Condition, ConditionType};

/// Default engine workspace name.
pub const DEFAULT_WORKSPACE: &str = "default";

/// Identity of a resource: namespace plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    /// Namespace the resource lives in.
    pub namespace: String,
    /// Name of the resource within its namespace.
    pub name: String,
}

/// A declared Terraform resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// API version of the manifest.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Kind of the manifest.
    #[serde(default = "default_kind")]
    pub kind: String,
    /// Identity metadata.
    pub metadata: ObjectMeta,
    /// Declared desire.
    pub spec: TerraformSpec,
    /// Observed status, owned by the controller.
    #[serde(default)]
    pub status: TerraformStatus,
}

/// Identity metadata of a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Resource name.
    pub name: String,
    /// Resource namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

/// Declared desire of a Terraform resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TerraformSpec {
    /// Source artifact reference.
    pub source_ref: SourceReference,
    /// Path of the configuration inside the artifact.
    #[serde(default = "default_path")]
    pub path: String,
    /// `auto`, empty for manual, or the fingerprint being approved.
    #[serde(default)]
    pub approve_plan: String,
    /// Engine workspace name.
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Input variables passed to the engine.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Suppresses the state store slot for this resource.
    #[serde(default)]
    pub disable_state_persistence: bool,
    /// Where output values are written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_outputs_to_secret: Option<OutputsTarget>,
    /// Suspended resources are not reconciled.
    #[serde(default)]
    pub suspend: bool,
    /// Per-invocation engine timeout (e.g. `5m`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Resync interval (e.g. `10m`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

/// Reference to a source artifact provider object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SourceReference {
    /// Kind of the source (e.g. `GitRepository`, `Bucket`).
    pub kind: String,
    /// Name of the source.
    pub name: String,
    /// Namespace of the source; defaults to the resource's namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Destination for output values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputsTarget {
    /// Blob name receiving the values.
    pub name: String,
    /// Subset of output names to write; all when empty.
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// Observed status of a Terraform resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TerraformStatus {
    /// Conditions, ordered by last touch.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Plan bookkeeping.
    #[serde(default)]
    pub plan: PlanStatus,
    /// Names of outputs produced by the last successful apply.
    #[serde(default)]
    pub available_outputs: Vec<String>,
    /// Revision the status reflects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_revision: Option<String>,
    /// Revision most recently attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted_revision: Option<String>,
    /// Controller state machine position.
    #[serde(default)]
    pub phase: ReconcilePhase,
}

/// Plan bookkeeping in the status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatus {
    /// Fingerprint of the last applied plan.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_applied: String,
    /// Fingerprint of the plan awaiting approval or apply.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pending: String,
}

fn default_api_version() -> String {
    String::from("infra.contrib.fluxcd.io/v1alpha1")
}

fn default_kind() -> String {
    String::from("Terraform")
}

fn default_namespace() -> String {
    String::from("default")
}

fn default_path() -> String {
    String::from(".")
}

fn default_workspace() -> String {
    String::from(DEFAULT_WORKSPACE)
}

impl ResourceId {
    /// Creates a new resource identity.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = ReconcilerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(ResourceError::InvalidIdentity {
                value: s.to_string(),
            }
            .into()),
        }
    }
}

impl Resource {
    /// Creates a resource with an empty status.
    #[must_use]
    pub fn new(id: &ResourceId, spec: TerraformSpec) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                name: id.name.clone(),
                namespace: id.namespace.clone(),
            },
            spec,
            status: TerraformStatus::default(),
        }
    }

    /// Returns the identity of this resource.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.metadata.namespace, &self.metadata.name)
    }
}

impl TerraformSpec {
    /// Creates a spec pointing at a source with every other field defaulted.
    #[must_use]
    pub fn new(source_ref: SourceReference) -> Self {
        Self {
            source_ref,
            path: default_path(),
            approve_plan: String::new(),
            workspace: default_workspace(),
            vars: BTreeMap::new(),
            disable_state_persistence: false,
            write_outputs_to_secret: None,
            suspend: false,
            timeout: None,
            interval: None,
        }
    }

    /// Returns the approval policy declared by this spec.
    #[must_use]
    pub fn approval_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::from_declared(&self.approve_plan)
    }

    /// Returns the declared engine timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is malformed.
    pub fn timeout(&self) -> Result<Option<Duration>> {
        self.timeout.as_deref().map(parse_duration).transpose()
    }

    /// Returns the declared resync interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the duration string is malformed.
    pub fn interval(&self) -> Result<Option<Duration>> {
        self.interval.as_deref().map(parse_duration).transpose()
    }
}

impl SourceReference {
    /// Creates a reference in an explicit namespace.
    #[must_use]
    pub fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }

    /// Returns the namespace, falling back to the referencing resource's.
    #[must_use]
    pub fn namespace_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(fallback)
    }
}

impl std::fmt::Display for SourceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{ns}/{}", self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

impl TerraformStatus {
    /// Gets the condition of the given type.
    #[must_use]
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Records a condition.
    ///
    /// An identical fact is left untouched. A changed fact replaces the
    /// existing condition of the same type and moves it to the end.
    /// Returns true if the conditions changed.
    pub fn set_condition(&mut self, condition: Condition) -> bool {
        if self
            .condition(condition.condition_type)
            .is_some_and(|existing| existing.same_fact(&condition))
        {
            return false;
        }

        self.conditions
            .retain(|c| c.condition_type != condition.condition_type);
        self.conditions.push(condition);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::condition::reasons;

    #[test]
    fn test_parse_resource_id() {
        let id: ResourceId = "flux-system/helloworld".parse().expect("valid id");
        assert_eq!(id.namespace, "flux-system");
        assert_eq!(id.name, "helloworld");
        assert_eq!(id.to_string(), "flux-system/helloworld");

        assert!("helloworld".parse::<ResourceId>().is_err());
        assert!("a/b/c".parse::<ResourceId>().is_err());
        assert!("/b".parse::<ResourceId>().is_err());
    }

    #[test]
    fn test_parse_manifest_defaults() {
        let yaml = r"
metadata:
  name: helloworld
  namespace: flux-system
spec:
  sourceRef:
    kind: GitRepository
    name: podinfo
";
        let resource: Resource = serde_yaml::from_str(yaml).expect("valid manifest");
        assert_eq!(resource.kind, "Terraform");
        assert_eq!(resource.spec.path, ".");
        assert_eq!(resource.spec.workspace, "default");
        assert_eq!(resource.spec.approval_policy(), ApprovalPolicy::Manual { approved: None });
        assert_eq!(resource.spec.source_ref.namespace_or("flux-system"), "flux-system");
        assert!(resource.status.conditions.is_empty());
    }

    #[test]
    fn test_set_condition_replaces_and_reorders() {
        let mut status = TerraformStatus::default();

        assert!(status.set_condition(Condition::succeeded(
            ConditionType::Plan,
            reasons::PLANNED_SUCCEED,
            "Terraform Plan Generated Successfully",
        )));
        assert!(status.set_condition(Condition::succeeded(
            ConditionType::Apply,
            reasons::APPLIED_SUCCEED,
            "Terraform Applied Successfully",
        )));

        // Same fact is a no-op
        assert!(!status.set_condition(Condition::succeeded(
            ConditionType::Plan,
            reasons::PLANNED_SUCCEED,
            "Terraform Plan Generated Successfully",
        )));
        assert_eq!(status.conditions[0].condition_type, ConditionType::Plan);

        // Changed fact replaces and moves to the end
        assert!(status.set_condition(Condition::failed(
            ConditionType::Plan,
            reasons::PLANNED_FAILED,
            "boom",
        )));
        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.conditions[0].condition_type, ConditionType::Apply);
        assert_eq!(status.conditions[1].reason, reasons::PLANNED_FAILED);
    }

    #[test]
    fn test_spec_durations() {
        let mut spec = TerraformSpec::new(SourceReference::new("GitRepository", "ns", "src"));
        assert_eq!(spec.timeout().expect("no timeout"), None);

        spec.timeout = Some(String::from("90s"));
        assert_eq!(spec.timeout().expect("valid"), Some(Duration::from_secs(90)));

        spec.interval = Some(String::from("soon"));
        assert!(spec.interval().is_err());
    }
}
