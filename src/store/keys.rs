//! Blob naming and label conventions.
//!
//! Internal keys join their parts with `.`, which validated resource names,
//! workspaces and output targets cannot contain. A target name therefore
//! never resolves to a plan, state, ledger or default outputs key.

use crate::resource::{OutputsTarget, ResourceId};

use super::blob::BlobKey;

/// Label holding the plan fingerprint on plan blobs.
pub const LABEL_SAVED_PLAN: &str = "savedPlan";
/// Label holding the source revision on plan blobs.
pub const LABEL_REVISION: &str = "revision";
/// Label holding the has-changes flag on plan blobs.
pub const LABEL_HAS_CHANGES: &str = "hasChanges";
/// Label holding the creation time on plan blobs.
pub const LABEL_CREATED_AT: &str = "createdAt";
/// Label naming the fingerprint that produced a state blob.
pub const LABEL_APPLIED_PLAN: &str = "appliedPlan";
/// Label listing every output name of the apply, comma separated.
pub const LABEL_OUTPUT_NAMES: &str = "outputNames";

/// Namespace holding controller-wide blobs.
pub const SYSTEM_NAMESPACE: &str = "tf-reconciler-system";

/// Prefix shared by every plan blob of a resource.
#[must_use]
pub fn plan_prefix(id: &ResourceId, workspace: &str) -> String {
    format!("tfplan.{workspace}.{}.", id.name)
}

/// Key of the plan blob for a fingerprint.
#[must_use]
pub fn plan_key(id: &ResourceId, workspace: &str, fingerprint: &str) -> BlobKey {
    BlobKey::new(
        &id.namespace,
        format!("{}{fingerprint}", plan_prefix(id, workspace)),
    )
}

/// Key of the state blob of a resource.
#[must_use]
pub fn state_key(id: &ResourceId, workspace: &str) -> BlobKey {
    BlobKey::new(&id.namespace, format!("tfstate.{workspace}.{}", id.name))
}

/// Key of the plan ledger of a resource.
#[must_use]
pub fn ledger_key(id: &ResourceId, workspace: &str) -> BlobKey {
    BlobKey::new(&id.namespace, format!("tfledger.{workspace}.{}", id.name))
}

/// Key of the outputs blob of a resource.
#[must_use]
pub fn outputs_key(id: &ResourceId, workspace: &str, target: Option<&OutputsTarget>) -> BlobKey {
    target.map_or_else(
        || BlobKey::new(&id.namespace, format!("tfoutputs.{workspace}.{}", id.name)),
        |t| BlobKey::new(&id.namespace, &t.name),
    )
}

/// Key of the controller lease.
#[must_use]
pub fn lease_key() -> BlobKey {
    BlobKey::new(SYSTEM_NAMESPACE, "controller-lease")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_names() {
        let id = ResourceId::new("flux-system", "helloworld");

        assert_eq!(
            plan_key(&id, "default", "plan-master-b8e362c206").name,
            "tfplan.default.helloworld.plan-master-b8e362c206"
        );
        assert_eq!(state_key(&id, "default").name, "tfstate.default.helloworld");
        assert_eq!(ledger_key(&id, "default").name, "tfledger.default.helloworld");
        assert_eq!(
            outputs_key(&id, "default", None).name,
            "tfoutputs.default.helloworld"
        );

        let target = OutputsTarget {
            name: String::from("helloworld-outputs"),
            outputs: Vec::new(),
        };
        let key = outputs_key(&id, "default", Some(&target));
        assert_eq!(key.namespace, "flux-system");
        assert_eq!(key.name, "helloworld-outputs");
    }

    #[test]
    fn test_plan_prefix_matches_plan_keys() {
        let id = ResourceId::new("default", "hello");
        let key = plan_key(&id, "default", "plan-main-0123456789");
        assert!(key.name.starts_with(&plan_prefix(&id, "default")));
    }

    #[test]
    fn test_target_names_cannot_reach_internal_keys() {
        let id = ResourceId::new("default", "hello");
        let other = ResourceId::new("default", "hello-default");
        let internal = [
            state_key(&id, "default"),
            ledger_key(&id, "default"),
            outputs_key(&id, "default", None),
            plan_key(&id, "default", "plan-main-0123456789"),
            state_key(&other, "default"),
        ];

        for candidate in [
            "tfstate-default-hello",
            "tfledger-default-hello",
            "tfoutputs-default-hello",
        ] {
            let target = OutputsTarget {
                name: String::from(candidate),
                outputs: Vec::new(),
            };
            let key = outputs_key(&id, "default", Some(&target));
            assert!(internal.iter().all(|k| k.name != key.name), "{candidate}");
        }

        // Hyphenated names and workspaces do not alias each other.
        assert_ne!(
            state_key(&ResourceId::new("default", "x-hello"), "default").name,
            state_key(&ResourceId::new("default", "hello"), "default-x").name
        );
    }
}
