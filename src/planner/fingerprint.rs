//! Plan fingerprints.
//!
//! A fingerprint identifies the plan of one resource at one source revision.
//! It is computed over the identity and revision only, never over plan
//! content, so re-planning the same revision yields the same name.

use sha2::{Digest, Sha256};

use crate::resource::ResourceId;

/// Maximum length of the revision prefix.
const MAX_PREFIX_LEN: usize = 32;

/// Number of hex characters of the hash kept.
const SHORT_HASH_LEN: usize = 10;

/// Computes plan fingerprints.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fingerprinter;

impl Fingerprinter {
    /// Creates a new fingerprinter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the fingerprint `plan-<revision-prefix>-<shortHash>`.
    #[must_use]
    pub fn fingerprint(&self, id: &ResourceId, revision: &str) -> String {
        format!(
            "plan-{}-{}",
            revision_prefix(revision),
            self.short_hash(id, revision)
        )
    }

    /// Computes the short hash over `(namespace, name, revision)`.
    #[must_use]
    pub fn short_hash(&self, id: &ResourceId, revision: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(id.namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(id.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(revision.as_bytes());

        let mut hash = hex::encode(hasher.finalize());
        hash.truncate(SHORT_HASH_LEN);
        hash
    }
}

/// Returns the sanitized ref segment of a revision.
///
/// `main/3f2a...` yields `main`; a revision without `/` is used whole.
/// Runs of characters outside `[a-z0-9]` collapse into a single `-`.
#[must_use]
pub fn revision_prefix(revision: &str) -> String {
    let segment = revision.split_once('/').map_or(revision, |(head, _)| head);

    let mut prefix = String::with_capacity(MAX_PREFIX_LEN);
    for c in segment.chars() {
        let c = c.to_ascii_lowercase();
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && (prefix.is_empty() || prefix.ends_with('-')) {
            continue;
        }
        prefix.push(c);
        if prefix.len() == MAX_PREFIX_LEN {
            break;
        }
    }

    while prefix.ends_with('-') {
        prefix.pop();
    }

    if prefix.is_empty() {
        String::from("rev")
    } else {
        prefix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fingerprint_shape() {
        let id = ResourceId::new("flux-system", "helloworld");
        let fp = Fingerprinter::new().fingerprint(&id, "master/b8e362c206e3d0cbb7ed22ced771a0056455a2fb");

        assert!(fp.starts_with("plan-master-"));
        assert_eq!(fp.len(), "plan-master-".len() + SHORT_HASH_LEN);
    }

    #[test]
    fn test_fingerprint_depends_on_identity_and_revision() {
        let fingerprinter = Fingerprinter::new();
        let a = ResourceId::new("default", "a");
        let b = ResourceId::new("default", "b");

        assert_eq!(
            fingerprinter.fingerprint(&a, "r1"),
            fingerprinter.fingerprint(&a, "r1")
        );
        assert_ne!(
            fingerprinter.fingerprint(&a, "r1"),
            fingerprinter.fingerprint(&b, "r1")
        );
        assert_ne!(
            fingerprinter.fingerprint(&a, "r1"),
            fingerprinter.fingerprint(&a, "r2")
        );
    }

    #[test]
    fn test_separator_prevents_ambiguity() {
        let fingerprinter = Fingerprinter::new();
        assert_ne!(
            fingerprinter.short_hash(&ResourceId::new("ab", "c"), "r"),
            fingerprinter.short_hash(&ResourceId::new("a", "bc"), "r")
        );
    }

    #[test]
    fn test_revision_prefix() {
        assert_eq!(revision_prefix("r1"), "r1");
        assert_eq!(revision_prefix("main/abc"), "main");
        assert_eq!(revision_prefix("Feature_X/abc"), "feature-x");
        assert_eq!(revision_prefix("sha256:deadbeef"), "sha256-deadbeef");
        assert_eq!(revision_prefix("///"), "rev");
        assert_eq!(revision_prefix(&"a".repeat(50)).len(), MAX_PREFIX_LEN);
    }

    proptest! {
        #[test]
        fn prop_fingerprint_is_a_valid_name(ns in "[a-z]{1,8}", name in "[a-z]{1,8}", revision in "\\PC{0,60}") {
            let fp = Fingerprinter::new().fingerprint(&ResourceId::new(ns, name), &revision);
            prop_assert!(fp.starts_with("plan-"));
            prop_assert!(fp.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
            prop_assert!(!fp.contains("--"));
        }
    }
}
