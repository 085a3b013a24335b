//! Planning module.
//!
//! This module fingerprints source revisions and runs the engine's plan
//! step, producing plan artifacts for the plan store.

mod fingerprint;
mod generator;
mod plan;

pub use fingerprint::{revision_prefix, Fingerprinter};
pub use generator::PlanGenerator;
pub use plan::{PlanArtifact, PlanMetadata};
