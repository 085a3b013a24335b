//! Resource model for the Terraform reconciler.
//!
//! This module defines the declared resource, its observable status and
//! conditions, and the storage backends the controller reads specs from
//! and writes status to.

mod condition;
mod local;
mod memory;
mod store;
mod types;

pub use condition::{reasons, Condition, ConditionStatus, ConditionType};
pub use local::LocalResourceStore;
pub use memory::MemoryResourceStore;
pub use store::ResourceStore;
pub use types::{
    ObjectMeta, OutputsTarget, PlanStatus, Resource, ResourceId, SourceReference, TerraformSpec,
    TerraformStatus, DEFAULT_WORKSPACE,
};
