//! Plan and state persistence.
//!
//! This module provides:
//! - The `BlobStore` trait with local, S3 and in-memory backends
//! - Typed stores for plans, state, plan ledgers and outputs
//! - The controller lease guarding a store against a second controller

mod blob;
mod keys;
mod lease;
mod local;
mod memory;
mod plans;
mod s3;
mod state;

pub use blob::{BlobKey, BlobStore, Labels, PutOutcome, StoredBlob};
pub use keys::{
    lease_key, ledger_key, outputs_key, plan_key, plan_prefix, state_key, LABEL_APPLIED_PLAN,
    LABEL_CREATED_AT, LABEL_HAS_CHANGES, LABEL_OUTPUT_NAMES, LABEL_REVISION, LABEL_SAVED_PLAN,
    SYSTEM_NAMESPACE,
};
pub use lease::{generate_holder_id, ControllerLease, LeaseInfo, LEASE_EXPIRY_SECS};
pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use plans::PlanStore;
pub use s3::S3BlobStore;
pub use state::{LedgerStore, OutputStore, StateSnapshot, StateStore};
