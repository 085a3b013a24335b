//! Reconciliation controller.
//!
//! This module contains:
//! - The per-resource reconciliation state machine
//! - The deduplicating work queue with per-identity backoff
//! - The runtime driving a worker pool over the queue

mod backoff;
mod phase;
mod queue;
mod reconciler;
mod runner;

pub use backoff::Backoff;
pub use phase::{ReconcilePhase, Stage};
pub use queue::WorkQueue;
pub use reconciler::{
    ReconcileOutcome, Reconciler, ReconcilerOptions, Requeue, SOURCE_POLL_INTERVAL,
};
pub use runner::Controller;
