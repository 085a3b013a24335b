// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # tf-reconciler
//!
//! A declarative reconciliation controller for Terraform resources whose
//! configuration comes from versioned source artifacts.
//!
//! ## Overview
//!
//! Each declared resource points at a source (a versioned tarball of
//! Terraform configuration). For every new source revision the controller:
//!
//! - Materializes the artifact into a per-revision workspace
//! - Generates a plan and stores it under a deterministic fingerprint
//! - Waits for approval (`approvePlan: auto` or the exact fingerprint)
//! - Applies exactly the stored plan and persists the new state
//! - Publishes the engine's outputs
//!
//! Every transition is reported as typed status conditions.
//!
//! ## Architecture
//!
//! The stores are the source of truth and status is a projection of them:
//!
//! 1. **Plan store**: immutable plans keyed by fingerprint
//! 2. **State store**: the latest applied state per resource and workspace
//! 3. **Plan ledger**: the approval state of every fingerprint
//!
//! A reconciliation pass reads all three, advances the resource by at most
//! one plan and one apply, and writes the status back.
//!
//! ## Modules
//!
//! - [`config`]: Controller settings and manifest validation
//! - [`resource`]: Declared resources, status and conditions
//! - [`source`]: Source artifacts and workspace materialization
//! - [`store`]: Plan, state, ledger and output persistence (local, S3)
//! - [`planner`]: Fingerprints and plan generation
//! - [`approval`]: Approval policy, plan ledger and gate
//! - [`engine`]: The Terraform engine adapter
//! - [`apply`]: Applying approved plans
//! - [`outputs`]: Output extraction
//! - [`controller`]: The reconciliation state machine and runtime
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: infra.contrib.fluxcd.io/v1alpha1
//! kind: Terraform
//! metadata:
//!   name: helloworld
//!   namespace: flux-system
//! spec:
//!   sourceRef:
//!     kind: GitRepository
//!     name: helloworld
//!   path: ./
//!   approvePlan: auto
//!   writeOutputsToSecret:
//!     name: helloworld-output
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod apply;
pub mod approval;
pub mod cli;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod outputs;
pub mod planner;
pub mod resource;
pub mod source;
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use apply::{ApplyExecutor, ApplyOutcome};
pub use approval::{ApprovalGate, ApprovalPolicy, ApprovalState, PlanLedger};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, ControllerSettings};
pub use controller::{Controller, ReconcileOutcome, ReconcilePhase, Reconciler, Requeue};
pub use engine::{Engine, TerraformEngine};
pub use error::{ReconcilerError, Result};
pub use outputs::{OutputExtractor, OutputSet};
pub use planner::{Fingerprinter, PlanArtifact, PlanGenerator};
pub use resource::{Resource, ResourceId, ResourceStore, TerraformSpec, TerraformStatus};
pub use source::{SourceArtifact, SourceProvider, WorkspaceMaterializer};
pub use store::{BlobStore, LedgerStore, PlanStore, StateStore};
