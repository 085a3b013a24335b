//! Approval of stored plans.
//!
//! This module holds the declared approval policy, the persisted plan
//! ledger tracking every fingerprint's approval state, and the gate that
//! moves pending plans to approved.

mod gate;
mod ledger;
mod policy;

pub use gate::{ApprovalGate, GateDecision};
pub use ledger::{ApprovalState, LedgerEntry, PlanLedger, LEDGER_VERSION};
pub use policy::{ApprovalPolicy, AUTO_APPROVE};
