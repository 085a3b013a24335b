//! Apply stage.
//!
//! Runs approved plans from the plan store and commits the resulting state.

mod executor;

pub use executor::{ApplyExecutor, ApplyOutcome};
