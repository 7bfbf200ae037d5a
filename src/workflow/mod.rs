//! Runs a change through its lane plan.
//!
//! [`WorkflowDriver`] owns the configured hooks and stage bodies. Each call
//! to [`WorkflowDriver::run`] builds a fresh [`WorkflowContext`] (plan,
//! checkpoint store, ledger writer, executor settings) and drops it when the
//! run ends.

mod context;
mod driver;

pub use context::{StageBodies, WorkflowContext, command_bodies};
pub use driver::{RunOptions, StageReport, WorkflowDriver, WorkflowReport};
