//! Durable per-stage execution state for a change (the ledger).
//!
//! The ledger lives at `.changeflow/workflow.json`. One process at a time may
//! write it, guarded by an advisory lock on `.changeflow/workflow.lock`; any
//! number of readers may load it concurrently.

mod state;
mod tracker;

pub use state::{StageExecution, StageStatus, WorkflowState, WorkflowStatus};
pub use tracker::{StatusTracker, TrackerSummary, remove_ledger, summarize};
