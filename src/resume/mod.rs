//! Recovery of interrupted workflows.
//!
//! An interrupted run leaves a ledger whose status is not terminal. The
//! manager offers three decisions:
//! - `Resume`: continue after the last completed stage
//! - `Restart`: delete the ledger (checkpoints are kept) and start at stage 0
//! - `Cancel`: leave everything as it is

use crate::checkpoint::CheckpointStore;
use crate::errors::{ConfigurationError, ResourceError, WorkflowError};
use crate::lane::Lane;
use crate::stage::stage_by_number;
use crate::status::{StatusTracker, WorkflowState, WorkflowStatus, remove_ledger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// What to do with an interrupted workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryDecision {
    Resume,
    Restart,
    Cancel,
}

impl RecoveryDecision {
    pub fn all() -> &'static [RecoveryDecision] {
        &[
            RecoveryDecision::Resume,
            RecoveryDecision::Restart,
            RecoveryDecision::Cancel,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryDecision::Resume => "resume",
            RecoveryDecision::Restart => "restart",
            RecoveryDecision::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for RecoveryDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RecoveryDecision {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "resume" => Ok(RecoveryDecision::Resume),
            "restart" => Ok(RecoveryDecision::Restart),
            "cancel" => Ok(RecoveryDecision::Cancel),
            other => Err(ConfigurationError::Invalid(format!(
                "unknown recovery decision '{}' (expected resume, restart or cancel)",
                other
            ))),
        }
    }
}

/// Everything the user needs to choose a decision.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryPrompt {
    pub change_id: String,
    pub run_id: Uuid,
    pub lane: Lane,
    pub status: WorkflowStatus,
    pub last_completed_stage: Option<u32>,
    pub last_completed_name: Option<String>,
    pub last_completed_at: Option<DateTime<Utc>>,
    /// Stage a resume would start at
    pub next_stage: u32,
    pub options: Vec<RecoveryDecision>,
}

/// Where and from which snapshot a workflow continues.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResumePlan {
    pub decision: RecoveryDecision,
    pub next_stage: u32,
    /// Checkpoint to restore before continuing, if one exists
    pub checkpoint: Option<String>,
}

/// Reads the ledger to detect interrupted workflows and applies recovery.
pub struct ResumptionManager {
    root: PathBuf,
}

impl ResumptionManager {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// The ledger for `change_id` if it exists and is not terminal.
    pub fn detect_incomplete(
        &self,
        change_id: &str,
    ) -> Result<Option<WorkflowState>, ResourceError> {
        let Some(state) = StatusTracker::read(&self.root)? else {
            return Ok(None);
        };
        if state.change_id != change_id || state.status.is_terminal() {
            return Ok(None);
        }
        tracing::debug!(
            change = change_id,
            run_id = %state.run_id,
            status = %state.status,
            "incomplete workflow detected"
        );
        Ok(Some(state))
    }

    pub fn recovery_options(&self, workflow: &WorkflowState) -> RecoveryPrompt {
        let last = workflow.last_completed();
        RecoveryPrompt {
            change_id: workflow.change_id.clone(),
            run_id: workflow.run_id,
            lane: workflow.lane,
            status: workflow.status,
            last_completed_stage: workflow.last_successful_stage,
            last_completed_name: workflow
                .last_successful_stage
                .and_then(stage_by_number)
                .map(|s| s.name.to_string()),
            last_completed_at: last.and_then(|s| s.finished_at),
            next_stage: next_stage(workflow),
            options: RecoveryDecision::all().to_vec(),
        }
    }

    /// Carry out a decision. `Cancel` returns `None` and changes nothing.
    pub fn apply(
        &self,
        workflow: &WorkflowState,
        decision: RecoveryDecision,
    ) -> Result<Option<ResumePlan>, WorkflowError> {
        match decision {
            RecoveryDecision::Resume => {
                let store = CheckpointStore::open(&self.root)?;
                // A snapshot of the last completed stage predates its work,
                // so restoring it means running that stage again.
                let chosen = store.latest_for_stage(next_stage(workflow)).or_else(|| {
                    workflow
                        .last_successful_stage
                        .and_then(|last| store.latest_for_stage(last))
                });
                let next = chosen.map_or(next_stage(workflow), |c| c.stage);
                let checkpoint = chosen.map(|c| c.id.clone());
                tracing::info!(
                    change = %workflow.change_id,
                    next_stage = next,
                    checkpoint = checkpoint.as_deref().unwrap_or("none"),
                    "resuming workflow"
                );
                Ok(Some(ResumePlan {
                    decision,
                    next_stage: next,
                    checkpoint,
                }))
            }
            RecoveryDecision::Restart => {
                remove_ledger(&self.root)?;
                tracing::info!(change = %workflow.change_id, "restarting workflow from stage 0");
                Ok(Some(ResumePlan {
                    decision,
                    next_stage: 0,
                    checkpoint: None,
                }))
            }
            RecoveryDecision::Cancel => {
                tracing::info!(change = %workflow.change_id, "recovery cancelled");
                Ok(None)
            }
        }
    }

    /// Edit the ledger of `change_id` outside a driver run.
    ///
    /// Takes the writer lock, applies `f`, stamps `last_updated` and persists.
    pub fn update_state(
        &self,
        change_id: &str,
        f: impl FnOnce(&mut WorkflowState),
    ) -> Result<WorkflowState, WorkflowError> {
        let mut tracker = StatusTracker::open(&self.root)?;
        if tracker.state().change_id != change_id {
            return Err(ConfigurationError::Invalid(format!(
                "ledger belongs to change '{}', not '{}'",
                tracker.state().change_id,
                change_id
            ))
            .into());
        }
        tracker.update(f)?;
        Ok(tracker.state().clone())
    }
}

fn next_stage(workflow: &WorkflowState) -> u32 {
    workflow.last_successful_stage.map_or(0, |last| last + 1)
}
