use crate::lane::Lane;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Status of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Failed | StageStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    /// Interrupted before finishing; resumable
    Incomplete,
}

impl WorkflowStatus {
    /// Completed and failed runs are never offered for resumption.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Incomplete => "incomplete",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One stage's entry in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageExecution {
    pub stage: u32,
    pub name: String,
    pub status: StageStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall time in seconds, set once the stage is terminal
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StageExecution {
    pub fn new(stage: u32, name: impl Into<String>) -> Self {
        Self {
            stage,
            name: name.into(),
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            duration_secs: None,
            metrics: BTreeMap::new(),
            error: None,
        }
    }
}

/// The persisted ledger for one change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub change_id: String,
    pub run_id: Uuid,
    pub lane: Lane,
    /// Stage numbers the lane plan selected, in order
    #[serde(default)]
    pub planned_stages: Vec<u32>,
    /// One entry per stage number, in the order stages were first touched
    #[serde(default)]
    pub stages: Vec<StageExecution>,
    #[serde(default)]
    pub last_successful_stage: Option<u32>,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl WorkflowState {
    pub fn new(change_id: impl Into<String>, lane: Lane, planned_stages: Vec<u32>) -> Self {
        let now = Utc::now();
        Self {
            change_id: change_id.into(),
            run_id: Uuid::new_v4(),
            lane,
            planned_stages,
            stages: Vec::new(),
            last_successful_stage: None,
            status: WorkflowStatus::Running,
            started_at: now,
            last_updated: now,
            metrics: BTreeMap::new(),
        }
    }

    pub fn stage(&self, stage: u32) -> Option<&StageExecution> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// The entry for `stage`, created as pending if absent.
    pub fn stage_entry(&mut self, stage: u32, name: &str) -> &mut StageExecution {
        let index = match self.stages.iter().position(|s| s.stage == stage) {
            Some(index) => index,
            None => {
                self.stages.push(StageExecution::new(stage, name));
                self.stages.len() - 1
            }
        };
        &mut self.stages[index]
    }

    pub fn count(&self, status: StageStatus) -> usize {
        self.stages.iter().filter(|s| s.status == status).count()
    }

    /// The entry for `last_successful_stage`, if it completed.
    pub fn last_completed(&self) -> Option<&StageExecution> {
        self.last_successful_stage
            .and_then(|n| self.stage(n))
            .filter(|s| s.status == StageStatus::Completed)
    }

    /// Planned stages not yet completed or skipped.
    pub fn remaining_stages(&self) -> usize {
        self.planned_stages
            .iter()
            .filter(|n| {
                !self.stage(**n).is_some_and(|s| {
                    matches!(s.status, StageStatus::Completed | StageStatus::Skipped)
                })
            })
            .count()
    }
}
