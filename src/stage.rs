//! Stage catalog and the contract stage bodies implement.
//!
//! The catalog is a fixed, ordered sequence. Stages 4-7 form the single
//! parallel-eligible group: they read the change but must not write
//! overlapping files, a contract stage authors uphold, not the executor.
//!
//! Stage bodies are external collaborators. The engine only needs a
//! success flag, the produced artifacts and any gate reports back.

use crate::gates::GateReport;
use crate::hooks::executor::{ShellRequest, run_shell};
use crate::lane::Lane;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// One entry in the stage catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDef {
    /// Position in the catalog
    pub number: u32,
    /// Stable identifier used in config files and hook matching
    pub name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Member of the parallel-eligible group
    pub parallel: bool,
    /// Validates code rather than documentation (excluded from `docs`)
    pub code_validation: bool,
}

const fn def(
    number: u32,
    name: &'static str,
    description: &'static str,
    parallel: bool,
    code_validation: bool,
) -> StageDef {
    StageDef {
        number,
        name,
        description,
        parallel,
        code_validation,
    }
}

static STAGES: [StageDef; 13] = [
    def(0, "initialize", "Prepare the change workspace", false, false),
    def(1, "version_bump", "Bump the version for the change", false, false),
    def(2, "spec_generation", "Generate the change specification", false, false),
    def(3, "implementation", "Apply the implementation", false, true),
    def(4, "unit_tests", "Run unit tests", true, true),
    def(5, "lint", "Run linters", true, true),
    def(6, "type_check", "Run the type checker", true, true),
    def(7, "security_scan", "Scan for security findings", true, true),
    def(8, "integration_tests", "Run integration tests", false, true),
    def(9, "documentation", "Generate documentation", false, false),
    def(10, "changelog", "Update the changelog", false, false),
    def(11, "git_operations", "Commit and tag the change", false, false),
    def(12, "final_validation", "Validate the finished change", false, false),
];

/// Every stage, in execution order.
pub fn all_stages() -> &'static [StageDef] {
    &STAGES
}

pub fn stage_by_number(number: u32) -> Option<&'static StageDef> {
    STAGES.iter().find(|s| s.number == number)
}

pub fn stage_by_name(name: &str) -> Option<&'static StageDef> {
    STAGES.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

/// Split an ordered stage list into runs: each parallel-eligible stretch
/// becomes one group, every other stage its own group.
pub fn group_stages(stages: &[&'static StageDef]) -> Vec<Vec<&'static StageDef>> {
    let mut groups: Vec<Vec<&'static StageDef>> = Vec::new();
    for &stage in stages {
        let extends_group =
            stage.parallel && groups.last().is_some_and(|g| g.iter().all(|s| s.parallel));
        if extends_group && let Some(last) = groups.last_mut() {
            last.push(stage);
        } else {
            groups.push(vec![stage]);
        }
    }
    groups
}

/// What a stage body sees when it runs.
#[derive(Debug, Clone, Serialize)]
pub struct StageContext {
    pub change_id: String,
    pub change_root: PathBuf,
    pub lane: Lane,
    pub stage: u32,
    pub stage_name: String,
}

/// What a stage body reports back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageOutcome {
    pub success: bool,
    /// Files the stage produced, relative to the change root
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
    /// Quality-gate reports from tool adapters
    #[serde(default)]
    pub gates: Vec<GateReport>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StageOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    pub fn with_gate(mut self, gate: GateReport) -> Self {
        self.gates.push(gate);
        self
    }
}

/// A stage implementation invoked by the driver.
#[async_trait]
pub trait StageBody: Send + Sync {
    async fn run(&self, ctx: &StageContext) -> Result<StageOutcome>;

    /// Artifacts that must exist after a successful run, relative to the
    /// change root.
    fn required_artifacts(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// A stage body backed by a shell command from `flow.toml`.
///
/// Exit code 0 means success. If stdout is a JSON `StageOutcome`, it is used
/// as-is (its `success` is still overridden by a non-zero exit).
#[derive(Debug, Clone)]
pub struct CommandStage {
    pub command: String,
    pub timeout: Duration,
    pub artifacts: Vec<PathBuf>,
}

impl CommandStage {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<PathBuf>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

#[async_trait]
impl StageBody for CommandStage {
    async fn run(&self, ctx: &StageContext) -> Result<StageOutcome> {
        let stdin = serde_json::to_string(ctx)?;
        let request = ShellRequest {
            command: &self.command,
            working_dir: &ctx.change_root,
            env: vec![
                ("CHANGEFLOW_CHANGE", ctx.change_id.clone()),
                ("CHANGEFLOW_STAGE", ctx.stage_name.clone()),
                ("CHANGEFLOW_LANE", ctx.lane.to_string()),
            ],
            stdin,
            timeout: self.timeout,
        };

        let Some(output) = run_shell(&request).await? else {
            return Ok(StageOutcome::failure(format!(
                "Stage command timed out after {}s",
                self.timeout.as_secs()
            )));
        };

        let exit_ok = output.exit_code == 0;
        let stdout = output.stdout.trim();

        if !stdout.is_empty()
            && let Ok(mut outcome) = serde_json::from_str::<StageOutcome>(stdout)
        {
            outcome.success &= exit_ok;
            return Ok(outcome);
        }

        if exit_ok {
            let mut outcome = StageOutcome::success();
            if !stdout.is_empty() {
                outcome.message = Some(stdout.to_string());
            }
            Ok(outcome)
        } else {
            let detail = output.detail();
            Ok(StageOutcome::failure(format!(
                "Stage command exited with code {}{}",
                output.exit_code,
                if detail.is_empty() {
                    String::new()
                } else {
                    format!(": {}", detail)
                }
            )))
        }
    }

    fn required_artifacts(&self) -> Vec<PathBuf> {
        self.artifacts.clone()
    }
}
