use super::context::{StageBodies, WorkflowContext, command_bodies};
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::errors::{ConfigurationError, PreconditionError, TimeoutError, ValidationError};
use crate::executor::{
    ExecutorOptions, ExecutorSummary, ParallelExecutor, StageTask, TaskResult, TaskStatus,
};
use crate::gates::GateVerdict;
use crate::hooks::{HookRegistry, HookResult};
use crate::lane::{Lane, LanePlan};
use crate::resume::ResumePlan;
use crate::stage::{StageBody, StageDef, StageOutcome, group_stages};
use crate::status::{StageStatus, StatusTracker, TrackerSummary, WorkflowStatus};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const NO_BODY: &str = "no stage body configured";

/// Options for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub change_id: String,
    /// Lane name; falls back to `[defaults] lane`
    pub lane: Option<String>,
    /// Resolve and report the plan without touching any file
    pub dry_run: bool,
    /// Skip every hook (logged once as a warning)
    pub force_hooks: bool,
    pub workers: Option<usize>,
    pub task_timeout: Option<Duration>,
    /// First stage of a fresh run
    pub start_stage: Option<u32>,
    /// Continue the existing ledger instead of starting a new one
    pub resume: Option<ResumePlan>,
}

impl RunOptions {
    pub fn new(change_id: impl Into<String>) -> Self {
        Self {
            change_id: change_id.into(),
            ..Default::default()
        }
    }
}

/// What happened to one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: u32,
    pub name: String,
    pub status: StageStatus,
    /// Checkpoint taken before the stage ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<HookResult>,
    /// Hook names that would run (dry-run only)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned_hooks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gates: Vec<GateVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl StageReport {
    fn new(stage: &StageDef) -> Self {
        Self {
            stage: stage.number,
            name: stage.name.to_string(),
            status: StageStatus::Pending,
            checkpoint: None,
            hooks: Vec::new(),
            planned_hooks: Vec::new(),
            gates: Vec::new(),
            message: None,
            error: None,
            remediation: None,
        }
    }
}

/// The structured result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub change_id: String,
    pub lane: Lane,
    pub dry_run: bool,
    pub success: bool,
    /// Stopped by Ctrl-C; the ledger is resumable
    pub interrupted: bool,
    pub stages: Vec<StageReport>,
    pub hook_results: Vec<HookResult>,
    pub executor_summary: ExecutorSummary,
    pub tracker_summary: Option<TrackerSummary>,
}

impl WorkflowReport {
    fn new(change_id: &str, lane: Lane, dry_run: bool) -> Self {
        Self {
            change_id: change_id.to_string(),
            lane,
            dry_run,
            success: false,
            interrupted: false,
            stages: Vec::new(),
            hook_results: Vec::new(),
            executor_summary: ExecutorSummary::default(),
            tracker_summary: None,
        }
    }

    /// Record a stage; returns whether the workflow may advance past it.
    fn push(&mut self, stage: StageReport) -> bool {
        let advance = stage.status != StageStatus::Failed;
        self.hook_results.extend(stage.hooks.iter().cloned());
        self.stages.push(stage);
        advance
    }

    pub fn stage(&self, number: u32) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == number)
    }

    pub fn failed_stage(&self) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.status == StageStatus::Failed)
    }
}

/// Runs a change through its lane plan.
///
/// Per stage: checkpoint, hooks, body, artifact validation, quality gates,
/// ledger update. Consecutive parallel-eligible stages run as one executor
/// batch; a failure anywhere stops advancement once its batch has finished.
pub struct WorkflowDriver {
    config: Config,
    hooks: HookRegistry,
    bodies: StageBodies,
}

impl WorkflowDriver {
    /// A driver with the configured command hooks and command stages.
    pub fn new(config: Config) -> Result<Self> {
        let hooks_config = config.hooks_config()?;
        for warning in hooks_config.validate() {
            warn!(%warning, "hook configuration");
        }
        let hooks = HookRegistry::from_config(&hooks_config);
        for warning in hooks.validate() {
            warn!(%warning, "hook registry");
        }
        let bodies = command_bodies(&config);
        Ok(Self {
            config,
            hooks,
            bodies,
        })
    }

    /// Install or replace the body of a stage.
    pub fn with_body(mut self, stage: u32, body: impl StageBody + 'static) -> Self {
        self.bodies.insert(stage, Arc::new(body));
        self
    }

    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run(self, options: RunOptions) -> Result<WorkflowReport> {
        let mut plan = self.config.lane_plan(options.lane.as_deref())?;
        if options.dry_run {
            return Ok(self.dry_run_report(&plan, &options));
        }

        self.config.ensure_directories()?;
        let executor = ExecutorOptions {
            max_workers: options
                .workers
                .unwrap_or(self.config.flow.executor.max_workers),
            timeout_per_task: options.task_timeout.unwrap_or_else(|| {
                Duration::from_secs(self.config.flow.executor.task_timeout_secs)
            }),
            deterministic_order: self.config.flow.executor.deterministic_order,
        };

        let root = self.config.root.clone();
        let mut checkpoints =
            CheckpointStore::open(&root).context("Failed to open checkpoint store")?;
        let (tracker, start) = match &options.resume {
            Some(resume) => {
                let mut tracker = StatusTracker::open(&root)?;
                if tracker.state().change_id != options.change_id {
                    return Err(ConfigurationError::Invalid(format!(
                        "ledger belongs to change '{}', not '{}'",
                        tracker.state().change_id,
                        options.change_id
                    ))
                    .into());
                }
                let ledger_lane = tracker.state().lane;
                if ledger_lane != plan.lane {
                    if options.lane.is_some() {
                        return Err(ConfigurationError::Invalid(format!(
                            "change '{}' was started in the {} lane and cannot resume as {}",
                            options.change_id, ledger_lane, plan.lane
                        ))
                        .into());
                    }
                    plan = self.config.lane_plan(Some(ledger_lane.as_str()))?;
                }
                tracker.set_plan(&plan)?;
                if let Some(id) = &resume.checkpoint {
                    let outcome = checkpoints.rollback(id)?;
                    tracker.rollback_to(outcome.last_successful_stage)?;
                }
                (tracker, resume.next_stage)
            }
            None => (
                StatusTracker::create(&root, &options.change_id, &plan)?,
                options.start_stage.unwrap_or(0),
            ),
        };

        let mut ctx = WorkflowContext {
            change_id: options.change_id.clone(),
            config: self.config,
            plan,
            hooks: self.hooks,
            checkpoints,
            tracker,
            executor,
            bodies: self.bodies,
        };
        let stages = ctx.plan.stages_from(start);
        let mut report = WorkflowReport::new(&options.change_id, ctx.plan.lane, false);

        info!(
            change = %options.change_id,
            lane = %ctx.plan.lane,
            start,
            stages = stages.len(),
            "workflow started"
        );
        if options.force_hooks {
            warn!(change = %options.change_id, "hooks bypassed for this run (--force-hooks)");
        }

        let outcome = {
            let run = run_stages(&mut ctx, &stages, &options, &mut report);
            tokio::select! {
                result = run => Some(result),
                _ = tokio::signal::ctrl_c() => None,
            }
        };

        match outcome {
            None => {
                report.interrupted = true;
                ctx.tracker.mark_incomplete()?;
            }
            Some(Err(e)) => {
                if let Err(mark) = ctx.tracker.mark_incomplete() {
                    warn!(error = %mark, "could not mark workflow incomplete");
                }
                return Err(e);
            }
            Some(Ok(())) => {
                report.success = report.failed_stage().is_none();
                let status = if report.success {
                    WorkflowStatus::Completed
                } else {
                    WorkflowStatus::Failed
                };
                ctx.tracker.finish(status)?;
                if report.success {
                    let removed = ctx.checkpoints.cleanup(ctx.config.flow.checkpoints.keep)?;
                    debug!(removed = removed.len(), "old checkpoints removed");
                }
            }
        }

        ctx.sync_checkpoint_progress()?;
        report.tracker_summary = Some(ctx.tracker.summary());
        Ok(report)
    }

    fn dry_run_report(&self, plan: &LanePlan, options: &RunOptions) -> WorkflowReport {
        let start = options
            .resume
            .as_ref()
            .map(|r| r.next_stage)
            .or(options.start_stage)
            .unwrap_or(0);
        let mut report = WorkflowReport::new(&options.change_id, plan.lane, true);
        for stage in plan.stages_from(start) {
            let mut stage_report = StageReport::new(stage);
            if !self.bodies.contains_key(&stage.number) {
                stage_report.status = StageStatus::Skipped;
                stage_report.message = Some(NO_BODY.to_string());
            }
            stage_report.planned_hooks = self
                .hooks
                .hooks_for(stage.name)
                .into_iter()
                .map(str::to_string)
                .collect();
            report.stages.push(stage_report);
        }
        report.success = true;
        info!(
            change = %options.change_id,
            lane = %plan.lane,
            stages = report.stages.len(),
            "dry run resolved plan"
        );
        report
    }
}

async fn run_stages(
    ctx: &mut WorkflowContext,
    stages: &[&'static StageDef],
    options: &RunOptions,
    report: &mut WorkflowReport,
) -> Result<()> {
    for group in group_stages(stages) {
        let advance = match group.as_slice() {
            [stage] => run_stage(ctx, stage, options, report).await?,
            batch => run_parallel_group(ctx, batch, options, report).await?,
        };
        if !advance {
            info!(change = %ctx.change_id, "workflow halted after a failed stage");
            break;
        }
    }
    Ok(())
}

enum Prepared {
    /// Finished before the body ran (skipped or blocked)
    Done(StageReport),
    Ready(StageReport, Arc<dyn StageBody>),
}

/// Checkpoint, mark running and run hooks.
async fn prepare(
    ctx: &mut WorkflowContext,
    stage: &StageDef,
    options: &RunOptions,
) -> Result<Prepared> {
    let mut stage_report = StageReport::new(stage);
    let Some(body) = ctx.body(stage.number) else {
        ctx.tracker.skip_stage(stage, NO_BODY)?;
        stage_report.status = StageStatus::Skipped;
        stage_report.message = Some(NO_BODY.to_string());
        return Ok(Prepared::Done(stage_report));
    };

    stage_report.checkpoint = Some(ctx.checkpoint_before(stage)?);
    ctx.tracker.start_stage(stage)?;

    if !options.force_hooks {
        let hook_ctx = ctx.hook_context(stage);
        let hook_results = ctx.hooks.run(stage.name, &hook_ctx, true).await;
        match hook_results {
            Ok(results) => {
                let blocked = results.iter().find_map(HookResult::to_precondition_error);
                stage_report.hooks = results;
                if let Some(err) = blocked {
                    let remediation = err.remediation().map(str::to_string);
                    let done = fail(
                        ctx,
                        stage,
                        stage_report,
                        err.to_string(),
                        remediation,
                        BTreeMap::new(),
                    )?;
                    return Ok(Prepared::Done(done));
                }
            }
            Err(err) => {
                let done =
                    fail(ctx, stage, stage_report, err.to_string(), None, BTreeMap::new())?;
                return Ok(Prepared::Done(done));
            }
        }
    }

    Ok(Prepared::Ready(stage_report, body))
}

async fn run_stage(
    ctx: &mut WorkflowContext,
    stage: &StageDef,
    options: &RunOptions,
    report: &mut WorkflowReport,
) -> Result<bool> {
    let (stage_report, body) = match prepare(ctx, stage, options).await? {
        Prepared::Done(done) => return Ok(report.push(done)),
        Prepared::Ready(stage_report, body) => (stage_report, body),
    };

    let stage_ctx = ctx.stage_context(stage);
    let limit = ctx.stage_timeout(stage);
    let result = match tokio::time::timeout(limit, body.run(&stage_ctx)).await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(_) => Err(TimeoutError::TaskTimedOut {
            task: stage.name.to_string(),
            timeout: limit,
        }
        .to_string()),
    };

    let done = conclude(ctx, stage, stage_report, body.as_ref(), result)?;
    Ok(report.push(done))
}

async fn run_parallel_group(
    ctx: &mut WorkflowContext,
    group: &[&'static StageDef],
    options: &RunOptions,
    report: &mut WorkflowReport,
) -> Result<bool> {
    let mut advance = true;
    let mut pending = Vec::new();
    for &stage in group {
        match prepare(ctx, stage, options).await? {
            Prepared::Done(done) => advance &= report.push(done),
            Prepared::Ready(stage_report, body) => pending.push((stage, stage_report, body)),
        }
    }
    if pending.is_empty() {
        return Ok(advance);
    }

    let tasks: Vec<StageTask> = pending
        .iter()
        .map(|(stage, _, body)| {
            let body = Arc::clone(body);
            let stage_ctx = ctx.stage_context(stage);
            StageTask::from_async(stage.number, stage.name, Value::Null, move |_| async move {
                let outcome = body.run(&stage_ctx).await?;
                let value = serde_json::to_value(outcome)?;
                anyhow::Ok(value)
            })
        })
        .collect();

    let names: Vec<&str> = pending.iter().map(|(stage, _, _)| stage.name).collect();
    info!(stages = ?names, workers = ctx.executor.max_workers, "running parallel group");

    let results = ParallelExecutor::new(ctx.executor.clone()).submit(tasks).await;
    report
        .executor_summary
        .merge(&ExecutorSummary::from_results(&results));

    let mut by_stage: HashMap<u32, TaskResult> = results.into_iter().map(|r| (r.id, r)).collect();
    for (stage, stage_report, body) in pending {
        let result = match by_stage.remove(&stage.number) {
            Some(task) => task_outcome(task),
            None => Err("the executor returned no result for this stage".to_string()),
        };
        let done = conclude(ctx, stage, stage_report, body.as_ref(), result)?;
        advance &= report.push(done);
    }
    Ok(advance)
}

fn task_outcome(task: TaskResult) -> Result<StageOutcome, String> {
    match (task.status, task.output) {
        (TaskStatus::Completed, Some(value)) => serde_json::from_value(value)
            .map_err(|e| format!("stage returned an unreadable outcome: {}", e)),
        (status, _) => Err(task.error.unwrap_or_else(|| status.to_string())),
    }
}

/// Validate artifacts and gates for a body result, then update the ledger.
fn conclude(
    ctx: &mut WorkflowContext,
    stage: &StageDef,
    mut stage_report: StageReport,
    body: &dyn StageBody,
    result: Result<StageOutcome, String>,
) -> Result<StageReport> {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(error) => return fail(ctx, stage, stage_report, error, None, BTreeMap::new()),
    };
    stage_report.message = outcome.message.clone();

    if !outcome.success {
        let error = outcome
            .message
            .clone()
            .unwrap_or_else(|| "stage reported failure".to_string());
        return fail(ctx, stage, stage_report, error, None, outcome.metrics);
    }

    let required = body.required_artifacts();
    let artifacts = required.iter().chain(&outcome.artifacts);
    if let Some(err) = missing_artifact(&ctx.config.root, stage, artifacts) {
        return fail(ctx, stage, stage_report, err.to_string(), None, outcome.metrics);
    }

    let verdicts = ctx.plan.thresholds.evaluate_all(&outcome.gates);
    let gate_failure = verdicts
        .iter()
        .find(|v| !v.passed)
        .map(|v| PreconditionError::GateFailed {
            stage: stage.name.to_string(),
            gate: v.gate.to_string(),
            remediation: v.remediation.clone().unwrap_or_default(),
        });
    stage_report.gates = verdicts;
    if let Some(err) = gate_failure {
        let remediation = err.remediation().map(str::to_string);
        return fail(ctx, stage, stage_report, err.to_string(), remediation, outcome.metrics);
    }

    ctx.tracker
        .complete_stage(stage, true, outcome.metrics, None)?;
    ctx.sync_checkpoint_progress()?;
    stage_report.status = StageStatus::Completed;
    Ok(stage_report)
}

fn fail(
    ctx: &mut WorkflowContext,
    stage: &StageDef,
    mut stage_report: StageReport,
    error: String,
    remediation: Option<String>,
    metrics: BTreeMap<String, Value>,
) -> Result<StageReport> {
    warn!(stage = stage.number, name = stage.name, %error, "stage failed");
    ctx.tracker
        .complete_stage(stage, false, metrics, Some(error.clone()))?;
    stage_report.status = StageStatus::Failed;
    stage_report.error = Some(error);
    stage_report.remediation = remediation;
    Ok(stage_report)
}

fn missing_artifact<'a>(
    root: &Path,
    stage: &StageDef,
    artifacts: impl IntoIterator<Item = &'a PathBuf>,
) -> Option<ValidationError> {
    artifacts
        .into_iter()
        .find(|artifact| !root.join(artifact).exists())
        .map(|artifact| ValidationError::MissingArtifact {
            stage: stage.name.to_string(),
            artifact: artifact.clone(),
        })
}
