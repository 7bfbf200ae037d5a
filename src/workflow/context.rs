use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::executor::ExecutorOptions;
use crate::hooks::{HookContext, HookRegistry};
use crate::lane::LanePlan;
use crate::stage::{CommandStage, StageBody, StageContext, StageDef, stage_by_name};
use crate::status::StatusTracker;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Stage bodies keyed by stage number.
pub type StageBodies = HashMap<u32, Arc<dyn StageBody>>;

/// Build a `CommandStage` for every `[stages.<name>]` entry with a command.
pub fn command_bodies(config: &Config) -> StageBodies {
    let mut bodies: StageBodies = HashMap::new();
    for (name, section) in &config.flow.stages {
        let (Some(stage), Some(command)) = (stage_by_name(name), section.command.as_deref()) else {
            continue;
        };
        let body = CommandStage::new(command, config.flow.stage_timeout(name))
            .with_artifacts(section.artifacts.clone());
        bodies.insert(stage.number, Arc::new(body));
    }
    bodies
}

/// Everything one run needs, built when the run starts and dropped when it
/// ends.
pub struct WorkflowContext {
    pub change_id: String,
    pub config: Config,
    pub plan: LanePlan,
    pub hooks: HookRegistry,
    pub checkpoints: CheckpointStore,
    pub tracker: StatusTracker,
    pub executor: ExecutorOptions,
    pub bodies: StageBodies,
}

impl WorkflowContext {
    pub fn body(&self, stage: u32) -> Option<Arc<dyn StageBody>> {
        self.bodies.get(&stage).cloned()
    }

    pub fn stage_context(&self, stage: &StageDef) -> StageContext {
        StageContext {
            change_id: self.change_id.clone(),
            change_root: self.config.root.clone(),
            lane: self.plan.lane,
            stage: stage.number,
            stage_name: stage.name.to_string(),
        }
    }

    /// `[stages.<name>] timeout_secs`, else the executor's task timeout.
    pub fn stage_timeout(&self, stage: &StageDef) -> Duration {
        self.config
            .flow
            .stage(stage.name)
            .and_then(|s| s.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or(self.executor.timeout_per_task)
    }

    pub fn hook_context(&self, stage: &StageDef) -> HookContext {
        HookContext::new(
            self.change_id.clone(),
            self.config.root.clone(),
            self.plan.lane,
            stage.name,
            stage.number,
        )
    }

    /// Snapshot the working files before `stage` runs.
    pub fn checkpoint_before(&mut self, stage: &StageDef) -> Result<String> {
        let id = self
            .checkpoints
            .create_checkpoint(stage.number, &format!("before {}", stage.name), None)?;
        Ok(id)
    }

    /// Copy the tracker's last successful stage into the checkpoint ledger.
    pub fn sync_checkpoint_progress(&mut self) -> Result<()> {
        let last = self.tracker.state().last_successful_stage;
        if self.checkpoints.last_successful_stage() != last {
            self.checkpoints.set_last_successful_stage(last)?;
        }
        Ok(())
    }
}
