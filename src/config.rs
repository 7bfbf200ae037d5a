use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::flow_config::FlowToml;
use crate::hooks::HooksConfig;
use crate::lane::{self, LanePlan};

/// Name of the per-change state directory.
pub const STATE_DIR: &str = ".changeflow";

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

/// The workflow ledger (`workflow.json`).
pub fn ledger_path(root: &Path) -> PathBuf {
    state_dir(root).join("workflow.json")
}

/// Advisory lock file guarding the ledger.
pub fn lock_path(root: &Path) -> PathBuf {
    state_dir(root).join("workflow.lock")
}

pub fn checkpoint_dir(root: &Path) -> PathBuf {
    state_dir(root).join("checkpoints")
}

/// Runtime configuration for a change.
///
/// Bridges `flow.toml` with the CLI flags and resolves every path the
/// engine touches under the change root.
#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub ledger_file: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    pub yes: bool,
    /// Parsed `flow.toml`
    pub flow: FlowToml,
}

impl Config {
    pub fn new(root: PathBuf, verbose: bool, yes: bool) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve change root {}", root.display()))?;
        let state_dir = state_dir(&root);
        let flow = FlowToml::load_or_default(&state_dir)?;

        for warning in flow.validate() {
            tracing::warn!(%warning, "flow.toml");
        }

        Ok(Self {
            ledger_file: ledger_path(&root),
            checkpoint_dir: checkpoint_dir(&root),
            log_dir: state_dir.join("logs"),
            state_dir,
            root,
            verbose,
            yes,
            flow,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).context("Failed to create state directory")?;
        std::fs::create_dir_all(&self.checkpoint_dir)
            .context("Failed to create checkpoint directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// Resolve the lane plan: CLI flag, then `[defaults] lane`, with any
    /// `[sla]` override applied.
    pub fn lane_plan(&self, cli_lane: Option<&str>) -> Result<LanePlan> {
        let plan = match cli_lane {
            Some(name) => lane::resolve(name)?,
            None => lane::plan_for(self.flow.defaults.lane),
        };
        Ok(match self.flow.sla_override(plan.lane) {
            Some(secs) => plan.with_sla_secs(secs),
            None => plan,
        })
    }

    /// Hooks from `hooks.toml` followed by any `[[hooks]]` in `flow.toml`.
    pub fn hooks_config(&self) -> Result<HooksConfig> {
        let mut hooks = HooksConfig::load_or_default(&self.state_dir)?;
        hooks.merge(self.flow.hooks_config());
        Ok(hooks)
    }
}
