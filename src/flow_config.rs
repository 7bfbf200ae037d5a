//! Project configuration loaded from `.changeflow/flow.toml`.
//!
//! Every section and field is optional. Missing values fall back to the
//! defaults below, so an absent file behaves exactly like an empty one:
//!
//! ```toml
//! [defaults]
//! lane = "standard"
//!
//! [executor]
//! max_workers = 4
//! task_timeout_secs = 600
//!
//! [checkpoints]
//! keep = 10
//!
//! [sla]
//! heavy = 5400
//!
//! [logging]
//! file = true
//! json = false
//!
//! [stages.unit_tests]
//! command = "cargo test"
//! timeout_secs = 900
//!
//! [stages.documentation]
//! command = "./scripts/docs.sh"
//! artifacts = ["docs/index.html"]
//! ```

use crate::hooks::{HookDefinition, HooksConfig};
use crate::lane::Lane;
use crate::stage::stage_by_name;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings for every run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Lane used when `--lane` is not given
    #[serde(default)]
    pub lane: Lane,
}

/// Parallel executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Per-task timeout, measured once the task holds a worker slot
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Report results in submission order rather than completion order
    #[serde(default = "default_true")]
    pub deterministic_order: bool,
}

fn default_max_workers() -> usize {
    4
}

fn default_task_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            task_timeout_secs: default_task_timeout_secs(),
            deterministic_order: true,
        }
    }
}

/// Checkpoint retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointsSection {
    /// Number of checkpoints kept after a successful run
    #[serde(default = "default_keep")]
    pub keep: usize,
}

fn default_keep() -> usize {
    10
}

impl Default for CheckpointsSection {
    fn default() -> Self {
        Self {
            keep: default_keep(),
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Also write a daily rolling log under `.changeflow/logs/`
    #[serde(default)]
    pub file: bool,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

/// A command-backed stage body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageSection {
    #[serde(default)]
    pub command: Option<String>,
    /// Files that must exist after the command succeeds
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// The complete flow.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowToml {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub checkpoints: CheckpointsSection,
    /// SLA overrides in seconds, keyed by lane name
    #[serde(default)]
    pub sla: BTreeMap<String, u64>,
    #[serde(default)]
    pub logging: LoggingSection,
    /// Stage bodies keyed by stage name
    #[serde(default)]
    pub stages: BTreeMap<String, StageSection>,
    /// Hook definitions (alternative to hooks.toml)
    #[serde(default)]
    pub hooks: Vec<HookDefinition>,
}

impl FlowToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse flow.toml")
    }

    /// Load from `<state_dir>/flow.toml`, or defaults if the file doesn't exist.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let config_path = state_dir.join("flow.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize flow.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn sla_override(&self, lane: Lane) -> Option<u64> {
        self.sla.get(lane.as_str()).copied()
    }

    /// Body configuration for a stage, matched case-insensitively.
    pub fn stage(&self, name: &str) -> Option<&StageSection> {
        self.stages
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, section)| section)
    }

    /// Timeout for a stage command, falling back to the executor default.
    pub fn stage_timeout(&self, name: &str) -> Duration {
        let secs = self
            .stage(name)
            .and_then(|s| s.timeout_secs)
            .unwrap_or(self.executor.task_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn hooks_config(&self) -> HooksConfig {
        HooksConfig {
            hooks: self.hooks.clone(),
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.executor.max_workers == 0 {
            warnings.push("executor.max_workers is 0; at least one worker is used".to_string());
        }
        if self.executor.task_timeout_secs == 0 {
            warnings.push("executor.task_timeout_secs is 0; every task will time out".to_string());
        }

        for lane in self.sla.keys() {
            if lane.parse::<Lane>().is_err() {
                warnings.push(format!("SLA override for unknown lane '{}'", lane));
            }
        }

        for (name, section) in &self.stages {
            if stage_by_name(name).is_none() {
                warnings.push(format!("Configuration for unknown stage '{}'", name));
            }
            if section
                .command
                .as_deref()
                .is_none_or(|c| c.trim().is_empty())
            {
                warnings.push(format!("Stage '{}' has no command specified", name));
            }
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = FlowToml::parse("").unwrap();
        assert_eq!(config.defaults.lane, Lane::Standard);
        assert_eq!(config.executor.max_workers, 4);
        assert_eq!(config.executor.task_timeout_secs, 600);
        assert!(config.executor.deterministic_order);
        assert_eq!(config.checkpoints.keep, 10);
        assert!(!config.logging.file);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config = FlowToml::parse(
            r#"
[defaults]
lane = "heavy"

[executor]
max_workers = 2
task_timeout_secs = 30

[sla]
heavy = 5400

[stages.unit_tests]
command = "cargo test"
timeout_secs = 900

[stages.documentation]
command = "./docs.sh"
artifacts = ["docs/index.html"]

[[hooks]]
stage = "lint"
name = "clippy"
command = "cargo clippy --version"
"#,
        )
        .unwrap();

        assert_eq!(config.defaults.lane, Lane::Heavy);
        assert_eq!(config.executor.max_workers, 2);
        assert_eq!(config.sla_override(Lane::Heavy), Some(5400));
        assert_eq!(config.sla_override(Lane::Docs), None);
        assert_eq!(
            config.stage("Unit_Tests").unwrap().command.as_deref(),
            Some("cargo test")
        );
        assert_eq!(config.stage_timeout("unit_tests"), Duration::from_secs(900));
        assert_eq!(config.stage_timeout("documentation"), Duration::from_secs(30));
        assert_eq!(
            config.stage("documentation").unwrap().artifacts,
            vec![PathBuf::from("docs/index.html")]
        );
        assert_eq!(config.hooks_config().hooks.len(), 1);
    }

    #[test]
    fn test_validate_warnings() {
        let config = FlowToml::parse(
            r#"
[executor]
max_workers = 0

[sla]
turbo = 10

[stages.deploy]
command = "true"

[stages.lint]
"#,
        )
        .unwrap();
        let warnings = config.validate();
        assert_eq!(warnings.len(), 4);
        assert!(warnings.iter().any(|w| w.contains("turbo")));
        assert!(warnings.iter().any(|w| w.contains("unknown stage 'deploy'")));
        assert!(warnings.iter().any(|w| w.contains("'lint' has no command")));
    }

    #[test]
    fn test_invalid_lane_is_rejected() {
        assert!(FlowToml::parse("[defaults]\nlane = \"turbo\"\n").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut config = FlowToml::default();
        config.checkpoints.keep = 3;
        config.save(&dir.path().join("flow.toml")).unwrap();

        let loaded = FlowToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.checkpoints.keep, 3);
    }
}
