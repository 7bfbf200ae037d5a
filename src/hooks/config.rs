//! Hook configuration parsing and validation.
//!
//! Command hooks are loaded from:
//! - `.changeflow/hooks.toml` - Dedicated hooks configuration file
//! - `[[hooks]]` entries in `.changeflow/flow.toml`
//!
//! ```toml
//! [[hooks]]
//! stage = "lint"
//! name = "eslint-available"
//! command = "command -v eslint"
//! cache_ttl_secs = 300
//! remediation = "npm install --save-dev eslint"
//!
//! [[hooks]]
//! stage = "*_tests"
//! name = "test-db-up"
//! command = "./scripts/db-ping.sh"
//! depends_on = ["docker-running"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A single command hook definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDefinition {
    /// Stage name or glob pattern ("*_tests", "*")
    pub stage: String,

    /// Hook name, unique within a stage
    pub name: String,

    /// Command to execute via `sh -c`
    #[serde(default)]
    pub command: String,

    /// Hooks (same stage) that must pass first
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Working directory, relative to the change root
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Timeout in seconds for hook execution
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Reuse a previous result for this many seconds
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// Shown to the user when the hook fails
    #[serde(default)]
    pub remediation: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub description: Option<String>,
}

fn default_timeout() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

impl HookDefinition {
    pub fn command(
        stage: impl Into<String>,
        name: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            name: name.into(),
            command: command.into(),
            depends_on: Vec::new(),
            working_dir: None,
            timeout_secs: default_timeout(),
            cache_ttl_secs: None,
            remediation: None,
            enabled: true,
            description: None,
        }
    }

    pub fn with_depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_cache_ttl(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = Some(secs);
        self
    }

    pub fn with_remediation(mut self, text: impl Into<String>) -> Self {
        self.remediation = Some(text.into());
        self
    }

    /// Whether this hook applies to the given stage name.
    ///
    /// Exact names match case-insensitively; anything else is tried as a glob.
    pub fn matches_stage(&self, stage_name: &str) -> bool {
        if self.stage.eq_ignore_ascii_case(stage_name) {
            return true;
        }
        glob::Pattern::new(&self.stage.to_lowercase())
            .map(|p| p.matches(&stage_name.to_lowercase()))
            .unwrap_or(false)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.command.trim().is_empty() {
            warnings.push(format!(
                "Hook '{}' for stage '{}' has no command specified",
                self.name, self.stage
            ));
        }
        if self.timeout_secs == 0 {
            warnings.push(format!(
                "Hook '{}' for stage '{}' has timeout of 0 seconds",
                self.name, self.stage
            ));
        }
        if glob::Pattern::new(&self.stage).is_err() {
            warnings.push(format!(
                "Hook '{}' has an invalid stage pattern '{}'",
                self.name, self.stage
            ));
        }
        if self.depends_on.iter().any(|d| d == &self.name) {
            warnings.push(format!("Hook '{}' depends on itself", self.name));
        }

        warnings
    }
}

/// Configuration for all command hooks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub hooks: Vec<HookDefinition>,
}

impl HooksConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read hooks file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse hooks.toml")
    }

    /// Load hooks from `<state_dir>/hooks.toml`; empty if the file doesn't exist.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let hooks_path = state_dir.join("hooks.toml");
        if hooks_path.exists() {
            Self::load(&hooks_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn merge(&mut self, other: Self) {
        self.hooks.extend(other.hooks);
    }

    /// Enabled hooks applying to a stage, in definition order.
    pub fn hooks_for_stage(&self, stage_name: &str) -> Vec<&HookDefinition> {
        self.hooks
            .iter()
            .filter(|h| h.enabled && h.matches_stage(stage_name))
            .collect()
    }

    pub fn validate(&self) -> Vec<String> {
        self.hooks.iter().flat_map(|h| h.validate()).collect()
    }

    pub fn enabled_hook_count(&self) -> usize {
        self.hooks.iter().filter(|h| h.enabled).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_hooks_toml() {
        let config = HooksConfig::parse(
            r#"
[[hooks]]
stage = "lint"
name = "eslint"
command = "command -v eslint"
cache_ttl_secs = 300
remediation = "npm i -D eslint"

[[hooks]]
stage = "*_tests"
name = "db"
command = "./db.sh"
depends_on = ["docker"]
enabled = false
"#,
        )
        .unwrap();

        assert_eq!(config.hooks.len(), 2);
        assert_eq!(config.hooks[0].cache_ttl_secs, Some(300));
        assert_eq!(config.hooks[0].timeout_secs, 30);
        assert_eq!(config.hooks[1].depends_on, vec!["docker"]);
        assert_eq!(config.enabled_hook_count(), 1);
    }

    #[test]
    fn test_stage_matching() {
        let exact = HookDefinition::command("lint", "a", "true");
        assert!(exact.matches_stage("lint"));
        assert!(exact.matches_stage("LINT"));
        assert!(!exact.matches_stage("type_check"));

        let pattern = HookDefinition::command("*_tests", "b", "true");
        assert!(pattern.matches_stage("unit_tests"));
        assert!(pattern.matches_stage("integration_tests"));
        assert!(!pattern.matches_stage("lint"));

        let all = HookDefinition::command("*", "c", "true");
        assert!(all.matches_stage("changelog"));
    }

    #[test]
    fn test_hooks_for_stage_skips_disabled() {
        let mut disabled = HookDefinition::command("lint", "off", "true");
        disabled.enabled = false;
        let config = HooksConfig {
            hooks: vec![HookDefinition::command("lint", "on", "true"), disabled],
        };
        let hooks = config.hooks_for_stage("lint");
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].name, "on");
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut bad = HookDefinition::command("lint", "loop", "");
        bad.timeout_secs = 0;
        bad.depends_on = vec!["loop".into()];
        let config = HooksConfig { hooks: vec![bad] };
        let warnings = config.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("no command specified"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = HooksConfig::load_or_default(dir.path()).unwrap();
        assert!(config.hooks.is_empty());
    }

    #[test]
    fn test_merge() {
        let mut a = HooksConfig {
            hooks: vec![HookDefinition::command("lint", "a", "true")],
        };
        let b = HooksConfig {
            hooks: vec![HookDefinition::command("docs", "b", "true")],
        };
        a.merge(b);
        assert_eq!(a.hooks.len(), 2);
    }
}
