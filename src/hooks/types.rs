//! Hook types shared by the registry, the command executor and the driver.
//!
//! This module defines:
//! - `HookStatus`: the four terminal states a hook can end in
//! - `HookOutcome`: what a check function returns
//! - `HookResult`: what the registry records for each hook
//! - `HookContext`: data handed to every check
//! - `HookCheck`: the trait every check implements

use crate::errors::PreconditionError;
use crate::lane::Lane;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Reason recorded on hooks skipped because a dependency did not pass.
pub const DEPENDENCY_NOT_SATISFIED: &str = "DependencyNotSatisfied";

/// Terminal status of a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    Success,
    /// Passed with a caveat; dependents still run
    Warning,
    Error,
    /// Not executed
    Skipped,
}

impl HookStatus {
    /// Whether dependents may run after this status.
    pub fn is_passable(&self) -> bool {
        matches!(self, HookStatus::Success | HookStatus::Warning)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HookStatus::Success => "success",
            HookStatus::Warning => "warning",
            HookStatus::Error => "error",
            HookStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for HookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result returned by a check function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOutcome {
    pub status: HookStatus,
    pub message: Option<String>,
}

impl HookOutcome {
    pub fn success() -> Self {
        Self {
            status: HookStatus::Success,
            message: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: HookStatus::Warning,
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HookStatus::Error,
            message: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Recorded result of one hook for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookResult {
    pub hook: String,
    pub stage: String,
    pub status: HookStatus,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    #[serde(default)]
    pub message: Option<String>,
    /// What to do about a failure
    #[serde(default)]
    pub remediation: Option<String>,
    /// Served from the result cache instead of re-running the check
    #[serde(default)]
    pub cached: bool,
}

impl HookResult {
    pub fn is_passable(&self) -> bool {
        self.status.is_passable()
    }

    /// Convert a non-passable result into the error the driver reports.
    pub fn to_precondition_error(&self) -> Option<PreconditionError> {
        if self.is_passable() {
            return None;
        }
        Some(PreconditionError::HookFailed {
            stage: self.stage.clone(),
            hook: self.hook.clone(),
            message: self
                .message
                .clone()
                .unwrap_or_else(|| self.status.to_string()),
            remediation: self.remediation.clone(),
        })
    }
}

/// Aggregate result of a bulk (diagnostic) hook run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookReport {
    pub stage: String,
    pub results: Vec<HookResult>,
    pub passed: bool,
}

impl HookReport {
    pub fn count(&self, status: HookStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

/// Context data passed to every check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookContext {
    pub change_id: String,
    pub change_root: PathBuf,
    pub lane: Lane,
    pub stage: String,
    pub stage_number: u32,
    /// Additional context data
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl HookContext {
    pub fn new(
        change_id: impl Into<String>,
        change_root: impl Into<PathBuf>,
        lane: Lane,
        stage: impl Into<String>,
        stage_number: u32,
    ) -> Self {
        Self {
            change_id: change_id.into(),
            change_root: change_root.into(),
            lane,
            stage: stage.into(),
            stage_number,
            extra: HashMap::new(),
        }
    }

    /// Add extra data to the context.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A precondition check.
///
/// An `Err` is recorded as an `error` result carrying the error text.
#[async_trait]
pub trait HookCheck: Send + Sync {
    async fn check(&self, ctx: &HookContext) -> Result<HookOutcome>;
}

/// Adapter turning a plain closure into a check.
pub struct FnCheck<F>(pub F);

#[async_trait]
impl<F> HookCheck for FnCheck<F>
where
    F: Fn(&HookContext) -> HookOutcome + Send + Sync,
{
    async fn check(&self, ctx: &HookContext) -> Result<HookOutcome> {
        Ok((self.0)(ctx))
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
