//! Typed error hierarchy for the changeflow engine.
//!
//! One enum per failure class, plus `WorkflowError` which wraps them all for
//! callers that only need to know a run could not proceed:
//! - `ConfigurationError`: unknown lane, missing or malformed files
//! - `PreconditionError`: a hook or quality gate refused the stage
//! - `ConcurrencyError`: hook dependency cycles, ledger writer conflicts
//! - `ResourceError`: checkpoint lookup and snapshot/restore I/O
//! - `TimeoutError`: per-task executor timeouts
//! - `ValidationError`: a stage claimed success without its artifact

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Invalid or missing configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Unknown lane '{lane}'. Valid lanes: docs, standard, heavy")]
    UnknownLane { lane: String },

    #[error("Required file missing: {path}")]
    MissingFile { path: PathBuf },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A precondition for a stage was not met.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("Hook '{hook}' failed for stage '{stage}': {message}")]
    HookFailed {
        stage: String,
        hook: String,
        message: String,
        remediation: Option<String>,
    },

    #[error("Quality gate '{gate}' failed for stage '{stage}': {remediation}")]
    GateFailed {
        stage: String,
        gate: String,
        remediation: String,
    },
}

impl PreconditionError {
    /// Remediation text attached to the failure, if any.
    pub fn remediation(&self) -> Option<&str> {
        match self {
            PreconditionError::HookFailed { remediation, .. } => remediation.as_deref(),
            PreconditionError::GateFailed { remediation, .. } => Some(remediation),
        }
    }
}

/// Coordination failures between hooks or between writers.
#[derive(Debug, Error)]
pub enum ConcurrencyError {
    #[error("Cyclic hook dependency in stage '{stage}': {}", .cycle.join(" -> "))]
    CyclicHookDependency { stage: String, cycle: Vec<String> },

    #[error("Ledger at {path} is locked by another writer")]
    LedgerLocked { path: PathBuf },
}

/// Checkpoint and filesystem failures.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("Checkpoint '{id}' not found")]
    CheckpointNotFound { id: String },

    #[error("Failed to snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to restore {path}: {source}")]
    Restore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Restored file {path} does not match its checkpoint digest")]
    DigestMismatch { path: PathBuf },

    #[error("Checkpoint ledger at {path} is unreadable: {message}")]
    CorruptLedger { path: PathBuf, message: String },
}

/// A task exceeded its time allowance.
#[derive(Debug, Error)]
pub enum TimeoutError {
    #[error("Task '{task}' timed out after {}s", .timeout.as_secs_f64())]
    TaskTimedOut { task: String, timeout: Duration },
}

/// A stage reported success but its output does not hold up.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Stage '{stage}' reported success but artifact {artifact} is missing")]
    MissingArtifact { stage: String, artifact: PathBuf },
}

/// Any failure that stops a workflow from advancing.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_lane_carries_name() {
        let err = ConfigurationError::UnknownLane {
            lane: "turbo".to_string(),
        };
        assert!(err.to_string().contains("turbo"));
        assert!(matches!(err, ConfigurationError::UnknownLane { .. }));
    }

    #[test]
    fn cyclic_dependency_lists_path() {
        let err = ConcurrencyError::CyclicHookDependency {
            stage: "lint".to_string(),
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn precondition_remediation_is_exposed() {
        let hook = PreconditionError::HookFailed {
            stage: "lint".into(),
            hook: "cargo".into(),
            message: "not found".into(),
            remediation: Some("install cargo".into()),
        };
        assert_eq!(hook.remediation(), Some("install cargo"));

        let gate = PreconditionError::GateFailed {
            stage: "unit_tests".into(),
            gate: "coverage".into(),
            remediation: "add tests".into(),
        };
        assert_eq!(gate.remediation(), Some("add tests"));
    }

    #[test]
    fn resource_error_converts_into_workflow_error() {
        let err: WorkflowError = ResourceError::CheckpointNotFound { id: "cp-1".into() }.into();
        match &err {
            WorkflowError::Resource(ResourceError::CheckpointNotFound { id }) => {
                assert_eq!(id, "cp-1")
            }
            _ => panic!("Expected Resource(CheckpointNotFound)"),
        }
    }

    #[test]
    fn timeout_error_mentions_duration() {
        let err = TimeoutError::TaskTimedOut {
            task: "lint".into(),
            timeout: Duration::from_secs(2),
        };
        assert!(err.to_string().contains("2s"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ConfigurationError::Invalid("x".into()));
        assert_std_error(&ValidationError::MissingArtifact {
            stage: "docs".into(),
            artifact: PathBuf::from("README.md"),
        });
        assert_std_error(&WorkflowError::Other(anyhow::anyhow!("boom")));
    }
}
