//! Lane policy: which stages run, and against which quality thresholds.
//!
//! A lane is a named execution profile. Resolution is pure and
//! deterministic, so the same lane always yields the same plan:
//!
//! | Lane       | Stages                               | Pass rate | Coverage | SLA    |
//! |------------|--------------------------------------|-----------|----------|--------|
//! | `docs`     | no code-validation stages            | 0.0       | 0.0      | 10 min |
//! | `standard` | everything but integration tests     | 0.95      | 0.80     | 30 min |
//! | `heavy`    | every stage                          | 1.0       | 0.85     | 60 min |

use crate::errors::ConfigurationError;
use crate::stage::{self, StageDef};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Named execution profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// Documentation-only changes; skips code validation.
    Docs,
    /// The default middle ground.
    #[default]
    Standard,
    /// Every stage, strictest thresholds.
    Heavy,
}

impl Lane {
    pub fn all() -> &'static [Lane] {
        &[Lane::Docs, Lane::Standard, Lane::Heavy]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Docs => "docs",
            Lane::Standard => "standard",
            Lane::Heavy => "heavy",
        }
    }

    /// Stage numbers this lane leaves out of the catalog.
    fn excluded_stages(&self) -> &'static [u32] {
        match self {
            Lane::Docs => &[3, 4, 5, 6, 7, 8],
            Lane::Standard => &[8],
            Lane::Heavy => &[],
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        match self {
            Lane::Docs => Thresholds {
                pass_rate: 0.0,
                coverage_minimum: 0.0,
                max_lint_errors: None,
                max_type_errors: None,
                security_blocking: false,
                sla_secs: 600,
            },
            Lane::Standard => Thresholds {
                pass_rate: 0.95,
                coverage_minimum: 0.80,
                max_lint_errors: Some(0),
                max_type_errors: Some(0),
                security_blocking: true,
                sla_secs: 1800,
            },
            Lane::Heavy => Thresholds {
                pass_rate: 1.0,
                coverage_minimum: 0.85,
                max_lint_errors: Some(0),
                max_type_errors: Some(0),
                security_blocking: true,
                sla_secs: 3600,
            },
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Lane {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "docs" => Ok(Lane::Docs),
            "standard" => Ok(Lane::Standard),
            "heavy" => Ok(Lane::Heavy),
            _ => Err(ConfigurationError::UnknownLane {
                lane: s.to_string(),
            }),
        }
    }
}

/// Quality thresholds a lane applies to gate reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum fraction of passing tests (0.0-1.0)
    pub pass_rate: f64,
    /// Minimum line coverage (0.0-1.0)
    pub coverage_minimum: f64,
    /// Maximum lint errors tolerated; `None` means unbounded
    pub max_lint_errors: Option<u32>,
    /// Maximum type-check errors tolerated; `None` means unbounded
    pub max_type_errors: Option<u32>,
    /// Whether any security finding blocks the stage
    pub security_blocking: bool,
    /// Target wall time for a full workflow run, in seconds
    pub sla_secs: u64,
}

impl Thresholds {
    pub fn sla(&self) -> Duration {
        Duration::from_secs(self.sla_secs)
    }
}

/// The resolved plan for a lane: ordered stages plus thresholds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanePlan {
    pub lane: Lane,
    pub stages: Vec<&'static StageDef>,
    pub thresholds: Thresholds,
}

impl LanePlan {
    /// Whether the plan includes the given stage number.
    pub fn contains(&self, stage: u32) -> bool {
        self.stages.iter().any(|s| s.number == stage)
    }

    /// Stages with a number greater than or equal to `from`, in order.
    pub fn stages_from(&self, from: u32) -> Vec<&'static StageDef> {
        self.stages
            .iter()
            .copied()
            .filter(|s| s.number >= from)
            .collect()
    }

    pub fn stage_numbers(&self) -> Vec<u32> {
        self.stages.iter().map(|s| s.number).collect()
    }

    /// Replace the SLA target, e.g. from a project override.
    pub fn with_sla_secs(mut self, secs: u64) -> Self {
        self.thresholds.sla_secs = secs;
        self
    }
}

/// Resolve a lane name to its ordered stage list and thresholds.
pub fn resolve(lane: &str) -> Result<LanePlan, ConfigurationError> {
    let lane: Lane = lane.parse()?;
    Ok(plan_for(lane))
}

/// Build the plan for an already-parsed lane.
pub fn plan_for(lane: Lane) -> LanePlan {
    let excluded = lane.excluded_stages();
    let stages = stage::all_stages()
        .iter()
        .filter(|s| !excluded.contains(&s.number))
        .collect();

    LanePlan {
        lane,
        stages,
        thresholds: lane.thresholds(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_docs_excludes_code_validation() {
        let plan = resolve("docs").unwrap();
        assert_eq!(plan.lane, Lane::Docs);
        assert_eq!(plan.stage_numbers(), vec![0, 1, 2, 9, 10, 11, 12]);
        assert!(plan.stages.iter().all(|s| !s.code_validation));
        assert!(!plan.contains(4));
    }

    #[test]
    fn test_resolve_heavy_includes_everything() {
        let plan = resolve("heavy").unwrap();
        assert_eq!(plan.stages.len(), stage::all_stages().len());
        assert_eq!(plan.thresholds.coverage_minimum, 0.85);
        assert_eq!(plan.thresholds.pass_rate, 1.0);
        assert!(plan.thresholds.security_blocking);
    }

    #[test]
    fn test_resolve_standard_is_middle_ground() {
        let plan = resolve("standard").unwrap();
        assert!(!plan.contains(8));
        assert!(plan.contains(4));
        assert_eq!(plan.thresholds.pass_rate, 0.95);
        assert_eq!(plan.thresholds.sla(), Duration::from_secs(1800));
    }

    #[test]
    fn test_resolve_unknown_is_configuration_error() {
        let err = resolve("unknown").unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownLane { ref lane } if lane == "unknown"));
    }

    #[test]
    fn test_resolve_is_deterministic_and_case_insensitive() {
        assert_eq!(resolve("HEAVY").unwrap(), resolve("heavy").unwrap());
        assert_eq!(resolve("docs").unwrap(), resolve("docs").unwrap());
    }

    #[test]
    fn test_stages_are_ordered() {
        for lane in Lane::all() {
            let numbers = plan_for(*lane).stage_numbers();
            let mut sorted = numbers.clone();
            sorted.sort_unstable();
            assert_eq!(numbers, sorted, "lane {} out of order", lane);
        }
    }

    #[test]
    fn test_stages_from() {
        let plan = resolve("standard").unwrap();
        let rest: Vec<u32> = plan.stages_from(9).iter().map(|s| s.number).collect();
        assert_eq!(rest, vec![9, 10, 11, 12]);
    }

    #[test]
    fn test_lane_serde_roundtrip_uses_lowercase() {
        let json = serde_json::to_string(&Lane::Heavy).unwrap();
        assert_eq!(json, "\"heavy\"");
        let lane: Lane = serde_json::from_str("\"docs\"").unwrap();
        assert_eq!(lane, Lane::Docs);
    }
}
