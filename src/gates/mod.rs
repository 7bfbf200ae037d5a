//! Quality gates: compare tool-adapter reports against lane thresholds.
//!
//! Lint, type-check, test and security adapters live outside the engine and
//! hand back a `{status, metric}` report. The gate decides whether the stage
//! may advance and, if not, what the author should do about it.

use crate::lane::Thresholds;
use serde::{Deserialize, Serialize};

/// Which quality dimension a report measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    /// Metric: fraction of passing tests (0.0-1.0)
    Tests,
    /// Metric: line coverage (0.0-1.0)
    Coverage,
    /// Metric: number of lint errors
    Lint,
    /// Metric: number of type errors
    TypeCheck,
    /// Metric: number of security findings
    Security,
}

impl GateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateKind::Tests => "tests",
            GateKind::Coverage => "coverage",
            GateKind::Lint => "lint",
            GateKind::TypeCheck => "type_check",
            GateKind::Security => "security",
        }
    }
}

impl std::fmt::Display for GateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the adapter itself ran cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    #[default]
    Ok,
    /// The tool could not run; the metric is meaningless
    Error,
}

/// A report from an external quality tool adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub gate: GateKind,
    #[serde(default)]
    pub status: GateStatus,
    pub metric: f64,
    #[serde(default)]
    pub detail: Option<String>,
}

impl GateReport {
    pub fn new(gate: GateKind, metric: f64) -> Self {
        Self {
            gate,
            status: GateStatus::Ok,
            metric,
            detail: None,
        }
    }

    pub fn errored(gate: GateKind, detail: impl Into<String>) -> Self {
        Self {
            gate,
            status: GateStatus::Error,
            metric: 0.0,
            detail: Some(detail.into()),
        }
    }
}

/// The outcome of comparing one report against the lane thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub gate: GateKind,
    pub passed: bool,
    pub metric: f64,
    /// The threshold compared against; `None` when the lane does not enforce it
    pub threshold: Option<f64>,
    #[serde(default)]
    pub remediation: Option<String>,
}

impl Thresholds {
    /// Judge a single gate report.
    pub fn evaluate(&self, report: &GateReport) -> GateVerdict {
        if report.status == GateStatus::Error {
            return GateVerdict {
                gate: report.gate,
                passed: false,
                metric: report.metric,
                threshold: None,
                remediation: Some(format!(
                    "The {} tool failed to run{}; fix the tool setup and re-run the stage",
                    report.gate,
                    report
                        .detail
                        .as_deref()
                        .map(|d| format!(" ({})", d))
                        .unwrap_or_default()
                )),
            };
        }

        let (threshold, passed, remediation) = match report.gate {
            GateKind::Tests => {
                let passed = report.metric >= self.pass_rate;
                (
                    Some(self.pass_rate),
                    passed,
                    format!(
                        "Test pass rate {:.2} is below the required {:.2}; \
                         fix failing tests before advancing",
                        report.metric, self.pass_rate
                    ),
                )
            }
            GateKind::Coverage => {
                let passed = report.metric >= self.coverage_minimum;
                (
                    Some(self.coverage_minimum),
                    passed,
                    format!(
                        "Coverage {:.2} is below the required {:.2}; add tests for uncovered code",
                        report.metric, self.coverage_minimum
                    ),
                )
            }
            GateKind::Lint => count_gate(report.metric, self.max_lint_errors, "lint errors"),
            GateKind::TypeCheck => count_gate(report.metric, self.max_type_errors, "type errors"),
            GateKind::Security => {
                let passed = !self.security_blocking || report.metric <= 0.0;
                (
                    self.security_blocking.then_some(0.0),
                    passed,
                    format!(
                        "{} security finding(s) reported; resolve or triage them before advancing",
                        report.metric
                    ),
                )
            }
        };

        GateVerdict {
            gate: report.gate,
            passed,
            metric: report.metric,
            threshold,
            remediation: (!passed).then_some(remediation),
        }
    }

    /// Judge every report; returns verdicts in report order.
    pub fn evaluate_all(&self, reports: &[GateReport]) -> Vec<GateVerdict> {
        reports.iter().map(|r| self.evaluate(r)).collect()
    }
}

fn count_gate(metric: f64, max: Option<u32>, what: &str) -> (Option<f64>, bool, String) {
    match max {
        None => (None, true, String::new()),
        Some(max) => (
            Some(f64::from(max)),
            metric <= f64::from(max),
            format!(
                "{} {} reported, at most {} allowed; fix them before advancing",
                metric, what, max
            ),
        ),
    }
}
