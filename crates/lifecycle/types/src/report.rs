//! Validation checks, validation reports and run reports.
//!
//! The score of a [`ValidationReport`] is never stored. It is recomputed from
//! the check results on every call, including when the report is serialized.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::ids::RunId;
use crate::plan::{PlanIntent, PlanMetadata};
use crate::resource::{ResourceDescriptor, StatePredicate};
use crate::result::{OperationOutcome, OperationResult};

/// A weighted post-condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    /// Unique check name.
    pub name: String,

    /// Severity weight; must be positive.
    pub weight: f64,

    /// Resource whose fresh state the predicate is evaluated against.
    pub target: ResourceDescriptor,

    /// Expected state.
    pub expect: StatePredicate,

    /// Whether the step this check verifies was requested at all. Checks
    /// that do not apply are left out of the score entirely.
    #[serde(default = "default_true")]
    pub applicable: bool,

    /// If the target's operation is still running in the background, a miss
    /// is an expected failure rather than a hard one.
    #[serde(default)]
    pub tolerate_in_progress: bool,
}

fn default_true() -> bool {
    true
}

impl ValidationCheck {
    pub fn new(
        name: impl Into<String>,
        weight: f64,
        target: ResourceDescriptor,
        expect: StatePredicate,
    ) -> Self {
        Self {
            name: name.into(),
            weight,
            target,
            expect,
            applicable: true,
            tolerate_in_progress: false,
        }
    }

    pub fn applicable(mut self, applicable: bool) -> Self {
        self.applicable = applicable;
        self
    }

    pub fn tolerate_in_progress(mut self, tolerate: bool) -> Self {
        self.tolerate_in_progress = tolerate;
        self
    }
}

/// Result status of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    /// Missed, but the target's operation is known to be still running.
    ExpectedFailure,
    /// Not requested; excluded from the score.
    NotApplicable,
}

impl CheckStatus {
    /// Counts toward the denominator of the score.
    pub fn is_counted(&self) -> bool {
        !matches!(self, CheckStatus::NotApplicable)
    }
}

/// Evaluated check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub weight: f64,
    /// Target key.
    pub target: String,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Terminal recommendation derived from a validation score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Ready,
    PartiallyReady,
    RetryRecommended,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::Ready => write!(f, "ready"),
            Recommendation::PartiallyReady => write!(f, "partially ready"),
            Recommendation::RetryRecommended => write!(f, "retry recommended"),
        }
    }
}

/// Ordered list of check results.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    checks: Vec<CheckResult>,
    evaluated: bool,
}

impl ValidationReport {
    pub fn new(checks: Vec<CheckResult>) -> Self {
        Self {
            checks,
            evaluated: true,
        }
    }

    /// Evaluated report with no checks.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Report for a run that stopped before state could be checked. Every
    /// check is recorded as failed with `reason`; the score is 0.
    pub fn not_evaluated(checks: &[ValidationCheck], reason: &str) -> Self {
        let checks = checks
            .iter()
            .map(|check| CheckResult {
                name: check.name.clone(),
                weight: check.weight,
                target: check.target.key(),
                status: CheckStatus::Failed,
                detail: Some(format!("not evaluated: {}", reason)),
            })
            .collect();
        Self {
            checks,
            evaluated: false,
        }
    }

    /// False when the run stopped before validation.
    pub fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    pub fn checks(&self) -> &[CheckResult] {
        &self.checks
    }

    /// Weighted fraction of passed checks among applicable ones.
    ///
    /// Weights are summed in sorted order so the result does not depend on
    /// check order. An empty denominator scores 1.0.
    pub fn score(&self) -> f64 {
        if !self.evaluated {
            return 0.0;
        }
        let mut counted: Vec<f64> = Vec::new();
        let mut passed: Vec<f64> = Vec::new();
        for check in &self.checks {
            if check.status.is_counted() {
                counted.push(check.weight);
                if check.status == CheckStatus::Passed {
                    passed.push(check.weight);
                }
            }
        }
        if counted.is_empty() {
            return 1.0;
        }
        if passed.len() == counted.len() {
            return 1.0;
        }
        counted.sort_by(f64::total_cmp);
        passed.sort_by(f64::total_cmp);
        // Empty float sums are -0.0.
        let total = counted.iter().fold(0.0, |acc, w| acc + w);
        let ok = passed.iter().fold(0.0, |acc, w| acc + w);
        ok / total
    }

    pub fn recommendation(&self) -> Recommendation {
        let score = self.score();
        if !self.evaluated {
            Recommendation::RetryRecommended
        } else if score >= 1.0 {
            Recommendation::Ready
        } else if score > 0.0 {
            Recommendation::PartiallyReady
        } else if self.hard_failures().is_empty() && !self.in_progress().is_empty() {
            // Only background work is outstanding.
            Recommendation::PartiallyReady
        } else {
            Recommendation::RetryRecommended
        }
    }

    /// Targets of checks that missed only because work is still in progress.
    pub fn in_progress(&self) -> Vec<&str> {
        self.with_status(CheckStatus::ExpectedFailure)
    }

    /// Names of checks that failed outright.
    pub fn hard_failures(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Failed)
            .map(|c| c.name.as_str())
            .collect()
    }

    fn with_status(&self, status: CheckStatus) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| c.status == status)
            .map(|c| c.target.as_str())
            .collect()
    }
}

impl Serialize for ValidationReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ValidationReport", 5)?;
        s.serialize_field("evaluated", &self.evaluated)?;
        s.serialize_field("checks", &self.checks)?;
        s.serialize_field("score", &self.score())?;
        s.serialize_field("recommendation", &self.recommendation())?;
        s.serialize_field("in_progress", &self.in_progress())?;
        s.end()
    }
}

/// Per-run state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Running { phase: String, ordinal: u32 },
    /// Every phase ran; continue-on-error phases may have recorded failures.
    Completed { with_failures: bool },
    /// Terminal; later phases were not run.
    Aborted { phase: String, reason: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed { .. } | RunState::Aborted { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, RunState::Aborted { .. })
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "not started"),
            RunState::Running { phase, ordinal } => write!(f, "running phase {} ({})", ordinal, phase),
            RunState::Completed { with_failures: false } => write!(f, "completed"),
            RunState::Completed { with_failures: true } => write!(f, "completed with failures"),
            RunState::Aborted { phase, reason } => write!(f, "aborted in {}: {}", phase, reason),
        }
    }
}

/// Results of one phase, in completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub name: String,
    pub ordinal: u32,
    pub fail_fast: bool,
    pub results: Vec<OperationResult>,
}

/// Process exit status derived from a run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Ready,
    ReadyWithCaveats,
    Aborted,
    RetryRecommended,
    ConfigurationError,
}

impl ExitStatus {
    pub fn code(&self) -> u8 {
        match self {
            ExitStatus::Ready | ExitStatus::ReadyWithCaveats => 0,
            ExitStatus::Aborted => 1,
            ExitStatus::RetryRecommended => 2,
            ExitStatus::ConfigurationError => 3,
        }
    }
}

/// The artifact handed to report sinks at the end of every run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub metadata: PlanMetadata,
    pub what_if: bool,
    pub state: RunState,
    pub phases: Vec<PhaseReport>,
    pub validation: ValidationReport,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Every operation result across phases.
    pub fn results(&self) -> impl Iterator<Item = &OperationResult> {
        self.phases.iter().flat_map(|p| p.results.iter())
    }

    /// Count of results with the given outcome.
    pub fn count(&self, outcome: OperationOutcome) -> usize {
        self.results().filter(|r| r.outcome == outcome).count()
    }

    /// Exit status given the caller's readiness threshold.
    pub fn exit_status(&self, threshold: f64) -> ExitStatus {
        if self.state.is_aborted() {
            return ExitStatus::Aborted;
        }
        match self.validation.recommendation() {
            Recommendation::Ready => ExitStatus::Ready,
            Recommendation::PartiallyReady
                if self.validation.score() >= threshold
                    && self.validation.in_progress().is_empty() =>
            {
                ExitStatus::ReadyWithCaveats
            }
            _ => ExitStatus::RetryRecommended,
        }
    }

    /// Human readable next step.
    pub fn next_action(&self) -> String {
        if let RunState::Aborted { phase, reason } = &self.state {
            return format!(
                "Run aborted in phase '{}' ({}). Fix the cause and re-run; completed work is left in place.",
                phase, reason
            );
        }

        let in_progress = self.validation.in_progress();
        if !in_progress.is_empty() {
            return format!(
                "Re-run validation in a few minutes: {} still in progress in the background.",
                in_progress.join(", ")
            );
        }

        match (self.validation.recommendation(), self.metadata.intent) {
            (Recommendation::Ready, PlanIntent::Provision) => {
                "Environment is ready.".to_string()
            }
            (Recommendation::Ready, PlanIntent::Decommission) => {
                "Environment has been fully removed.".to_string()
            }
            _ => format!(
                "Review failed checks and re-run: {}.",
                self.validation.hard_failures().join(", ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanMetadata;

    fn result(name: &str, weight: f64, status: CheckStatus) -> CheckResult {
        CheckResult {
            name: name.to_string(),
            weight,
            target: format!("t/{}", name),
            status,
            detail: None,
        }
    }

    fn run_report(state: RunState, checks: Vec<CheckResult>) -> RunReport {
        let metadata =
            PlanMetadata::new("dev", "eastus", "rg-dev", "tok", PlanIntent::Decommission);
        RunReport {
            run_id: metadata.run_id.clone(),
            metadata,
            what_if: false,
            state,
            phases: vec![],
            validation: ValidationReport::new(checks),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_score_weighted() {
        let report = ValidationReport::new(vec![
            result("a", 3.0, CheckStatus::Passed),
            result("b", 1.0, CheckStatus::Failed),
        ]);
        assert!((report.score() - 0.75).abs() < 1e-12);
        assert_eq!(report.recommendation(), Recommendation::PartiallyReady);
    }

    #[test]
    fn test_not_applicable_excluded_from_denominator() {
        let report = ValidationReport::new(vec![
            result("a", 1.0, CheckStatus::Passed),
            result("optional", 5.0, CheckStatus::NotApplicable),
        ]);
        assert_eq!(report.score(), 1.0);
        assert_eq!(report.recommendation(), Recommendation::Ready);
    }

    #[test]
    fn test_expected_failure_counts_but_is_not_hard() {
        let report = ValidationReport::new(vec![
            result("a", 1.0, CheckStatus::Passed),
            result("rg", 1.0, CheckStatus::ExpectedFailure),
        ]);
        assert_eq!(report.score(), 0.5);
        assert_eq!(report.in_progress(), vec!["t/rg"]);
        assert!(report.hard_failures().is_empty());
    }

    #[test]
    fn test_empty_report_is_ready() {
        assert_eq!(ValidationReport::empty().score(), 1.0);
    }

    #[test]
    fn test_not_evaluated_report_is_never_ready() {
        let checks = vec![ValidationCheck::new(
            "rg provisioned",
            1.0,
            ResourceDescriptor::new("resource_group", "rg-dev"),
            StatePredicate::ExistsHealthy,
        )];
        for report in [
            ValidationReport::not_evaluated(&checks, "preflight aborted"),
            ValidationReport::not_evaluated(&[], "preflight aborted"),
        ] {
            assert!(!report.is_evaluated());
            assert_eq!(report.score(), 0.0);
            assert_eq!(report.recommendation(), Recommendation::RetryRecommended);

            let json = serde_json::to_value(&report).unwrap();
            assert_eq!(json["evaluated"], false);
            assert_eq!(json["recommendation"], "retry_recommended");
        }

        let report = ValidationReport::not_evaluated(&checks, "preflight aborted");
        assert_eq!(report.checks()[0].status, CheckStatus::Failed);
        assert_eq!(
            report.checks()[0].detail.as_deref(),
            Some("not evaluated: preflight aborted")
        );
    }

    #[test]
    fn test_only_in_progress_deletion_is_partially_ready() {
        let report = ValidationReport::new(vec![result("rg", 1.0, CheckStatus::ExpectedFailure)]);
        assert_eq!(report.score(), 0.0);
        assert_eq!(report.recommendation(), Recommendation::PartiallyReady);

        let mixed = ValidationReport::new(vec![
            result("rg", 1.0, CheckStatus::ExpectedFailure),
            result("vm", 1.0, CheckStatus::Failed),
        ]);
        assert_eq!(mixed.recommendation(), Recommendation::RetryRecommended);
    }

    #[test]
    fn test_zero_score_serializes_without_sign() {
        let report = ValidationReport::new(vec![result("a", 1.0, CheckStatus::Failed)]);
        assert!(report.score().is_sign_positive());
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains(r#""score":0.0"#));
    }

    #[test]
    fn test_all_failed_recommends_retry() {
        let report = ValidationReport::new(vec![result("a", 1.0, CheckStatus::Failed)]);
        assert_eq!(report.score(), 0.0);
        assert_eq!(report.recommendation(), Recommendation::RetryRecommended);
    }

    #[test]
    fn test_serialized_report_carries_computed_score() {
        let report = ValidationReport::new(vec![
            result("a", 1.0, CheckStatus::Passed),
            result("b", 1.0, CheckStatus::Failed),
        ]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["score"], 0.5);
        assert_eq!(json["recommendation"], "partially_ready");
    }

    #[test]
    fn test_exit_status_mapping() {
        let aborted = run_report(
            RunState::Aborted {
                phase: "infra".into(),
                reason: "denied".into(),
            },
            vec![],
        );
        assert_eq!(aborted.exit_status(1.0), ExitStatus::Aborted);
        assert_eq!(aborted.exit_status(1.0).code(), 1);

        let ready = run_report(
            RunState::Completed {
                with_failures: false,
            },
            vec![result("a", 1.0, CheckStatus::Passed)],
        );
        assert_eq!(ready.exit_status(1.0), ExitStatus::Ready);

        let partial = vec![
            result("a", 3.0, CheckStatus::Passed),
            result("b", 1.0, CheckStatus::Failed),
        ];
        let caveats = run_report(
            RunState::Completed {
                with_failures: true,
            },
            partial.clone(),
        );
        assert_eq!(caveats.exit_status(0.7), ExitStatus::ReadyWithCaveats);
        assert_eq!(caveats.exit_status(0.9), ExitStatus::RetryRecommended);
    }

    #[test]
    fn test_in_progress_forces_retry_and_message() {
        let report = run_report(
            RunState::Completed {
                with_failures: false,
            },
            vec![
                result("vm", 1.0, CheckStatus::Passed),
                result("rg", 1.0, CheckStatus::ExpectedFailure),
            ],
        );
        assert_eq!(report.exit_status(0.1), ExitStatus::RetryRecommended);
        assert!(report.next_action().contains("t/rg"));
        assert!(report.next_action().contains("in progress"));
    }
}
