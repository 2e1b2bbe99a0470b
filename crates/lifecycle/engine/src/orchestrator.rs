//! Orchestrator - one run, end to end
//!
//! preflight -> phases -> validation -> report. Every run produces a
//! [`RunReport`], including runs aborted by discovery failure, fail-fast
//! phases, cancellation or the deadline.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lifecycle_types::{
    DeploymentPlan, OperationOutcome, OperationResult, PhaseReport, RunReport, RunState,
    SkipReason, ValidationReport,
};
use tracing::{error, info, info_span, Instrument};

use crate::cancel::CancelToken;
use crate::client::ResourceClient;
use crate::config::OrchestratorConfig;
use crate::context::RunContext;
use crate::executor::PhaseExecutor;
use crate::preflight::PreflightValidator;
use crate::sink::{ReportFanout, ReportSink};
use crate::validator::PostConditionValidator;

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Dry run: discovery and validation only
    pub what_if: bool,
    /// Overrides the configured run deadline
    pub deadline: Option<Duration>,
    /// External cancellation
    pub cancel: Option<CancelToken>,
}

impl RunOptions {
    pub fn what_if() -> Self {
        Self {
            what_if: true,
            ..Default::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Drives a plan against a control plane
pub struct Orchestrator {
    client: Arc<dyn ResourceClient>,
    config: OrchestratorConfig,
    sinks: ReportFanout,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn ResourceClient>, config: OrchestratorConfig) -> Self {
        Self {
            client,
            config,
            sinks: ReportFanout::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sinks.add(sink);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Execute `plan` and return its report
    pub async fn run(&self, plan: DeploymentPlan, options: RunOptions) -> RunReport {
        let plan = Arc::new(plan);
        let span = info_span!(
            "run",
            run_id = %plan.metadata().run_id,
            intent = %plan.metadata().intent,
            environment = %plan.metadata().environment_name,
            what_if = options.what_if
        );
        self.run_plan(plan, options).instrument(span).await
    }

    /// Evaluate the plan's checklist against current state without executing anything
    pub async fn validate(&self, plan: DeploymentPlan) -> RunReport {
        let span = info_span!("validate", run_id = %plan.metadata().run_id);
        async {
            let started_at = Utc::now();
            let validation = PostConditionValidator::new(self.client.clone())
                .inferring_in_progress()
                .validate(&plan, &BTreeSet::new())
                .await;
            let report = RunReport {
                run_id: plan.metadata().run_id.clone(),
                metadata: plan.metadata().clone(),
                what_if: true,
                state: RunState::Completed {
                    with_failures: false,
                },
                phases: Vec::new(),
                validation,
                started_at,
                finished_at: Utc::now(),
            };
            self.sinks.finish(&report).await;
            report
        }
        .instrument(span)
        .await
    }

    async fn run_plan(&self, plan: Arc<DeploymentPlan>, options: RunOptions) -> RunReport {
        let mut cancel = options.cancel.unwrap_or_else(CancelToken::never);
        if let Some(deadline) = options.deadline.or_else(|| self.config.run_deadline()) {
            cancel = cancel.with_timeout(deadline);
        }
        let ctx = RunContext::new(Arc::new(plan.metadata().clone()), options.what_if, cancel);

        info!(
            phases = plan.phases().len(),
            operations = plan.operation_count(),
            checks = plan.checks().len(),
            client = self.client.name(),
            "Run started"
        );

        let preflighted = match PreflightValidator::new(self.client.clone())
            .validate(plan.clone())
            .await
        {
            Ok(preflighted) => preflighted,
            Err(e) => {
                error!(error = %e, "Preflight failed; nothing was changed");
                let phases = self.unattempted(&plan).await;
                return self
                    .finish(
                        &ctx,
                        &plan,
                        RunState::Aborted {
                            phase: "preflight".to_string(),
                            reason: e.to_string(),
                        },
                        phases,
                        ValidationReport::not_evaluated(plan.checks(), "preflight aborted"),
                    )
                    .await;
            }
        };

        let outcome = PhaseExecutor::new(self.client.clone(), &self.config)
            .execute(&ctx, &preflighted, &self.sinks)
            .await;

        let validation = PostConditionValidator::new(self.client.clone())
            .validate(&plan, &outcome.in_progress_targets())
            .await;

        self.finish(&ctx, &plan, outcome.state, outcome.phases, validation)
            .await
    }

    async fn unattempted(&self, plan: &DeploymentPlan) -> Vec<PhaseReport> {
        let mut phases = Vec::with_capacity(plan.phases().len());
        for phase in plan.phases() {
            let mut results = Vec::with_capacity(phase.operations.len());
            for op in &phase.operations {
                let result = OperationResult::skipped(&phase.name, op, SkipReason::NotAttempted);
                self.sinks.operation(&result).await;
                results.push(result);
            }
            phases.push(PhaseReport {
                name: phase.name.clone(),
                ordinal: phase.ordinal,
                fail_fast: phase.fail_fast,
                results,
            });
        }
        phases
    }

    async fn finish(
        &self,
        ctx: &RunContext,
        plan: &DeploymentPlan,
        state: RunState,
        phases: Vec<PhaseReport>,
        validation: ValidationReport,
    ) -> RunReport {
        let report = RunReport {
            run_id: ctx.run_id.clone(),
            metadata: plan.metadata().clone(),
            what_if: ctx.what_if,
            state,
            phases,
            validation,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
        };

        info!(
            state = %report.state,
            succeeded = report.count(OperationOutcome::Succeeded),
            failed = report.count(OperationOutcome::Failed),
            in_progress = report.count(OperationOutcome::InProgress),
            score = report.validation.score(),
            "Run finished"
        );
        self.sinks.finish(&report).await;
        report
    }
}
