//! Phase executor.
//!
//! Runs phases strictly in ordinal order and drives the per-run state
//! machine `NotStarted -> Running(phase) -> ... -> Completed | Aborted`.
//! Within a phase, operations run one at a time unless both the phase and
//! the configuration allow concurrency, in which case they are joined
//! before the phase ends.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use lifecycle_types::{
    Operation, OperationOutcome, OperationResult, Phase, PhaseReport, RunState, SkipReason,
};
use tracing::{info, warn};

use crate::client::ResourceClient;
use crate::config::OrchestratorConfig;
use crate::context::RunContext;
use crate::preflight::PreflightedPlan;
use crate::retry::RetryingOperationRunner;
use crate::sink::ReportFanout;

/// What the executor hands back to the orchestrator.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub state: RunState,
    pub phases: Vec<PhaseReport>,
}

impl ExecutionOutcome {
    /// Targets whose operation was accepted but had not finished.
    pub fn in_progress_targets(&self) -> BTreeSet<String> {
        self.phases
            .iter()
            .flat_map(|p| p.results.iter())
            .filter(|r| r.outcome == OperationOutcome::InProgress)
            .map(|r| r.target.clone())
            .collect()
    }
}

/// Sequences phases and their operations.
pub struct PhaseExecutor {
    runner: RetryingOperationRunner,
    parallel_phases: bool,
}

impl PhaseExecutor {
    pub fn new(client: Arc<dyn ResourceClient>, config: &OrchestratorConfig) -> Self {
        Self {
            runner: RetryingOperationRunner::new(client, config),
            parallel_phases: config.parallel_phases,
        }
    }

    /// Execute every phase of a preflighted plan.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        preflighted: &PreflightedPlan,
        sinks: &ReportFanout,
    ) -> ExecutionOutcome {
        let phases = preflighted.plan.phases();
        let mut state = RunState::NotStarted;
        let mut reports: Vec<PhaseReport> = Vec::with_capacity(phases.len());
        let mut with_failures = false;

        for phase in phases {
            if state.is_aborted() {
                reports.push(self.not_attempted(phase, sinks).await);
                continue;
            }

            if let Some(reason) = ctx.cancel.interruption() {
                warn!(phase = %phase.name, reason = %reason, "Run interrupted before phase");
                state = RunState::Aborted {
                    phase: phase.name.clone(),
                    reason: reason.to_string(),
                };
                reports.push(self.not_attempted(phase, sinks).await);
                continue;
            }

            state = RunState::Running {
                phase: phase.name.clone(),
                ordinal: phase.ordinal,
            };
            info!(
                phase = %phase.name,
                ordinal = phase.ordinal,
                operations = phase.operations.len(),
                fail_fast = phase.fail_fast,
                "Starting phase"
            );

            let (results, abort) = if self.parallel_phases && phase.parallel {
                self.run_concurrent(ctx, preflighted, phase, sinks).await
            } else {
                self.run_serial(ctx, preflighted, phase, sinks).await
            };

            let failed = results.iter().filter(|r| r.outcome.is_failure()).count();
            with_failures |= failed > 0;
            info!(phase = %phase.name, failed, "Phase finished");

            reports.push(PhaseReport {
                name: phase.name.clone(),
                ordinal: phase.ordinal,
                fail_fast: phase.fail_fast,
                results,
            });

            if let Some(reason) = abort {
                warn!(phase = %phase.name, reason = %reason, "Aborting run");
                state = RunState::Aborted {
                    phase: phase.name.clone(),
                    reason,
                };
            }
        }

        if !state.is_terminal() {
            state = RunState::Completed { with_failures };
        }
        ExecutionOutcome {
            state,
            phases: reports,
        }
    }

    async fn run_serial(
        &self,
        ctx: &RunContext,
        preflighted: &PreflightedPlan,
        phase: &Phase,
        sinks: &ReportFanout,
    ) -> (Vec<OperationResult>, Option<String>) {
        let mut results = Vec::with_capacity(phase.operations.len());
        let mut abort: Option<String> = None;

        for op in &phase.operations {
            let result = if abort.is_some() {
                OperationResult::skipped(&phase.name, op, SkipReason::NotAttempted)
            } else if let Some(reason) = ctx.cancel.interruption() {
                abort = Some(reason.to_string());
                OperationResult::skipped(&phase.name, op, SkipReason::NotAttempted)
            } else {
                let result = self.run_operation(ctx, preflighted, phase, op, sinks).await;
                let abandoned =
                    result.outcome == OperationOutcome::Skipped(SkipReason::NotAttempted);
                if abandoned || (phase.fail_fast && result.outcome.is_failure()) {
                    // An interruption outranks the failure it may have caused.
                    abort = Some(match ctx.cancel.interruption() {
                        Some(reason) => reason.to_string(),
                        None => failure_reason(&result),
                    });
                }
                result
            };
            sinks.operation(&result).await;
            results.push(result);
        }

        (results, abort)
    }

    async fn run_concurrent(
        &self,
        ctx: &RunContext,
        preflighted: &PreflightedPlan,
        phase: &Phase,
        sinks: &ReportFanout,
    ) -> (Vec<OperationResult>, Option<String>) {
        let mut pending: FuturesUnordered<_> = phase
            .operations
            .iter()
            .map(|op| self.run_operation(ctx, preflighted, phase, op, sinks))
            .collect();

        // Single collector: results are aggregated here, in completion order.
        let mut results = Vec::with_capacity(phase.operations.len());
        while let Some(result) = pending.next().await {
            sinks.operation(&result).await;
            results.push(result);
        }

        let abort = ctx.cancel.interruption().map(|r| r.to_string()).or_else(|| {
            if phase.fail_fast {
                results
                    .iter()
                    .find(|r| r.outcome.is_failure())
                    .map(failure_reason)
            } else {
                None
            }
        });

        (results, abort)
    }

    async fn run_operation(
        &self,
        ctx: &RunContext,
        preflighted: &PreflightedPlan,
        phase: &Phase,
        op: &Operation,
        sinks: &ReportFanout,
    ) -> OperationResult {
        if preflighted.is_satisfied(&op.id) {
            return OperationResult::skipped(&phase.name, op, SkipReason::AlreadySatisfied);
        }
        if ctx.what_if {
            return OperationResult::skipped(&phase.name, op, SkipReason::WhatIf);
        }
        self.runner
            .run(ctx, &preflighted.plan, &phase.name, op, sinks)
            .await
    }

    async fn not_attempted(&self, phase: &Phase, sinks: &ReportFanout) -> PhaseReport {
        let mut results = Vec::with_capacity(phase.operations.len());
        for op in &phase.operations {
            let result = OperationResult::skipped(&phase.name, op, SkipReason::NotAttempted);
            sinks.operation(&result).await;
            results.push(result);
        }
        PhaseReport {
            name: phase.name.clone(),
            ordinal: phase.ordinal,
            fail_fast: phase.fail_fast,
            results,
        }
    }
}

fn failure_reason(result: &OperationResult) -> String {
    match &result.last_error {
        Some(error) => format!("{} failed: {}", result.operation_id, error.message),
        None => format!("{} failed", result.operation_id),
    }
}
