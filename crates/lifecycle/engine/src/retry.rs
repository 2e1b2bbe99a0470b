//! Retrying operation runner.
//!
//! Runs one operation to a terminal [`OperationResult`]: recheck, dispatch,
//! poll, classify, clean up, back off, repeat. Errors never escape as `Err`;
//! the executor decides what a failure means for the phase.

use std::sync::Arc;
use std::time::Duration;

use lifecycle_types::{
    DeploymentPlan, ErrorClass, Operation, OperationErrorInfo, OperationKind, OperationOutcome,
    OperationResult, RetryPolicy, SkipReason,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{dispatch, ResourceClient};
use crate::config::OrchestratorConfig;
use crate::context::RunContext;
use crate::error::ClientError;
use crate::poller::{AsyncOperationPoller, PollOutcome};
use crate::sink::ReportFanout;

/// What one attempt produced.
enum Attempt {
    Finished(OperationOutcome, Option<String>),
    Error(ErrorClass, String),
}

/// Executes single operations with retry and async completion.
pub struct RetryingOperationRunner {
    client: Arc<dyn ResourceClient>,
    poller: AsyncOperationPoller,
    default_policy: RetryPolicy,
    settle_delay: Duration,
}

impl RetryingOperationRunner {
    pub fn new(client: Arc<dyn ResourceClient>, config: &OrchestratorConfig) -> Self {
        Self {
            poller: AsyncOperationPoller::new(client.clone(), config.poll_interval()),
            client,
            default_policy: config.retry_policy(),
            settle_delay: config.settle_delay(),
        }
    }

    /// Policy for `operation`: the named plan policy, else the default.
    pub fn policy_for<'a>(&'a self, plan: &'a DeploymentPlan, operation: &Operation) -> &'a RetryPolicy {
        operation
            .retry_policy
            .as_deref()
            .and_then(|name| plan.retry_policy(name))
            .unwrap_or(&self.default_policy)
    }

    /// Run `operation` to a terminal result.
    pub async fn run(
        &self,
        ctx: &RunContext,
        plan: &DeploymentPlan,
        phase: &str,
        operation: &Operation,
        sinks: &ReportFanout,
    ) -> OperationResult {
        let started = Instant::now();
        let policy = self.policy_for(plan, operation);

        // State may have moved since preflight, e.g. a cascading delete.
        match self.client.get(&operation.target).await {
            Ok(state) if operation.satisfied_when.holds_for(&state) => {
                debug!(operation = %operation.id, "Satisfied at dispatch time");
                return OperationResult::skipped(phase, operation, SkipReason::AlreadySatisfied)
                    .with_elapsed(started.elapsed())
                    .with_note("satisfied at dispatch time");
            }
            Ok(_) => {}
            Err(e) => {
                debug!(operation = %operation.id, error = %e, "Recheck failed; dispatching anyway");
            }
        }

        let mut notes = Vec::new();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(operation = %operation.id, attempt, "Dispatching");

            let (class, message) = match self.attempt(ctx, operation).await {
                Attempt::Finished(outcome, note) => {
                    let mut result = OperationResult::new(phase, operation, outcome)
                        .with_attempts(attempt)
                        .with_elapsed(started.elapsed());
                    result.notes = notes;
                    if let Some(note) = note {
                        result.notes.push(note);
                    }
                    return result;
                }
                Attempt::Error(class, message) => (class, message),
            };

            let mut error = OperationErrorInfo::new(class, message);

            if class == ErrorClass::Permanent {
                warn!(operation = %operation.id, attempt, error = %error.message, "Permanent failure");
                return self.failed(phase, operation, attempt, started, error, notes);
            }

            if attempt >= policy.max_attempts {
                warn!(
                    operation = %operation.id,
                    attempts = attempt,
                    error = %error.message,
                    "Retries exhausted"
                );
                error.retries_exhausted = true;
                return self.failed(phase, operation, attempt, started, error, notes);
            }

            if let Some(note) = self.clean_before_retry(operation).await {
                notes.push(note);
            }

            let progress = OperationResult::new(phase, operation, OperationOutcome::Retrying)
                .with_attempts(attempt)
                .with_elapsed(started.elapsed())
                .with_error(error.clone());
            sinks.progress(&progress).await;

            let delay = policy.delay_after(attempt);
            info!(
                operation = %operation.id,
                attempt,
                delay_secs = delay.as_secs(),
                error = %error.message,
                "Transient failure, backing off"
            );
            if let Err(reason) = ctx.cancel.sleep(delay).await {
                info!(operation = %operation.id, attempt, reason = %reason, "Retry abandoned");
                let mut result =
                    OperationResult::skipped(phase, operation, SkipReason::NotAttempted)
                        .with_attempts(attempt)
                        .with_elapsed(started.elapsed())
                        .with_error(error);
                result.notes = notes;
                result.notes.push(format!("retry abandoned: {}", reason));
                return result;
            }
        }
    }

    async fn attempt(&self, ctx: &RunContext, operation: &Operation) -> Attempt {
        let handle = match dispatch(self.client.as_ref(), operation).await {
            Ok(handle) => handle,
            Err(ClientError::NotFound(_)) if operation.kind == OperationKind::Delete => {
                return Attempt::Finished(
                    OperationOutcome::Succeeded,
                    Some("target already gone".to_string()),
                );
            }
            Err(e) => return Attempt::Error(e.class(), e.to_string()),
        };

        let Some(contract) = &operation.async_contract else {
            return self.settled(ctx, operation).await;
        };

        match self
            .poller
            .poll(&handle, &operation.target, contract, &ctx.cancel)
            .await
        {
            PollOutcome::Succeeded { .. } => self.settled(ctx, operation).await,
            PollOutcome::Failed { message, retryable } => {
                let class = if retryable {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Permanent
                };
                Attempt::Error(class, message)
            }
            PollOutcome::TimedOut { elapsed } => Attempt::Finished(
                OperationOutcome::InProgress,
                Some(format!(
                    "still in progress after {}s; likely continuing in the background",
                    elapsed.as_secs()
                )),
            ),
            PollOutcome::Cancelled(reason) => Attempt::Finished(
                OperationOutcome::InProgress,
                Some(format!("polling stopped ({}); operation left running", reason)),
            ),
        }
    }

    // Create-style operations wait for read consistency before reporting success.
    async fn settled(&self, ctx: &RunContext, operation: &Operation) -> Attempt {
        if operation.kind.is_create_style() && !self.settle_delay.is_zero() {
            if let Err(reason) = ctx.cancel.sleep(self.settle_delay).await {
                return Attempt::Finished(
                    OperationOutcome::Succeeded,
                    Some(format!("settle delay cut short ({})", reason)),
                );
            }
        }
        Attempt::Finished(OperationOutcome::Succeeded, None)
    }

    async fn clean_before_retry(&self, operation: &Operation) -> Option<String> {
        if !operation.kind.is_create_style() {
            return None;
        }
        let artifact = operation.cleanup_before_retry.as_ref()?;
        match self.client.delete(artifact).await {
            Ok(_) => {
                debug!(operation = %operation.id, artifact = %artifact.key(), "Removed partial artifact");
                Some(format!("removed partial artifact {}", artifact.key()))
            }
            Err(ClientError::NotFound(_)) => None,
            Err(e) => {
                warn!(
                    operation = %operation.id,
                    artifact = %artifact.key(),
                    error = %e,
                    "Cleanup before retry failed"
                );
                Some(format!("cleanup of {} failed: {}", artifact.key(), e))
            }
        }
    }

    fn failed(
        &self,
        phase: &str,
        operation: &Operation,
        attempts: u32,
        started: Instant,
        error: OperationErrorInfo,
        notes: Vec<String>,
    ) -> OperationResult {
        let mut result = OperationResult::new(phase, operation, OperationOutcome::Failed)
            .with_attempts(attempts)
            .with_elapsed(started.elapsed())
            .with_error(error);
        result.notes = notes;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::simulated::{CallKind, Completion, SimulatedResourceClient};
    use crate::sink::CollectingReportSink;
    use lifecycle_types::{
        AsyncContract, Phase, PlanIntent, PlanMetadata, ResourceDescriptor,
    };

    fn rg() -> ResourceDescriptor {
        ResourceDescriptor::new("resource_group", "rg-dev").with_region("eastus")
    }

    fn setup(op: &Operation) -> (Arc<DeploymentPlan>, RunContext) {
        let metadata = PlanMetadata::new("dev", "eastus", "rg-dev", "t", PlanIntent::Provision);
        let plan = DeploymentPlan::builder(metadata)
            .retry_policy("once", RetryPolicy::no_retry())
            .phase(Phase::new("infra", 1).with_operation(op.clone()))
            .build()
            .unwrap();
        let ctx = RunContext::new(
            Arc::new(plan.metadata().clone()),
            false,
            CancelToken::never(),
        );
        (Arc::new(plan), ctx)
    }

    fn runner(client: Arc<SimulatedResourceClient>) -> RetryingOperationRunner {
        RetryingOperationRunner::new(client, &OrchestratorConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_exhaust_after_max_attempts() {
        let client = Arc::new(SimulatedResourceClient::new());
        client.fail_next(&rg(), CallKind::Create, ClientError::Throttled("429".into()), 10);
        let op = Operation::create("infra", rg());
        let (plan, ctx) = setup(&op);
        let collector = Arc::new(CollectingReportSink::new());
        let sinks = ReportFanout::new(vec![collector.clone()]);

        let result = runner(client.clone())
            .run(&ctx, &plan, "infra", &op, &sinks)
            .await;

        assert_eq!(result.outcome, OperationOutcome::Failed);
        assert_eq!(result.attempts, 3);
        assert!(result.last_error.as_ref().unwrap().retries_exhausted);
        assert_eq!(client.calls_of(CallKind::Create).await.len(), 3);
        assert_eq!(collector.progress().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let client = Arc::new(SimulatedResourceClient::new());
        client.fail_next(
            &rg(),
            CallKind::Create,
            ClientError::AuthorizationDenied("rbac".into()),
            1,
        );
        let op = Operation::create("infra", rg());
        let (plan, ctx) = setup(&op);

        let result = runner(client.clone())
            .run(&ctx, &plan, "infra", &op, &ReportFanout::default())
            .await;
        assert_eq!(result.outcome, OperationOutcome::Failed);
        assert_eq!(result.attempts, 1);
        assert_eq!(
            result.last_error.map(|e| e.class),
            Some(ErrorClass::Permanent)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_error() {
        let client = Arc::new(SimulatedResourceClient::new());
        client.fail_next(&rg(), CallKind::Create, ClientError::Conflict("busy".into()), 1);
        let op = Operation::create("infra", rg());
        let (plan, ctx) = setup(&op);

        let started = Instant::now();
        let result = runner(client)
            .run(&ctx, &plan, "infra", &op, &ReportFanout::default())
            .await;
        assert_eq!(result.outcome, OperationOutcome::Succeeded);
        assert_eq!(result.attempts, 2);
        // one 10s backoff plus the 10s settle delay
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_backoff_is_not_a_failure() {
        let client = Arc::new(SimulatedResourceClient::new());
        client.fail_next(&rg(), CallKind::Create, ClientError::Throttled("429".into()), 3);
        let op = Operation::create("infra", rg());
        let (plan, _) = setup(&op);
        let (handle, token) = CancelToken::pair();
        let ctx = RunContext::new(Arc::new(plan.metadata().clone()), false, token);

        let run = tokio::spawn(async move {
            runner(client)
                .run(&ctx, &plan, "infra", &op, &ReportFanout::default())
                .await
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.cancel();
        let result = run.await.unwrap();

        assert_eq!(result.outcome, OperationOutcome::Skipped(SkipReason::NotAttempted));
        assert_eq!(result.attempts, 1);
        assert_eq!(
            result.last_error.as_ref().map(|e| e.class),
            Some(ErrorClass::Transient)
        );
        assert!(result.notes.iter().any(|n| n == "retry abandoned: cancelled"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_named_policy_overrides_default() {
        let client = Arc::new(SimulatedResourceClient::new());
        client.fail_next(&rg(), CallKind::Create, ClientError::Timeout("30s".into()), 5);
        let op = Operation::create("infra", rg()).with_retry_policy("once");
        let (plan, ctx) = setup(&op);

        let result = runner(client)
            .run(&ctx, &plan, "infra", &op, &ReportFanout::default())
            .await;
        assert_eq!(result.attempts, 1);
        assert_eq!(result.outcome, OperationOutcome::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_before_retry_failure_does_not_mask_error() {
        let client = Arc::new(SimulatedResourceClient::new());
        let record = ResourceDescriptor::new("deployment", "rg-dev-deploy");
        client.seed(&record);
        client.set_completion(
            &rg(),
            Completion::FailAfterPolls {
                polls: 1,
                message: "deployment failed".into(),
                retryable: true,
            },
        );
        client.fail_next(&record, CallKind::Delete, ClientError::Other("locked".into()), 5);

        let op = Operation::create("infra", rg())
            .with_async(AsyncContract::creation(Duration::from_secs(300)))
            .with_cleanup(record.clone());
        let (plan, ctx) = setup(&op);

        let result = runner(client.clone())
            .run(&ctx, &plan, "infra", &op, &ReportFanout::default())
            .await;

        assert_eq!(result.outcome, OperationOutcome::Failed);
        assert_eq!(result.attempts, 3);
        assert_eq!(
            result.last_error.as_ref().map(|e| e.message.as_str()),
            Some("deployment failed")
        );
        assert_eq!(client.calls_of(CallKind::Delete).await.len(), 2);
        assert!(result.notes.iter().all(|n| n.contains("cleanup of")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout_is_in_progress_not_failed() {
        let client = Arc::new(SimulatedResourceClient::new());
        client.seed(&rg());
        client.set_completion(&rg(), Completion::Never);
        let op = Operation::delete("infra", rg())
            .with_async(AsyncContract::deletion(Duration::from_secs(60)));
        let (plan, ctx) = setup(&op);

        let result = runner(client.clone())
            .run(&ctx, &plan, "infra", &op, &ReportFanout::default())
            .await;
        assert_eq!(result.outcome, OperationOutcome::InProgress);
        assert!(result.last_error.is_none());
        assert_eq!(client.calls_of(CallKind::Delete).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_satisfied_at_dispatch_time_is_skipped() {
        let client = Arc::new(SimulatedResourceClient::new());
        let op = Operation::delete("infra", rg());
        let (plan, ctx) = setup(&op);

        let result = runner(client.clone())
            .run(&ctx, &plan, "infra", &op, &ReportFanout::default())
            .await;
        assert_eq!(
            result.outcome,
            OperationOutcome::Skipped(SkipReason::AlreadySatisfied)
        );
        assert!(client.mutating_calls().await.is_empty());
    }
}
