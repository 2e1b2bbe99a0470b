//! `deploy` and `remove`

use std::time::Duration;

use clap::Args;
use lifecycle_engine::{CancelToken, OrchestratorConfig, RunOptions};
use lifecycle_types::{DeploymentPlan, ExitStatus, PlanIntent};
use tracing::warn;

use super::{PlanArgs, ReportArgs};
use crate::error::CliResult;
use crate::output::{self, print_error, OutputFormat};

/// Arguments shared by mutating runs
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub plan: PlanArgs,

    #[command(flatten)]
    pub report: ReportArgs,

    /// Discover and validate only; change nothing
    #[arg(long)]
    pub what_if: bool,

    /// Skip the confirmation prompt
    #[arg(short, long, alias = "yes")]
    pub force: bool,

    /// Overall run deadline in seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,
}

/// Execute a provision or decommission run
pub async fn execute(
    args: RunArgs,
    intent: PlanIntent,
    config: OrchestratorConfig,
    format: OutputFormat,
) -> CliResult<u8> {
    let plan = args.plan.plan(intent, &config).await?;
    let client = args.plan.client().await?;
    let orchestrator = args.report.orchestrator(client.clone(), config)?;

    if !args.what_if && !args.force && !confirm(&plan) {
        print_error("Aborted");
        return Ok(ExitStatus::Aborted.code());
    }

    if !args.what_if {
        args.plan.record(plan.metadata()).await?;
    }

    let mut options = if args.what_if {
        RunOptions::what_if()
    } else {
        RunOptions::default()
    };
    if let Some(secs) = args.deadline_secs {
        options = options.with_deadline(Duration::from_secs(secs));
    }

    // Ctrl-C stops the run between operations; nothing is rolled back.
    let (handle, token) = CancelToken::pair();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current operation");
            handle.cancel();
        }
    });
    let report = orchestrator.run(plan, options.with_cancel(token)).await;
    interrupt.abort();

    if !args.what_if {
        args.plan.save(&client).await?;
    }

    let exit = report.exit_status(orchestrator.config().readiness_threshold);
    output::print_report(&report, exit, format)?;
    Ok(exit.code())
}

fn confirm(plan: &DeploymentPlan) -> bool {
    let metadata = plan.metadata();
    let prompt = match metadata.intent {
        PlanIntent::Provision => format!(
            "Provision environment '{}' in {} ({} operations)?",
            metadata.environment_name,
            metadata.location,
            plan.operation_count()
        ),
        PlanIntent::Decommission => format!(
            "Delete every resource of environment '{}' in resource group {}? This cannot be undone.",
            metadata.environment_name, metadata.resource_group
        ),
    };

    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .unwrap_or(false)
}
