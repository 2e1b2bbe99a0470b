//! `validate`: score the environment without changing it

use lifecycle_engine::OrchestratorConfig;
use lifecycle_types::PlanIntent;

use super::{PlanArgs, ReportArgs};
use crate::error::CliResult;
use crate::output::{self, OutputFormat};

pub async fn execute(
    plan_args: PlanArgs,
    report_args: ReportArgs,
    intent: PlanIntent,
    config: OrchestratorConfig,
    format: OutputFormat,
) -> CliResult<u8> {
    let plan = plan_args.plan(intent, &config).await?;
    let client = plan_args.client().await?;
    let orchestrator = report_args.orchestrator(client, config)?;

    let report = orchestrator.validate(plan).await;
    let exit = report.exit_status(orchestrator.config().readiness_threshold);
    output::print_report(&report, exit, format)?;
    Ok(exit.code())
}
