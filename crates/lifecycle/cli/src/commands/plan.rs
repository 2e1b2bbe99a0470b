//! `plan`: print the resolved plan

use lifecycle_engine::OrchestratorConfig;
use lifecycle_types::PlanIntent;

use super::PlanArgs;
use crate::error::CliResult;
use crate::output::{self, OutputFormat};

pub async fn execute(
    args: PlanArgs,
    intent: PlanIntent,
    config: OrchestratorConfig,
    format: OutputFormat,
) -> CliResult<u8> {
    let plan = args.plan(intent, &config).await?;
    output::print_plan(&plan, format)?;
    Ok(0)
}
