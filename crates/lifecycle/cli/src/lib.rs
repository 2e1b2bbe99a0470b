//! Lifecycle CLI - Provision, decommission and validate environments
//!
//! Every run ends with a report and an exit code:
//! - `0` ready, or partially ready at or above the threshold
//! - `1` aborted
//! - `2` retry recommended (failed checks, or work still in progress)
//! - `3` configuration error

use std::ffi::OsString;

use clap::{Parser, Subcommand};
use lifecycle_engine::OrchestratorConfig;
use lifecycle_types::PlanIntent;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod error;
mod output;

use commands::{plan, run, validate, PlanArgs, ReportArgs};
pub use error::{CliError, CliResult};
pub use output::print_error;
use output::OutputFormat;

/// Lifecycle CLI application
#[derive(Parser)]
#[command(name = "lifecycle")]
#[command(about = "Ordered, idempotent environment provisioning and decommissioning", long_about = None)]
#[command(version)]
struct Cli {
    /// Orchestrator configuration file
    #[arg(short, long, env = "LIFECYCLE_CONFIG", global = true)]
    config: Option<String>,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table", global = true)]
    output: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Provision an environment
    #[command(alias = "up")]
    Deploy(run::RunArgs),

    /// Decommission an environment
    #[command(alias = "down")]
    Remove(run::RunArgs),

    /// Score the environment against its checklist without changing anything
    Validate {
        #[command(flatten)]
        plan: PlanArgs,

        #[command(flatten)]
        report: ReportArgs,

        /// Check the decommissioned end state instead of the provisioned one
        #[arg(long)]
        decommission: bool,
    },

    /// Print the resolved plan
    Plan {
        #[command(flatten)]
        plan: PlanArgs,

        /// Show the decommission plan
        #[arg(long)]
        decommission: bool,
    },
}

/// Run using the current process arguments. Returns the exit code.
pub async fn run() -> CliResult<u8> {
    run_with_args(std::env::args_os()).await
}

/// Run using the provided argument iterator. Returns the exit code.
pub async fn run_with_args<I, T>(args: I) -> CliResult<u8>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_tracing(cli.verbose, cli.log_json);

    let config = OrchestratorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Deploy(args) => {
            run::execute(args, PlanIntent::Provision, config, cli.output).await
        }
        Commands::Remove(args) => {
            run::execute(args, PlanIntent::Decommission, config, cli.output).await
        }
        Commands::Validate {
            plan,
            report,
            decommission,
        } => {
            validate::execute(plan, report, commands::intent(decommission), config, cli.output)
                .await
        }
        Commands::Plan { plan, decommission } => {
            plan::execute(plan, commands::intent(decommission), config, cli.output).await
        }
    }
}

// Logs go to stderr so stdout carries only the report.
fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| {
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr)
        }))
        .try_init();
}
