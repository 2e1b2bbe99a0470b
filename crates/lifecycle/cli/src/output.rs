//! Output formatting utilities

use colored::*;
use lifecycle_types::{CheckResult, CheckStatus, DeploymentPlan, ExitStatus, OperationResult, RunReport};
use serde::Serialize;
use tabled::{Table, Tabled};

use crate::error::CliResult;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Tables and a summary
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

#[derive(Tabled)]
struct OperationRow {
    phase: String,
    operation: String,
    target: String,
    outcome: String,
    attempts: u32,
    elapsed: String,
}

impl From<&OperationResult> for OperationRow {
    fn from(r: &OperationResult) -> Self {
        Self {
            phase: r.phase.clone(),
            operation: r.kind.to_string(),
            target: r.target.clone(),
            outcome: r.outcome.to_string(),
            attempts: r.attempts,
            elapsed: format!("{:.1}s", r.elapsed_ms as f64 / 1000.0),
        }
    }
}

#[derive(Tabled)]
struct CheckRow {
    check: String,
    weight: f64,
    status: String,
    detail: String,
}

impl From<&CheckResult> for CheckRow {
    fn from(c: &CheckResult) -> Self {
        let status = match c.status {
            CheckStatus::Passed => "passed",
            CheckStatus::Failed => "failed",
            CheckStatus::ExpectedFailure => "in progress",
            CheckStatus::NotApplicable => "not applicable",
        };
        Self {
            check: c.name.clone(),
            weight: c.weight,
            status: status.to_string(),
            detail: c.detail.clone().unwrap_or_default(),
        }
    }
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    ordinal: u32,
    phase: String,
    mode: String,
    operation: String,
    target: String,
    wait: String,
}

/// Serialize `data` in a machine-readable format.
fn print_serialized<T: Serialize>(data: &T, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(data)?);
        }
    }
    Ok(())
}

/// Print a run report.
pub fn print_report(report: &RunReport, exit: ExitStatus, format: OutputFormat) -> CliResult<()> {
    if !matches!(format, OutputFormat::Table) {
        return print_serialized(report, format);
    }

    let results: Vec<OperationRow> = report.results().map(OperationRow::from).collect();
    if results.is_empty() {
        println!("{}", "No operations".dimmed());
    } else {
        println!("{}", Table::new(results));
    }

    let checks: Vec<CheckRow> = report.validation.checks().iter().map(CheckRow::from).collect();
    if !checks.is_empty() {
        println!("{}", Table::new(checks));
    }

    let header = format!(
        "{} {} | score {:.2} | {}",
        if report.what_if { "[what-if]" } else { "" },
        report.state,
        report.validation.score(),
        report.validation.recommendation()
    );
    println!("{}", header.trim_start().bold());

    match exit {
        ExitStatus::Ready => print_success(&report.next_action()),
        ExitStatus::ReadyWithCaveats | ExitStatus::RetryRecommended => {
            print_warning(&report.next_action())
        }
        ExitStatus::Aborted | ExitStatus::ConfigurationError => print_error(&report.next_action()),
    }
    Ok(())
}

/// Print a resolved plan.
pub fn print_plan(plan: &DeploymentPlan, format: OutputFormat) -> CliResult<()> {
    if !matches!(format, OutputFormat::Table) {
        return print_serialized(plan, format);
    }

    let metadata = plan.metadata();
    print_info(&format!(
        "{} {} in {} (resource group {}, token {})",
        metadata.intent,
        metadata.environment_name,
        metadata.location,
        metadata.resource_group,
        metadata.resource_token
    ));

    let rows: Vec<PlanRow> = plan
        .phases()
        .iter()
        .flat_map(|phase| {
            let mode = match (phase.parallel, phase.fail_fast) {
                (true, true) => "parallel, fail-fast",
                (true, false) => "parallel",
                (false, true) => "fail-fast",
                (false, false) => "continue",
            };
            phase.operations.iter().map(move |op| PlanRow {
                ordinal: phase.ordinal,
                phase: phase.name.clone(),
                mode: mode.to_string(),
                operation: op.kind.to_string(),
                target: op.target.key(),
                wait: op
                    .async_contract
                    .as_ref()
                    .map(|c| format!("{}s", c.timeout.as_secs()))
                    .unwrap_or_else(|| "-".to_string()),
            })
        })
        .collect();
    println!("{}", Table::new(rows));
    println!(
        "{} checks: {}",
        plan.checks().len(),
        plan.checks()
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
            .dimmed()
    );
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_default() {
        let format = OutputFormat::default();
        assert!(matches!(format, OutputFormat::Table));
    }

    #[test]
    fn test_check_row_labels_in_progress() {
        let row = CheckRow::from(&CheckResult {
            name: "rg removed".into(),
            weight: 1.0,
            target: "resource_group/rg-dev".into(),
            status: CheckStatus::ExpectedFailure,
            detail: None,
        });
        assert_eq!(row.status, "in progress");
        assert_eq!(row.detail, "");
    }
}
