//! CLI command implementations

pub mod plan;
pub mod run;
pub mod validate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use lifecycle_engine::{
    ExplicitParameters, JsonFileReportSink, Orchestrator, OrchestratorConfig, ParameterFile,
    ParameterResolver, PlanBlueprint, SimulatedResourceClient, TracingReportSink,
};
use lifecycle_types::{DeploymentPlan, PlanIntent, PlanMetadata};
use tracing::debug;

use crate::error::CliResult;

/// Parameter file read when `--use-parameters-file` is given without a path
pub const DEFAULT_PARAMETERS_FILE: &str = "main.parameters.json";

/// Which environment, and where its parameters and state live
#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    /// Environment name, e.g. `dev`
    #[arg(short, long, env = "LIFECYCLE_ENVIRONMENT_NAME")]
    pub environment_name: Option<String>,

    /// Region for the environment
    #[arg(short, long, env = "LIFECYCLE_LOCATION")]
    pub location: Option<String>,

    /// Resource group (default `rg-<environment>`)
    #[arg(long)]
    pub resource_group: Option<String>,

    /// Token that makes resource names unique (generated and recorded when omitted)
    #[arg(long)]
    pub resource_token: Option<String>,

    /// Tag applied to every created resource (repeatable)
    #[arg(long = "tag", value_name = "KEY=VALUE", value_parser = parse_tag)]
    pub tags: Vec<(String, String)>,

    /// Read parameters from a `parameters.<name>.value` document
    #[arg(
        long,
        value_name = "PATH",
        num_args = 0..=1,
        default_missing_value = DEFAULT_PARAMETERS_FILE
    )]
    pub use_parameters_file: Option<PathBuf>,

    /// Plan blueprint (YAML or JSON); the built-in environment when omitted
    #[arg(short, long)]
    pub blueprint: Option<PathBuf>,

    /// Control-plane state file
    #[arg(long, env = "LIFECYCLE_STATE_FILE", default_value = ".lifecycle/state.json")]
    pub state_file: PathBuf,
}

/// Report destination and readiness threshold
#[derive(Debug, Clone, Args)]
pub struct ReportArgs {
    /// Also write the JSON report to this file
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Minimum score for a partially ready environment to exit 0
    #[arg(long)]
    pub threshold: Option<f64>,
}

impl ReportArgs {
    /// Apply the threshold override and build an orchestrator with the requested sinks.
    pub fn orchestrator(
        &self,
        client: Arc<SimulatedResourceClient>,
        mut config: OrchestratorConfig,
    ) -> CliResult<Orchestrator> {
        if let Some(threshold) = self.threshold {
            config.readiness_threshold = threshold;
            config.validate()?;
        }
        let mut orchestrator =
            Orchestrator::new(client, config).with_sink(Arc::new(TracingReportSink));
        if let Some(path) = &self.report {
            orchestrator = orchestrator.with_sink(Arc::new(JsonFileReportSink::new(path)));
        }
        Ok(orchestrator)
    }
}

impl PlanArgs {
    /// Where the resolved names of `environment` are recorded.
    pub fn record_path(&self, environment: &str) -> PathBuf {
        self.state_file
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(format!("{}.parameters.json", environment))
    }

    /// Resolve metadata from flags, the parameter file, the environment
    /// record and generated defaults, in that order.
    pub async fn resolve(&self, intent: PlanIntent) -> CliResult<PlanMetadata> {
        let explicit = ExplicitParameters {
            environment_name: self.environment_name.clone(),
            location: self.location.clone(),
            resource_group: self.resource_group.clone(),
            resource_token: self.resource_token.clone(),
            tags: self.tags.iter().cloned().collect(),
        };

        let mut file = match &self.use_parameters_file {
            Some(path) => ParameterFile::load_or_empty(path).await,
            None => ParameterFile::default(),
        };

        let environment = explicit
            .environment_name
            .clone()
            .or_else(|| file.environment_name())
            .filter(|name| is_record_name(name));
        if let Some(environment) = environment {
            let record = self.record_path(&environment);
            if tokio::fs::try_exists(&record).await? {
                debug!(path = %record.display(), "Using recorded environment parameters");
                file = file.or(ParameterFile::load_or_empty(&record).await);
            }
        }

        Ok(ParameterResolver::new(explicit).with_file(file).resolve(intent)?)
    }

    /// Resolve metadata and derive the plan for `intent`.
    pub async fn plan(
        &self,
        intent: PlanIntent,
        config: &OrchestratorConfig,
    ) -> CliResult<DeploymentPlan> {
        let metadata = self.resolve(intent).await?;
        let blueprint = match &self.blueprint {
            Some(path) => PlanBlueprint::read(path).await?,
            None => PlanBlueprint::builtin()?,
        };
        Ok(blueprint
            .with_default_timeout(config.poll_timeout())
            .plan(metadata)?)
    }

    /// Record resolved names so later runs address the same resources.
    pub async fn record(&self, metadata: &PlanMetadata) -> CliResult<()> {
        let path = self.record_path(&metadata.environment_name);
        ParameterFile::from_metadata(metadata).write(&path).await?;
        debug!(path = %path.display(), "Recorded environment parameters");
        Ok(())
    }

    /// Control plane backed by the state file.
    pub async fn client(&self) -> CliResult<Arc<SimulatedResourceClient>> {
        let client = SimulatedResourceClient::load(&self.state_file).await?;
        Ok(Arc::new(client))
    }

    /// Persist the control plane back to the state file.
    pub async fn save(&self, client: &SimulatedResourceClient) -> CliResult<()> {
        if let Some(parent) = self.state_file.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        client.save(&self.state_file).await?;
        Ok(())
    }
}

/// `--decommission` selects the plan direction for read-only commands.
pub fn intent(decommission: bool) -> PlanIntent {
    if decommission {
        PlanIntent::Decommission
    } else {
        PlanIntent::Provision
    }
}

fn is_record_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(state_file: &Path) -> PlanArgs {
        PlanArgs {
            environment_name: Some("dev".into()),
            location: Some("eastus".into()),
            resource_group: None,
            resource_token: None,
            tags: vec![],
            use_parameters_file: None,
            blueprint: None,
            state_file: state_file.to_path_buf(),
        }
    }

    #[test]
    fn test_parse_tag() {
        assert_eq!(
            parse_tag("owner=platform").unwrap(),
            ("owner".to_string(), "platform".to_string())
        );
        assert_eq!(parse_tag("empty=").unwrap().1, "");
        assert!(parse_tag("novalue").is_err());
        assert!(parse_tag("=x").is_err());
    }

    #[test]
    fn test_record_sits_beside_state_file() {
        let a = args(Path::new("/tmp/work/state.json"));
        assert_eq!(
            a.record_path("dev"),
            PathBuf::from("/tmp/work/dev.parameters.json")
        );
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let client = Arc::new(SimulatedResourceClient::new());
        let report = ReportArgs {
            report: None,
            threshold: Some(1.5),
        };
        let result = report.orchestrator(client.clone(), OrchestratorConfig::default());
        assert!(matches!(result, Err(e) if e.exit_code() == 3));

        let report = ReportArgs {
            report: None,
            threshold: Some(0.8),
        };
        let orchestrator = report
            .orchestrator(client, OrchestratorConfig::default())
            .ok()
            .unwrap();
        assert_eq!(orchestrator.config().readiness_threshold, 0.8);
    }

    #[tokio::test]
    async fn test_recorded_token_reused() {
        let dir = tempfile::tempdir().unwrap();
        let a = args(&dir.path().join("state.json"));

        let first = a.resolve(PlanIntent::Provision).await.unwrap();
        a.record(&first).await.unwrap();

        let mut later = a.clone();
        later.location = None;
        let second = later.resolve(PlanIntent::Decommission).await.unwrap();
        assert_eq!(second.resource_token, first.resource_token);
        assert_eq!(second.location, "eastus");
    }

    #[tokio::test]
    async fn test_missing_location_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = args(&dir.path().join("state.json"));
        a.location = None;
        let err = a.resolve(PlanIntent::Provision).await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
