//! Plan Blueprint - declarative environment description
//!
//! A blueprint lists the phases and resources of an environment once. The
//! provision plan creates them phase by phase; the decommission plan walks
//! the same phases in reverse, optionally stopping and deallocating
//! compute before deleting it.
//!
//! Names, scopes, regions, tag values and spec strings may use the
//! placeholders `{env}`, `{rg}`, `{token}` and `{location}`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use lifecycle_types::{
    AsyncContract, BackoffStrategy, DeploymentPlan, Operation, OperationKind, Phase,
    PlanIntent, PlanMetadata, RetryPolicy, ResourceDescriptor, StatePredicate, ValidationCheck,
};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

const DEFAULT_BLUEPRINT: &str = include_str!("../blueprints/default.yaml");

/// Poll window when neither the blueprint nor the caller sets one.
const DEFAULT_TIMEOUT_SECS: u64 = 1800;

/// Top-level blueprint document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanBlueprint {
    pub name: String,

    #[serde(default)]
    pub phases: Vec<PhaseBlueprint>,

    /// Named retry policies operations may reference.
    #[serde(default)]
    pub retry_policies: BTreeMap<String, RetryPolicyBlueprint>,

    /// Checks added to the derived checklist.
    #[serde(default)]
    pub checks: Vec<CheckBlueprint>,

    #[serde(default)]
    pub timeouts: TimeoutBlueprint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseBlueprint {
    pub name: String,

    /// Operations may be dispatched concurrently when parallel phases are enabled.
    #[serde(default)]
    pub parallel: bool,

    /// Provision failure policy; defaults to fail-fast.
    #[serde(default)]
    pub fail_fast: Option<bool>,

    /// Decommission failure policy; defaults to continue-on-error.
    #[serde(default)]
    pub decommission_fail_fast: Option<bool>,

    #[serde(default)]
    pub resources: Vec<ResourceBlueprint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceBlueprint {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Payload handed to the control plane on create.
    #[serde(default)]
    pub spec: serde_json::Value,

    #[serde(default)]
    pub retry_policy: Option<String>,

    /// Poll the operation to completion instead of trusting submission.
    #[serde(default = "default_true")]
    pub wait: bool,

    /// Stop before deleting.
    #[serde(default)]
    pub stop_before_delete: bool,

    /// Deallocate before deleting.
    #[serde(default)]
    pub deallocate_before_delete: bool,

    /// Partial artifact left behind by a failed create.
    #[serde(default)]
    pub cleanup_on_retry: Option<ArtifactBlueprint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactBlueprint {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyBlueprint {
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_secs: u64,
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

impl From<&RetryPolicyBlueprint> for RetryPolicy {
    fn from(bp: &RetryPolicyBlueprint) -> Self {
        RetryPolicy {
            max_attempts: bp.max_attempts,
            backoff: Duration::from_secs(bp.backoff_secs),
            strategy: bp.strategy,
        }
    }
}

/// A check added on top of the derived checklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckBlueprint {
    pub name: String,

    #[serde(default = "default_weight")]
    pub weight: f64,

    pub target: ArtifactBlueprint,

    pub expect: StatePredicate,

    /// Only include the check in plans of this intent.
    #[serde(default)]
    pub intent: Option<PlanIntent>,

    /// Boolean parameter that requests the optional step this check verifies.
    /// The check is not applicable unless the parameter is `true`.
    #[serde(default)]
    pub requested_by: Option<String>,

    #[serde(default)]
    pub tolerate_in_progress: bool,
}

/// Poll windows per operation family. Unset windows take the orchestrator's
/// `poll.timeout_secs` through [`PlanBlueprint::with_default_timeout`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeoutBlueprint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_secs: Option<u64>,
}

impl TimeoutBlueprint {
    fn window(secs: Option<u64>) -> Duration {
        Duration::from_secs(secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

/// Whether an optional step was requested through a boolean parameter.
pub fn optional_check_requested(metadata: &PlanMetadata, parameter: &str) -> bool {
    match metadata.parameters.get(parameter) {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

struct Placeholders<'a> {
    metadata: &'a PlanMetadata,
}

impl Placeholders<'_> {
    fn apply(&self, input: &str) -> String {
        input
            .replace("{env}", &self.metadata.environment_name)
            .replace("{rg}", &self.metadata.resource_group)
            .replace("{token}", &self.metadata.resource_token)
            .replace("{location}", &self.metadata.location)
    }

    fn apply_json(&self, value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) => serde_json::Value::String(self.apply(s)),
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(|v| self.apply_json(v)).collect())
            }
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.apply_json(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn artifact(&self, bp: &ArtifactBlueprint) -> ResourceDescriptor {
        let mut descriptor = ResourceDescriptor::new(&bp.resource_type, self.apply(&bp.name));
        if let Some(scope) = &bp.scope {
            descriptor = descriptor.in_scope(self.apply(scope));
        }
        descriptor
    }

    fn resource(&self, bp: &ResourceBlueprint) -> ResourceDescriptor {
        let mut descriptor = ResourceDescriptor::new(&bp.resource_type, self.apply(&bp.name));
        if let Some(scope) = &bp.scope {
            descriptor = descriptor.in_scope(self.apply(scope));
        }
        if let Some(region) = &bp.region {
            descriptor = descriptor.with_region(self.apply(region));
        }
        if let Some(sku) = &bp.sku {
            descriptor = descriptor.with_sku(self.apply(sku));
        }
        for (key, value) in self.metadata.tags.iter().chain(bp.tags.iter()) {
            descriptor = descriptor.with_tag(key, self.apply(value));
        }
        descriptor
    }
}

impl PlanBlueprint {
    /// Parse YAML (a superset of JSON).
    pub fn parse(contents: &str) -> Result<Self> {
        let blueprint: PlanBlueprint = serde_yaml::from_str(contents)?;
        blueprint.validate()?;
        Ok(blueprint)
    }

    /// Read a blueprint file; `.json` files are parsed as JSON.
    pub async fn read(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            let blueprint: PlanBlueprint = serde_json::from_str(&contents)?;
            blueprint.validate()?;
            Ok(blueprint)
        } else {
            Self::parse(&contents)
        }
    }

    /// Built-in environment: resource group, shared platform services and a
    /// workload tier with one VM.
    pub fn builtin() -> Result<Self> {
        Self::parse(DEFAULT_BLUEPRINT)
    }

    fn validate(&self) -> Result<()> {
        if self.phases.is_empty() {
            return Err(OrchestratorError::Configuration(format!(
                "blueprint '{}' has no phases",
                self.name
            )));
        }
        for phase in &self.phases {
            for resource in &phase.resources {
                if let Some(policy) = &resource.retry_policy {
                    if !self.retry_policies.contains_key(policy) {
                        return Err(OrchestratorError::Configuration(format!(
                            "resource '{}' references unknown retry policy '{}'",
                            resource.name, policy
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Use `timeout` for every poll window the blueprint leaves unset.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        let secs = timeout.as_secs();
        self.timeouts.create_secs.get_or_insert(secs);
        self.timeouts.delete_secs.get_or_insert(secs);
        self.timeouts.power_secs.get_or_insert(secs);
        self
    }

    /// Plan for `metadata.intent`.
    pub fn plan(&self, metadata: PlanMetadata) -> Result<DeploymentPlan> {
        match metadata.intent {
            PlanIntent::Provision => self.provision_plan(metadata),
            PlanIntent::Decommission => self.decommission_plan(metadata),
        }
    }

    /// Create every resource, phase by phase.
    pub fn provision_plan(&self, mut metadata: PlanMetadata) -> Result<DeploymentPlan> {
        metadata.intent = PlanIntent::Provision;
        let placeholders = Placeholders {
            metadata: &metadata,
        };
        let create_timeout = TimeoutBlueprint::window(self.timeouts.create_secs);

        let mut phases = Vec::with_capacity(self.phases.len());
        for (index, bp) in self.phases.iter().enumerate() {
            let mut phase = Phase::new(&bp.name, ordinal(index))
                .with_fail_fast(bp.fail_fast.unwrap_or(true))
                .with_parallel(bp.parallel);

            for resource in &bp.resources {
                let mut op = Operation::create(&bp.name, placeholders.resource(resource))
                    .with_spec(placeholders.apply_json(&resource.spec));
                if resource.wait {
                    op = op.with_async(AsyncContract::creation(create_timeout));
                }
                if let Some(policy) = &resource.retry_policy {
                    op = op.with_retry_policy(policy);
                }
                if let Some(artifact) = &resource.cleanup_on_retry {
                    op = op.with_cleanup(placeholders.artifact(artifact));
                }
                phase = phase.with_operation(op);
            }
            phases.push(phase);
        }

        let checks = self.extra_checks(&metadata, PlanIntent::Provision);
        self.assemble(metadata, phases, checks)
    }

    /// Remove every resource, walking phases and resources in reverse.
    pub fn decommission_plan(&self, mut metadata: PlanMetadata) -> Result<DeploymentPlan> {
        metadata.intent = PlanIntent::Decommission;
        let placeholders = Placeholders {
            metadata: &metadata,
        };
        let delete_timeout = TimeoutBlueprint::window(self.timeouts.delete_secs);
        let power_timeout = TimeoutBlueprint::window(self.timeouts.power_secs);

        let mut phases = Vec::with_capacity(self.phases.len());
        for (index, bp) in self.phases.iter().rev().enumerate() {
            let mut phase = Phase::new(&bp.name, ordinal(index))
                .with_fail_fast(bp.decommission_fail_fast.unwrap_or(false))
                .with_parallel(bp.parallel);

            for resource in bp.resources.iter().rev() {
                let target = placeholders.resource(resource);
                let mut ops = Vec::new();
                if resource.stop_before_delete {
                    ops.push(
                        Operation::new(&bp.name, OperationKind::Stop, target.clone())
                            .with_async(AsyncContract::for_kind(OperationKind::Stop, power_timeout)),
                    );
                }
                if resource.deallocate_before_delete {
                    ops.push(
                        Operation::new(&bp.name, OperationKind::Deallocate, target.clone())
                            .with_async(AsyncContract::for_kind(
                                OperationKind::Deallocate,
                                power_timeout,
                            )),
                    );
                }
                let mut delete = Operation::delete(&bp.name, target);
                if resource.wait {
                    delete = delete.with_async(AsyncContract::deletion(delete_timeout));
                }
                ops.push(delete);

                for mut op in ops {
                    if let Some(policy) = &resource.retry_policy {
                        op = op.with_retry_policy(policy);
                    }
                    phase = phase.with_operation(op);
                }
            }
            phases.push(phase);
        }

        let checks = self.extra_checks(&metadata, PlanIntent::Decommission);
        self.assemble(metadata, phases, checks)
    }

    fn extra_checks(&self, metadata: &PlanMetadata, intent: PlanIntent) -> Vec<ValidationCheck> {
        let placeholders = Placeholders { metadata };
        self.checks
            .iter()
            .filter(|c| c.intent.map(|i| i == intent).unwrap_or(true))
            .map(|c| {
                let applicable = c
                    .requested_by
                    .as_deref()
                    .map(|param| optional_check_requested(metadata, param))
                    .unwrap_or(true);
                ValidationCheck::new(
                    &c.name,
                    c.weight,
                    placeholders.artifact(&c.target),
                    c.expect.clone(),
                )
                .applicable(applicable)
                .tolerate_in_progress(c.tolerate_in_progress)
            })
            .collect()
    }

    fn assemble(
        &self,
        metadata: PlanMetadata,
        phases: Vec<Phase>,
        checks: Vec<ValidationCheck>,
    ) -> Result<DeploymentPlan> {
        let mut builder = DeploymentPlan::builder(metadata).extend_derived_checks();
        for (name, policy) in &self.retry_policies {
            builder = builder.retry_policy(name, RetryPolicy::from(policy));
        }
        for phase in phases {
            builder = builder.phase(phase);
        }
        for check in checks {
            builder = builder.check(check);
        }
        Ok(builder.build()?)
    }
}

fn ordinal(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}
