//! Deployment plans and phases.
//!
//! A plan is assembled once per run through [`PlanBuilder`] and is immutable
//! afterwards; the executor and validator only ever borrow it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PlanError, PlanResult};
use crate::ids::RunId;
use crate::operation::{Operation, OperationKind, RetryPolicy};
use crate::report::ValidationCheck;
use crate::resource::ResourceDescriptor;

/// Direction of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanIntent {
    /// Bring an environment up.
    Provision,
    /// Tear an environment down.
    Decommission,
}

impl fmt::Display for PlanIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanIntent::Provision => write!(f, "provision"),
            PlanIntent::Decommission => write!(f, "decommission"),
        }
    }
}

/// Fully resolved global metadata of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    /// Environment name, e.g. `dev`.
    pub environment_name: String,

    /// Region for every resource that does not override it.
    pub location: String,

    /// Resource group (parent scope) of the environment.
    pub resource_group: String,

    /// Short lowercase token used to make resource names unique.
    pub resource_token: String,

    /// Direction of the plan.
    pub intent: PlanIntent,

    /// Correlation id used in logs and reports.
    pub run_id: RunId,

    /// Tags applied to every created resource.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Remaining resolved parameters, passed through to operation payloads.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl PlanMetadata {
    /// Metadata with only the required fields; the run id is generated.
    pub fn new(
        environment_name: impl Into<String>,
        location: impl Into<String>,
        resource_group: impl Into<String>,
        resource_token: impl Into<String>,
        intent: PlanIntent,
    ) -> Self {
        Self {
            environment_name: environment_name.into(),
            location: location.into(),
            resource_group: resource_group.into(),
            resource_token: resource_token.into(),
            intent,
            run_id: RunId::generate(),
            tags: BTreeMap::new(),
            parameters: BTreeMap::new(),
        }
    }
}

/// An ordered stage of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Phase name, unique within the plan.
    pub name: String,

    /// Position in the plan; phases run in ascending ordinal order.
    pub ordinal: u32,

    /// Abort the whole run on the first failed operation.
    pub fail_fast: bool,

    /// Operations in this phase are independent and may run concurrently.
    #[serde(default)]
    pub parallel: bool,

    /// Operations in dispatch order.
    pub operations: Vec<Operation>,
}

impl Phase {
    /// A fail-fast, sequential phase with no operations.
    pub fn new(name: impl Into<String>, ordinal: u32) -> Self {
        Self {
            name: name.into(),
            ordinal,
            fail_fast: true,
            parallel: false,
            operations: Vec::new(),
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }
}

/// Ordered list of phases plus global metadata.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    metadata: PlanMetadata,
    phases: Vec<Phase>,
    retry_policies: BTreeMap<String, RetryPolicy>,
    checks: Vec<ValidationCheck>,
}

impl DeploymentPlan {
    /// Start assembling a plan.
    pub fn builder(metadata: PlanMetadata) -> PlanBuilder {
        PlanBuilder {
            metadata,
            phases: Vec::new(),
            retry_policies: BTreeMap::new(),
            checks: Vec::new(),
            derive_checks: true,
            extend_derived: false,
        }
    }

    pub fn metadata(&self) -> &PlanMetadata {
        &self.metadata
    }

    /// Phases in ascending ordinal order.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Validation checklist to run after execution.
    pub fn checks(&self) -> &[ValidationCheck] {
        &self.checks
    }

    /// Look up a named retry policy.
    pub fn retry_policy(&self, name: &str) -> Option<&RetryPolicy> {
        self.retry_policies.get(name)
    }

    /// All operations in dispatch order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.phases.iter().flat_map(|p| p.operations.iter())
    }

    /// Number of operations across all phases.
    pub fn operation_count(&self) -> usize {
        self.phases.iter().map(|p| p.operations.len()).sum()
    }

    /// Every distinct resource referenced by an operation or a check,
    /// in first-reference order.
    pub fn targets(&self) -> Vec<&ResourceDescriptor> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        let referenced = self
            .operations()
            .map(|op| &op.target)
            .chain(self.checks.iter().map(|c| &c.target));
        for target in referenced {
            if seen.insert(target.key()) {
                out.push(target);
            }
        }
        out
    }
}

/// Builder for [`DeploymentPlan`].
#[derive(Debug)]
pub struct PlanBuilder {
    metadata: PlanMetadata,
    phases: Vec<Phase>,
    retry_policies: BTreeMap<String, RetryPolicy>,
    checks: Vec<ValidationCheck>,
    derive_checks: bool,
    extend_derived: bool,
}

impl PlanBuilder {
    pub fn phase(mut self, phase: Phase) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn retry_policy(mut self, name: impl Into<String>, policy: RetryPolicy) -> Self {
        self.retry_policies.insert(name.into(), policy);
        self
    }

    pub fn check(mut self, check: ValidationCheck) -> Self {
        self.checks.push(check);
        self
    }

    /// Do not derive a default checklist when no checks were added.
    pub fn without_derived_checks(mut self) -> Self {
        self.derive_checks = false;
        self
    }

    /// Derive the default checklist even when checks were added; the
    /// added checks follow the derived ones.
    pub fn extend_derived_checks(mut self) -> Self {
        self.derive_checks = true;
        self.extend_derived = true;
        self
    }

    /// Validate and freeze the plan.
    pub fn build(mut self) -> PlanResult<DeploymentPlan> {
        if self.metadata.environment_name.trim().is_empty() {
            return Err(PlanError::IncompleteMetadata("environment name".into()));
        }
        if self.metadata.location.trim().is_empty() {
            return Err(PlanError::IncompleteMetadata("location".into()));
        }

        self.phases.sort_by_key(|p| p.ordinal);

        let mut names = BTreeSet::new();
        let mut op_ids = BTreeSet::new();
        for (i, phase) in self.phases.iter().enumerate() {
            if phase.name.trim().is_empty() {
                return Err(PlanError::EmptyPhaseName {
                    ordinal: phase.ordinal,
                });
            }
            if i > 0 && self.phases[i - 1].ordinal == phase.ordinal {
                return Err(PlanError::DuplicateOrdinal {
                    ordinal: phase.ordinal,
                    first: self.phases[i - 1].name.clone(),
                    second: phase.name.clone(),
                });
            }
            if !names.insert(phase.name.as_str()) {
                return Err(PlanError::DuplicatePhase(phase.name.clone()));
            }
            for op in &phase.operations {
                if !op_ids.insert(op.id.as_str()) {
                    return Err(PlanError::DuplicateOperation(op.id.to_string()));
                }
            }
        }

        for (name, policy) in &self.retry_policies {
            if policy.max_attempts == 0 {
                return Err(PlanError::InvalidRetryPolicy { name: name.clone() });
            }
        }

        if self.derive_checks && (self.checks.is_empty() || self.extend_derived) {
            let mut checks = derive_checks(&self.phases);
            checks.append(&mut self.checks);
            self.checks = checks;
        }

        let mut check_names = BTreeSet::new();
        for check in &self.checks {
            if !check.weight.is_finite() || check.weight <= 0.0 {
                return Err(PlanError::InvalidCheckWeight {
                    name: check.name.clone(),
                    weight: check.weight,
                });
            }
            if !check_names.insert(check.name.as_str()) {
                return Err(PlanError::DuplicateCheck(check.name.clone()));
            }
        }

        Ok(DeploymentPlan {
            metadata: self.metadata,
            phases: self.phases,
            retry_policies: self.retry_policies,
            checks: self.checks,
        })
    }
}

/// One check per distinct target, expecting the end state of the last
/// operation that touches it.
fn derive_checks(phases: &[Phase]) -> Vec<ValidationCheck> {
    let mut order: Vec<String> = Vec::new();
    let mut last: BTreeMap<String, &Operation> = BTreeMap::new();

    for op in phases.iter().flat_map(|p| p.operations.iter()) {
        let key = op.target.key();
        if !last.contains_key(&key) {
            order.push(key.clone());
        }
        last.insert(key, op);
    }

    order
        .iter()
        .filter_map(|key| last.get(key))
        .map(|op| {
            let verb = match op.kind {
                OperationKind::Create | OperationKind::Update => "provisioned",
                OperationKind::Delete => "removed",
                OperationKind::Stop => "stopped",
                OperationKind::Deallocate => "deallocated",
            };
            ValidationCheck::new(
                format!("{} {}", op.target.key(), verb),
                1.0,
                op.target.clone(),
                op.satisfied_when.clone(),
            )
            .tolerate_in_progress(op.kind == OperationKind::Delete)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::StatePredicate;

    fn metadata() -> PlanMetadata {
        PlanMetadata::new("dev", "eastus", "rg-dev", "abc123", PlanIntent::Provision)
    }

    fn rg() -> ResourceDescriptor {
        ResourceDescriptor::new("resource_group", "rg-dev")
    }

    #[test]
    fn test_phases_sorted_by_ordinal() {
        let plan = DeploymentPlan::builder(metadata())
            .phase(Phase::new("second", 2))
            .phase(Phase::new("first", 1))
            .build()
            .unwrap();

        let names: Vec<_> = plan.phases().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_duplicate_ordinal_rejected() {
        let err = DeploymentPlan::builder(metadata())
            .phase(Phase::new("a", 1))
            .phase(Phase::new("b", 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, PlanError::DuplicateOrdinal { ordinal: 1, .. }));
    }

    #[test]
    fn test_duplicate_operation_rejected() {
        let err = DeploymentPlan::builder(metadata())
            .phase(
                Phase::new("a", 1)
                    .with_operation(Operation::create("a", rg()))
                    .with_operation(Operation::create("a", rg())),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, PlanError::DuplicateOperation(_)));
    }

    #[test]
    fn test_zero_attempt_policy_rejected() {
        let err = DeploymentPlan::builder(metadata())
            .retry_policy("never", RetryPolicy::fixed(0, std::time::Duration::ZERO))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::InvalidRetryPolicy {
                name: "never".into()
            }
        );
    }

    #[test]
    fn test_missing_location_rejected() {
        let mut md = metadata();
        md.location = "  ".into();
        let err = DeploymentPlan::builder(md).build().unwrap_err();
        assert!(matches!(err, PlanError::IncompleteMetadata(_)));
    }

    #[test]
    fn test_derived_checks_follow_last_operation() {
        let vm = ResourceDescriptor::new("vm", "vm-1").in_scope("rg-dev");
        let plan = DeploymentPlan::builder(metadata())
            .phase(
                Phase::new("stop", 1)
                    .with_operation(Operation::new("stop", OperationKind::Deallocate, vm.clone())),
            )
            .phase(
                Phase::new("delete", 2)
                    .with_operation(Operation::delete("delete", vm.clone()))
                    .with_operation(Operation::delete("delete", rg())),
            )
            .build()
            .unwrap();

        assert_eq!(plan.checks().len(), 2);
        assert_eq!(plan.checks()[0].expect, StatePredicate::Absent);
        assert!(plan.checks()[0].tolerate_in_progress);
        assert_eq!(plan.targets().len(), 2);
        assert_eq!(plan.operation_count(), 3);
    }

    #[test]
    fn test_extend_derived_checks_keeps_added_ones() {
        let optional = ValidationCheck::new(
            "defender disabled",
            1.0,
            ResourceDescriptor::new("security_pricing", "VirtualMachines"),
            StatePredicate::Always,
        )
        .applicable(false);
        let plan = DeploymentPlan::builder(metadata())
            .phase(Phase::new("infra", 1).with_operation(Operation::create("infra", rg())))
            .check(optional)
            .extend_derived_checks()
            .build()
            .unwrap();

        let names: Vec<_> = plan.checks().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["resource_group/rg-dev provisioned", "defender disabled"]);
    }

    #[test]
    fn test_invalid_check_weight_rejected() {
        let err = DeploymentPlan::builder(metadata())
            .check(ValidationCheck::new(
                "rg",
                0.0,
                rg(),
                StatePredicate::ExistsHealthy,
            ))
            .build()
            .unwrap_err();
        assert!(matches!(err, PlanError::InvalidCheckWeight { .. }));
    }
}
