//! Preflight discovery.
//!
//! Queries the current state of every resource the plan references and
//! records, per operation, whether its idempotency predicate already holds.
//! Never mutates. Any query failure aborts the run; discovery is not retried.

use std::collections::BTreeMap;
use std::sync::Arc;

use lifecycle_types::{DeploymentPlan, OperationId, ResourceState};
use tracing::{debug, info, warn};

use crate::client::ResourceClient;
use crate::error::{OrchestratorError, Result};

/// What preflight learned about one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct PreflightAnnotation {
    /// State observed for the operation's target.
    pub observed: ResourceState,
    /// The idempotency predicate held at discovery time.
    pub already_satisfied: bool,
}

/// A plan decorated with discovery results.
#[derive(Debug, Clone)]
pub struct PreflightedPlan {
    pub plan: Arc<DeploymentPlan>,
    pub observed: BTreeMap<String, ResourceState>,
    pub annotations: BTreeMap<OperationId, PreflightAnnotation>,
}

impl PreflightedPlan {
    pub fn annotation(&self, id: &OperationId) -> Option<&PreflightAnnotation> {
        self.annotations.get(id)
    }

    pub fn is_satisfied(&self, id: &OperationId) -> bool {
        self.annotation(id)
            .map(|a| a.already_satisfied)
            .unwrap_or(false)
    }

    /// Operations preflight found nothing to do for.
    pub fn satisfied_count(&self) -> usize {
        self.annotations
            .values()
            .filter(|a| a.already_satisfied)
            .count()
    }
}

/// Read-only discovery pass.
pub struct PreflightValidator {
    client: Arc<dyn ResourceClient>,
}

impl PreflightValidator {
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self { client }
    }

    /// Observe every target once and annotate every operation.
    pub async fn validate(&self, plan: Arc<DeploymentPlan>) -> Result<PreflightedPlan> {
        let mut observed = BTreeMap::new();

        for target in plan.targets() {
            let key = target.key();
            match self.client.get(target).await {
                Ok(state) => {
                    debug!(target = %key, exists = state.exists, provisioning = %state.provisioning, "Discovered");
                    observed.insert(key, state);
                }
                Err(source) => {
                    warn!(target = %key, error = %source, "Discovery failed");
                    return Err(OrchestratorError::Discovery { target: key, source });
                }
            }
        }

        let mut annotations = BTreeMap::new();
        for op in plan.operations() {
            let state = observed
                .get(&op.target.key())
                .cloned()
                .unwrap_or_else(ResourceState::absent);
            let already_satisfied = op.satisfied_when.holds_for(&state);
            annotations.insert(
                op.id.clone(),
                PreflightAnnotation {
                    observed: state,
                    already_satisfied,
                },
            );
        }

        let preflighted = PreflightedPlan {
            plan,
            observed,
            annotations,
        };
        info!(
            targets = preflighted.observed.len(),
            operations = preflighted.annotations.len(),
            already_satisfied = preflighted.satisfied_count(),
            "Preflight complete"
        );
        Ok(preflighted)
    }
}
