//! Resource descriptors, observed state and state predicates.
//!
//! The engine never interprets a resource type; it only compares observed
//! state against predicates. A "virtual machine" and a "workspace" are both
//! just a `ResourceDescriptor` with a type string.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Small bag of typed properties shared by every resource kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceProperties {
    /// Region the resource lives in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Pricing tier / SKU.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    /// Free-form tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl ResourceProperties {
    /// True when every property set on `self` is present with the same value
    /// on `observed`. Tags on `observed` may be a superset.
    pub fn satisfied_by(&self, observed: &ResourceProperties) -> bool {
        let region_ok = match (&self.region, &observed.region) {
            (None, _) => true,
            (Some(want), Some(have)) => want.eq_ignore_ascii_case(have),
            (Some(_), None) => false,
        };
        let sku_ok = match (&self.sku, &observed.sku) {
            (None, _) => true,
            (Some(want), Some(have)) => want == have,
            (Some(_), None) => false,
        };
        let tags_ok = self
            .tags
            .iter()
            .all(|(k, v)| observed.tags.get(k) == Some(v));

        region_ok && sku_ok && tags_ok
    }
}

/// Generic description of a resource the orchestrator manages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Logical resource type, opaque to the engine.
    pub resource_type: String,

    /// Resource name, unique within its scope and type.
    pub name: String,

    /// Parent scope (typically the resource group). `None` for top-level resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Desired properties.
    #[serde(default)]
    pub properties: ResourceProperties,
}

impl ResourceDescriptor {
    /// Create a top-level descriptor.
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name: name.into(),
            scope: None,
            properties: ResourceProperties::default(),
        }
    }

    /// Place the resource inside a parent scope.
    pub fn in_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Set the desired region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.properties.region = Some(region.into());
        self
    }

    /// Set the desired SKU.
    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.properties.sku = Some(sku.into());
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.tags.insert(key.into(), value.into());
        self
    }

    /// Stable key identifying the resource: `type/scope/name`.
    pub fn key(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}/{}/{}", self.resource_type, scope, self.name),
            None => format!("{}/{}", self.resource_type, self.name),
        }
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Provisioning state reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    Succeeded,
    Creating,
    Updating,
    Deleting,
    Failed,
    Canceled,
    Unknown(String),
}

impl ProvisioningState {
    /// States from which the control plane will not move on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisioningState::Succeeded | ProvisioningState::Failed | ProvisioningState::Canceled
        )
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningState::Succeeded => write!(f, "succeeded"),
            ProvisioningState::Creating => write!(f, "creating"),
            ProvisioningState::Updating => write!(f, "updating"),
            ProvisioningState::Deleting => write!(f, "deleting"),
            ProvisioningState::Failed => write!(f, "failed"),
            ProvisioningState::Canceled => write!(f, "canceled"),
            ProvisioningState::Unknown(s) => write!(f, "unknown({})", s),
        }
    }
}

/// Power state for resources that can be stopped or deallocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Running,
    Stopped,
    Deallocated,
}

/// Observed state of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Whether the resource exists at all.
    pub exists: bool,

    /// Provisioning state, meaningful only when `exists`.
    pub provisioning: ProvisioningState,

    /// Power state, for resources that have one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power: Option<PowerState>,

    /// Observed properties.
    #[serde(default)]
    pub properties: ResourceProperties,
}

impl ResourceState {
    /// State of a resource that does not exist.
    pub fn absent() -> Self {
        Self {
            exists: false,
            provisioning: ProvisioningState::Unknown("absent".to_string()),
            power: None,
            properties: ResourceProperties::default(),
        }
    }

    /// State of an existing resource in the given provisioning state.
    pub fn present(provisioning: ProvisioningState, properties: ResourceProperties) -> Self {
        Self {
            exists: true,
            provisioning,
            power: None,
            properties,
        }
    }

    /// Existing and in a terminal healthy state.
    pub fn is_healthy(&self) -> bool {
        self.exists && self.provisioning == ProvisioningState::Succeeded
    }

    /// Set the power state.
    pub fn with_power(mut self, power: PowerState) -> Self {
        self.power = Some(power);
        self
    }
}

/// Status of an asynchronous control-plane operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed {
        message: String,
        /// Whether the control plane considers a resubmission worthwhile.
        retryable: bool,
    },
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::InProgress)
    }
}

/// What a predicate is evaluated against: resource state, plus the status
/// of the operation being polled when there is one.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub state: ResourceState,
    pub operation: Option<OperationStatus>,
}

impl Observation {
    /// Observation of resource state alone.
    pub fn of_state(state: ResourceState) -> Self {
        Self {
            state,
            operation: None,
        }
    }

    /// Observation while polling an operation.
    pub fn polled(state: ResourceState, operation: OperationStatus) -> Self {
        Self {
            state,
            operation: Some(operation),
        }
    }
}

/// Declarative predicate over an [`Observation`].
///
/// Used for idempotency ("already satisfied"), async completion and
/// failure detection, and post-condition validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "when", content = "value", rename_all = "snake_case")]
pub enum StatePredicate {
    /// Always holds.
    Always,
    /// Never holds.
    Never,
    /// The resource does not exist.
    Absent,
    /// The resource exists in any state.
    Exists,
    /// The resource exists and provisioning succeeded.
    ExistsHealthy,
    /// The resource exists and is in the given provisioning state.
    Provisioning(ProvisioningState),
    /// The resource exists and is in the given power state.
    Power(PowerState),
    /// The resource is healthy and its properties include the given ones.
    PropertiesInclude(ResourceProperties),
    /// The polled operation reported success.
    OperationSucceeded,
    /// The polled operation reported failure.
    OperationFailed,
    /// Every inner predicate holds.
    AllOf(Vec<StatePredicate>),
    /// At least one inner predicate holds.
    AnyOf(Vec<StatePredicate>),
    /// The inner predicate does not hold.
    Not(Box<StatePredicate>),
}

impl StatePredicate {
    /// Evaluate against an observation.
    pub fn holds(&self, observation: &Observation) -> bool {
        let state = &observation.state;
        match self {
            StatePredicate::Always => true,
            StatePredicate::Never => false,
            StatePredicate::Absent => !state.exists,
            StatePredicate::Exists => state.exists,
            StatePredicate::ExistsHealthy => state.is_healthy(),
            StatePredicate::Provisioning(expected) => {
                state.exists && &state.provisioning == expected
            }
            StatePredicate::Power(expected) => state.exists && state.power == Some(*expected),
            StatePredicate::PropertiesInclude(props) => {
                state.is_healthy() && props.satisfied_by(&state.properties)
            }
            StatePredicate::OperationSucceeded => {
                matches!(observation.operation, Some(OperationStatus::Succeeded))
            }
            StatePredicate::OperationFailed => {
                matches!(observation.operation, Some(OperationStatus::Failed { .. }))
            }
            StatePredicate::AllOf(inner) => inner.iter().all(|p| p.holds(observation)),
            StatePredicate::AnyOf(inner) => inner.iter().any(|p| p.holds(observation)),
            StatePredicate::Not(inner) => !inner.holds(observation),
        }
    }

    /// Evaluate against resource state alone.
    pub fn holds_for(&self, state: &ResourceState) -> bool {
        self.holds(&Observation::of_state(state.clone()))
    }
}

impl fmt::Display for StatePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatePredicate::Always => write!(f, "always"),
            StatePredicate::Never => write!(f, "never"),
            StatePredicate::Absent => write!(f, "absent"),
            StatePredicate::Exists => write!(f, "exists"),
            StatePredicate::ExistsHealthy => write!(f, "exists and healthy"),
            StatePredicate::Provisioning(s) => write!(f, "provisioning {}", s),
            StatePredicate::Power(p) => write!(f, "power {:?}", p),
            StatePredicate::PropertiesInclude(_) => write!(f, "healthy with matching properties"),
            StatePredicate::OperationSucceeded => write!(f, "operation succeeded"),
            StatePredicate::OperationFailed => write!(f, "operation failed"),
            StatePredicate::AllOf(inner) => write!(f, "all of {} predicates", inner.len()),
            StatePredicate::AnyOf(inner) => write!(f, "any of {} predicates", inner.len()),
            StatePredicate::Not(inner) => write!(f, "not ({})", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> ResourceState {
        ResourceState::present(ProvisioningState::Succeeded, ResourceProperties::default())
    }

    #[test]
    fn test_descriptor_key_includes_scope() {
        let top = ResourceDescriptor::new("resource_group", "rg-dev");
        assert_eq!(top.key(), "resource_group/rg-dev");

        let child = ResourceDescriptor::new("workspace", "ws-dev").in_scope("rg-dev");
        assert_eq!(child.key(), "workspace/rg-dev/ws-dev");
    }

    #[test]
    fn test_absent_and_healthy_predicates() {
        assert!(StatePredicate::Absent.holds_for(&ResourceState::absent()));
        assert!(!StatePredicate::Absent.holds_for(&healthy()));
        assert!(StatePredicate::ExistsHealthy.holds_for(&healthy()));

        let creating =
            ResourceState::present(ProvisioningState::Creating, ResourceProperties::default());
        assert!(!StatePredicate::ExistsHealthy.holds_for(&creating));
        assert!(StatePredicate::Exists.holds_for(&creating));
    }

    #[test]
    fn test_properties_include_allows_extra_tags() {
        let mut observed = ResourceProperties {
            region: Some("EastUS".into()),
            sku: Some("Standard".into()),
            tags: BTreeMap::new(),
        };
        observed.tags.insert("env".into(), "dev".into());
        observed.tags.insert("owner".into(), "ops".into());

        let mut want = ResourceProperties {
            region: Some("eastus".into()),
            ..Default::default()
        };
        want.tags.insert("env".into(), "dev".into());

        let state = ResourceState::present(ProvisioningState::Succeeded, observed);
        assert!(StatePredicate::PropertiesInclude(want.clone()).holds_for(&state));

        want.sku = Some("Premium".into());
        assert!(!StatePredicate::PropertiesInclude(want).holds_for(&state));
    }

    #[test]
    fn test_operation_predicates_need_polled_status() {
        let plain = Observation::of_state(healthy());
        assert!(!StatePredicate::OperationSucceeded.holds(&plain));

        let polled = Observation::polled(ResourceState::absent(), OperationStatus::Succeeded);
        assert!(StatePredicate::OperationSucceeded.holds(&polled));

        let failed = Observation::polled(
            healthy(),
            OperationStatus::Failed {
                message: "quota".into(),
                retryable: false,
            },
        );
        assert!(StatePredicate::OperationFailed.holds(&failed));
    }

    #[test]
    fn test_combinators() {
        let stopped = healthy().with_power(PowerState::Deallocated);
        let p = StatePredicate::AnyOf(vec![
            StatePredicate::Absent,
            StatePredicate::Power(PowerState::Deallocated),
        ]);
        assert!(p.holds_for(&stopped));
        assert!(!StatePredicate::Not(Box::new(p)).holds_for(&stopped));
        assert!(StatePredicate::AllOf(vec![]).holds_for(&stopped));
    }

    #[test]
    fn test_predicate_serde_shape() {
        let p = StatePredicate::Power(PowerState::Stopped);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"when":"power","value":"stopped"}"#);
        let back: StatePredicate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
