//! Operations, retry policies and async contracts.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::OperationId;
use crate::resource::{PowerState, ProvisioningState, ResourceDescriptor, StatePredicate};

/// Kind of mutation an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Stop,
    Deallocate,
}

impl OperationKind {
    /// Create-style operations may leave a partial artifact behind on failure.
    pub fn is_create_style(&self) -> bool {
        matches!(self, OperationKind::Create | OperationKind::Update)
    }

    /// Predicate under which this kind of operation is already satisfied.
    pub fn default_satisfied_when(&self, target: &ResourceDescriptor) -> StatePredicate {
        match self {
            OperationKind::Create => StatePredicate::ExistsHealthy,
            OperationKind::Update => StatePredicate::PropertiesInclude(target.properties.clone()),
            OperationKind::Delete => StatePredicate::Absent,
            OperationKind::Stop => StatePredicate::AnyOf(vec![
                StatePredicate::Absent,
                StatePredicate::Power(PowerState::Stopped),
                StatePredicate::Power(PowerState::Deallocated),
            ]),
            OperationKind::Deallocate => StatePredicate::AnyOf(vec![
                StatePredicate::Absent,
                StatePredicate::Power(PowerState::Deallocated),
            ]),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
            OperationKind::Stop => write!(f, "stop"),
            OperationKind::Deallocate => write!(f, "deallocate"),
        }
    }
}

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same wait before every retry.
    #[default]
    Fixed,
    /// Wait grows by one backoff unit per failed attempt.
    Linear,
}

/// Retry policy shared by mutating operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,

    /// Base wait between attempts.
    pub backoff: Duration,

    /// How the wait grows.
    #[serde(default)]
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(10),
            strategy: BackoffStrategy::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempts and fixed backoff.
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Wait before the attempt following `failed_attempt` (1-based).
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed => self.backoff,
            BackoffStrategy::Linear => self.backoff.saturating_mul(failed_attempt.max(1)),
        }
    }
}

/// Completion contract for a long-running operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncContract {
    /// Observation meaning "done".
    pub done_when: StatePredicate,

    /// Observation meaning "terminally failed".
    pub failed_when: StatePredicate,

    /// Maximum wall-clock time to poll for.
    pub timeout: Duration,

    /// Poll interval override; the poller default applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<Duration>,
}

impl AsyncContract {
    /// Contract for a creation: done once the resource is healthy.
    pub fn creation(timeout: Duration) -> Self {
        Self {
            done_when: StatePredicate::ExistsHealthy,
            failed_when: StatePredicate::AnyOf(vec![
                StatePredicate::OperationFailed,
                StatePredicate::Provisioning(ProvisioningState::Failed),
            ]),
            timeout,
            poll_interval: None,
        }
    }

    /// Contract for a deletion: done once the resource is gone.
    pub fn deletion(timeout: Duration) -> Self {
        Self {
            done_when: StatePredicate::Absent,
            failed_when: StatePredicate::OperationFailed,
            timeout,
            poll_interval: None,
        }
    }

    /// Contract for a power transition.
    pub fn power(target: PowerState, timeout: Duration) -> Self {
        Self {
            done_when: StatePredicate::AnyOf(vec![
                StatePredicate::Absent,
                StatePredicate::Power(target),
            ]),
            failed_when: StatePredicate::OperationFailed,
            timeout,
            poll_interval: None,
        }
    }

    /// Default contract for an operation kind.
    pub fn for_kind(kind: OperationKind, timeout: Duration) -> Self {
        match kind {
            OperationKind::Create | OperationKind::Update => Self::creation(timeout),
            OperationKind::Delete => Self::deletion(timeout),
            OperationKind::Stop => Self::power(PowerState::Stopped, timeout),
            OperationKind::Deallocate => Self::power(PowerState::Deallocated, timeout),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
}

/// A single typed operation against one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Stable identity within the plan.
    pub id: OperationId,

    /// What to do.
    pub kind: OperationKind,

    /// What to do it to.
    pub target: ResourceDescriptor,

    /// Idempotency predicate: when it holds, the operation is skipped.
    pub satisfied_when: StatePredicate,

    /// Name of a retry policy registered on the plan; the runner default
    /// applies when unset or unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<String>,

    /// Completion contract for long-running operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_contract: Option<AsyncContract>,

    /// Partial artifact to delete (best effort) before retrying a
    /// create-style operation, e.g. a failed deployment record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_before_retry: Option<ResourceDescriptor>,

    /// Opaque payload handed to the control plane on create/update.
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl Operation {
    /// Create an operation with the default idempotency predicate for its kind.
    pub fn new(phase: &str, kind: OperationKind, target: ResourceDescriptor) -> Self {
        let id = OperationId::new(format!("{}/{}/{}", phase, kind, target.key()));
        let satisfied_when = kind.default_satisfied_when(&target);
        Self {
            id,
            kind,
            target,
            satisfied_when,
            retry_policy: None,
            async_contract: None,
            cleanup_before_retry: None,
            spec: serde_json::Value::Null,
        }
    }

    pub fn create(phase: &str, target: ResourceDescriptor) -> Self {
        Self::new(phase, OperationKind::Create, target)
    }

    pub fn delete(phase: &str, target: ResourceDescriptor) -> Self {
        Self::new(phase, OperationKind::Delete, target)
    }

    /// Override the idempotency predicate.
    pub fn satisfied_when(mut self, predicate: StatePredicate) -> Self {
        self.satisfied_when = predicate;
        self
    }

    pub fn with_retry_policy(mut self, name: impl Into<String>) -> Self {
        self.retry_policy = Some(name.into());
        self
    }

    pub fn with_async(mut self, contract: AsyncContract) -> Self {
        self.async_contract = Some(contract);
        self
    }

    pub fn with_cleanup(mut self, artifact: ResourceDescriptor) -> Self {
        self.cleanup_before_retry = Some(artifact);
        self
    }

    pub fn with_spec(mut self, spec: serde_json::Value) -> Self {
        self.spec = spec;
        self
    }
}
