//! Lifecycle Types - Core data model for the resource lifecycle orchestrator
//!
//! This crate defines the vocabulary shared by the engine and the CLI:
//! - Resource descriptors, observed state and state predicates
//! - Operations, retry policies and async contracts
//! - Phases and immutable deployment plans
//! - Operation results, validation reports and run reports

#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod ids;
pub mod operation;
pub mod plan;
pub mod report;
pub mod resource;
pub mod result;

pub use error::{PlanError, PlanResult};
pub use ids::{OperationId, RunId};
pub use operation::{AsyncContract, BackoffStrategy, Operation, OperationKind, RetryPolicy};
pub use plan::{DeploymentPlan, Phase, PlanBuilder, PlanIntent, PlanMetadata};
pub use report::{
    CheckResult, CheckStatus, ExitStatus, PhaseReport, Recommendation, RunReport, RunState,
    ValidationCheck, ValidationReport,
};
pub use resource::{
    Observation, OperationStatus, PowerState, ProvisioningState, ResourceDescriptor,
    ResourceProperties, ResourceState, StatePredicate,
};
pub use result::{
    ErrorClass, OperationErrorInfo, OperationOutcome, OperationResult, SkipReason,
};
