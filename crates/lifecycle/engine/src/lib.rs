//! Lifecycle Engine - Ordered, idempotent provisioning and decommissioning
//!
//! The engine drives a [`DeploymentPlan`](lifecycle_types::DeploymentPlan)
//! against an eventually-consistent control plane:
//!
//! - [`PreflightValidator`] discovers current state before anything is mutated
//! - [`PhaseExecutor`] runs phases in order, honoring fail-fast policies
//! - [`RetryingOperationRunner`] retries transient failures with backoff
//! - [`AsyncOperationPoller`] waits for long-running operations, bounded by a timeout
//! - [`PostConditionValidator`] scores a weighted checklist against fresh state
//!
//! [`Orchestrator`] ties them together and always produces a
//! [`RunReport`](lifecycle_types::RunReport).

#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod blueprint;
pub mod cancel;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod poller;
pub mod preflight;
pub mod resolver;
pub mod retry;
pub mod simulated;
pub mod sink;
pub mod validator;

pub use blueprint::{optional_check_requested, PlanBlueprint};
pub use cancel::{CancelHandle, CancelToken, Interruption};
pub use client::{dispatch, OperationHandle, ResourceClient};
pub use config::{OrchestratorConfig, PollConfig, RetryConfig};
pub use context::RunContext;
pub use error::{ClientError, ClientResult, OrchestratorError, Result};
pub use executor::{ExecutionOutcome, PhaseExecutor};
pub use orchestrator::{Orchestrator, RunOptions};
pub use poller::{AsyncOperationPoller, PollOutcome, PollState};
pub use preflight::{PreflightAnnotation, PreflightValidator, PreflightedPlan};
pub use resolver::{ExplicitParameters, ParameterFile, ParameterResolver};
pub use retry::RetryingOperationRunner;
pub use simulated::{CallKind, CallRecord, Completion, SimulatedResourceClient, SimulatedSnapshot};
pub use sink::{
    CollectingReportSink, JsonFileReportSink, ReportFanout, ReportSink, TracingReportSink,
};
pub use validator::{evaluate_check, PostConditionValidator};
