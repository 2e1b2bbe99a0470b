//! Plan construction errors

use thiserror::Error;

/// Errors raised while assembling a [`DeploymentPlan`](crate::DeploymentPlan).
#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("Phase name must not be empty (ordinal {ordinal})")]
    EmptyPhaseName { ordinal: u32 },

    #[error("Duplicate phase ordinal {ordinal}: '{first}' and '{second}'")]
    DuplicateOrdinal {
        ordinal: u32,
        first: String,
        second: String,
    },

    #[error("Duplicate phase name: {0}")]
    DuplicatePhase(String),

    #[error("Duplicate operation id: {0}")]
    DuplicateOperation(String),

    #[error("Retry policy '{name}' must allow at least one attempt")]
    InvalidRetryPolicy { name: String },

    #[error("Validation check '{name}' has invalid weight {weight}")]
    InvalidCheckWeight { name: String, weight: f64 },

    #[error("Duplicate validation check: {0}")]
    DuplicateCheck(String),

    #[error("Plan metadata is incomplete: {0}")]
    IncompleteMetadata(String),
}

/// Result type for plan construction
pub type PlanResult<T> = std::result::Result<T, PlanError>;
