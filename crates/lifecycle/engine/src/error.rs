//! Engine error types
//!
//! `ClientError` is what the control plane returns; the runner classifies it
//! and folds it into an `OperationResult`. `OrchestratorError` is reserved
//! for failures that stop a run before anything is mutated.

use lifecycle_types::{ErrorClass, PlanError};
use thiserror::Error;

/// Errors returned by a [`ResourceClient`](crate::client::ResourceClient).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("throttled: {0}")]
    Throttled(String),

    #[error("conflict with an operation in progress: {0}")]
    Conflict(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Retryability of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            ClientError::Throttled(_)
            | ClientError::Conflict(_)
            | ClientError::Timeout(_)
            | ClientError::Unavailable(_) => ErrorClass::Transient,
            ClientError::InvalidConfiguration(_)
            | ClientError::AuthorizationDenied(_)
            | ClientError::Authentication(_)
            | ClientError::NotFound(_)
            | ClientError::Other(_) => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Result type for control-plane calls
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Errors that stop a run before any mutation.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Discovery failed for {target}: {source}")]
    Discovery {
        target: String,
        #[source]
        source: ClientError,
    },

    #[error("Invalid plan: {0}")]
    Plan(#[from] PlanError),

    #[error("Config source error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl OrchestratorError {
    /// Configuration-class errors (bad input) as opposed to discovery failures.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, OrchestratorError::Discovery { .. })
    }
}

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;
