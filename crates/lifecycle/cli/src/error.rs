//! CLI error types

use lifecycle_engine::OrchestratorError;
use lifecycle_types::ExitStatus;
use thiserror::Error;

/// CLI error types
#[derive(Debug, Error)]
pub enum CliError {
    /// Engine error (bad parameters, unreadable blueprint or config)
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Orchestrator(e) if e.is_configuration() => {
                ExitStatus::ConfigurationError.code()
            }
            CliError::InvalidInput(_) => ExitStatus::ConfigurationError.code(),
            _ => ExitStatus::Aborted.code(),
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_exit_3() {
        let err = CliError::from(OrchestratorError::Configuration("no location".into()));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(CliError::InvalidInput("threshold".into()).exit_code(), 3);
    }

    #[test]
    fn test_io_errors_exit_1() {
        let err = CliError::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(err.exit_code(), 1);
    }
}
