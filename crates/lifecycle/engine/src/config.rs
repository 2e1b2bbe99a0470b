//! Orchestrator configuration.
//!
//! Loaded from defaults, an optional file, and `LIFECYCLE__*` environment
//! variables, in that order of increasing precedence.

use std::time::Duration;

use lifecycle_types::{BackoffStrategy, RetryPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Main orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Default retry policy for mutating operations
    #[serde(default)]
    pub retry: RetryConfig,

    /// Async operation polling
    #[serde(default)]
    pub poll: PollConfig,

    /// Wait after a successful create-style operation before reading it back
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    /// Minimum score for a partially ready run to exit successfully
    #[serde(default = "default_threshold")]
    pub readiness_threshold: f64,

    /// Allow phases flagged `parallel` to dispatch their operations concurrently
    #[serde(default)]
    pub parallel_phases: bool,

    /// Overall run deadline
    #[serde(default)]
    pub run_deadline_secs: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            settle_delay_secs: default_settle_delay(),
            readiness_threshold: default_threshold(),
            parallel_phases: false,
            run_deadline_secs: None,
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait between attempts in seconds
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,

    /// `fixed` or `linear`
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff(),
            backoff: BackoffStrategy::Fixed,
        }
    }
}

/// Polling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Interval between polls in seconds
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,

    /// Poll window for operations whose contract does not set one
    #[serde(default = "default_poll_timeout")]
    pub timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            timeout_secs: default_poll_timeout(),
        }
    }
}

// Default value helpers
fn default_settle_delay() -> u64 {
    10
}

fn default_threshold() -> f64 {
    1.0
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    30
}

fn default_poll_timeout() -> u64 {
    1800
}

impl OrchestratorConfig {
    /// Load configuration from an optional file plus `LIFECYCLE__` environment overrides
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&OrchestratorConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("LIFECYCLE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: OrchestratorConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(OrchestratorError::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.poll.interval_secs == 0 {
            return Err(OrchestratorError::Configuration(
                "poll.interval_secs must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.readiness_threshold) {
            return Err(OrchestratorError::Configuration(format!(
                "readiness_threshold must be within [0, 1], got {}",
                self.readiness_threshold
            )));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff: Duration::from_secs(self.retry.backoff_secs),
            strategy: self.retry.backoff,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll.timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }
}
