//! Per-operation results.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::OperationId;
use crate::operation::{Operation, OperationKind};

/// Why an operation was not dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Idempotency predicate already held.
    AlreadySatisfied,
    /// Dry run; the operation would have been dispatched.
    WhatIf,
    /// An earlier failure aborted the run or the phase, or the run was
    /// interrupted before another attempt.
    NotAttempted,
}

/// Outcome of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum OperationOutcome {
    Succeeded,
    Failed,
    Skipped(SkipReason),
    /// Transient failure; another attempt is scheduled. Progress only, never final.
    Retrying,
    /// Accepted by the control plane but not finished within the poll window.
    InProgress,
}

impl OperationOutcome {
    /// Terminal for the purpose of phase sequencing.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationOutcome::Retrying)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, OperationOutcome::Failed)
    }
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationOutcome::Succeeded => write!(f, "succeeded"),
            OperationOutcome::Failed => write!(f, "failed"),
            OperationOutcome::Skipped(SkipReason::AlreadySatisfied) => {
                write!(f, "skipped (already satisfied)")
            }
            OperationOutcome::Skipped(SkipReason::WhatIf) => write!(f, "skipped (what-if)"),
            OperationOutcome::Skipped(SkipReason::NotAttempted) => {
                write!(f, "skipped (not attempted)")
            }
            OperationOutcome::Retrying => write!(f, "retrying"),
            OperationOutcome::InProgress => write!(f, "in progress"),
        }
    }
}

/// Retryability of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Last error seen by an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationErrorInfo {
    pub class: ErrorClass,
    pub message: String,
    /// A transient error that outlived the retry budget.
    #[serde(default)]
    pub retries_exhausted: bool,
}

impl OperationErrorInfo {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            retries_exhausted: false,
        }
    }

    /// Treated as permanent for reporting: either permanent to begin with
    /// or transient with the retries used up.
    pub fn is_effectively_permanent(&self) -> bool {
        self.class == ErrorClass::Permanent || self.retries_exhausted
    }
}

/// Result of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub operation_id: OperationId,
    pub phase: String,
    pub kind: OperationKind,
    /// Target key (`type/scope/name`).
    pub target: String,
    pub outcome: OperationOutcome,
    /// Dispatch attempts made; zero for skipped operations.
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<OperationErrorInfo>,
    /// Free-form notes, e.g. cleanup failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

impl OperationResult {
    /// Result for `operation` with the given outcome and no attempts.
    pub fn new(phase: &str, operation: &Operation, outcome: OperationOutcome) -> Self {
        Self {
            operation_id: operation.id.clone(),
            phase: phase.to_string(),
            kind: operation.kind,
            target: operation.target.key(),
            outcome,
            attempts: 0,
            elapsed_ms: 0,
            last_error: None,
            notes: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    pub fn skipped(phase: &str, operation: &Operation, reason: SkipReason) -> Self {
        Self::new(phase, operation, OperationOutcome::Skipped(reason))
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_error(mut self, error: OperationErrorInfo) -> Self {
        self.last_error = Some(error);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}
