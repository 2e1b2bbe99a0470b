//! Run Context - immutable state shared by every component of one run

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lifecycle_types::{PlanMetadata, RunId};

use crate::cancel::CancelToken;

/// Everything a component needs to know about the run it is part of.
///
/// Built once by the orchestrator and passed by reference; nothing in the
/// engine keeps run state anywhere else.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Correlation id
    pub run_id: RunId,
    /// Resolved plan metadata
    pub metadata: Arc<PlanMetadata>,
    /// Dry run: never call mutating client methods
    pub what_if: bool,
    /// Cancellation and overall deadline
    pub cancel: CancelToken,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    /// Create a context for `metadata`, reusing its run id.
    pub fn new(metadata: Arc<PlanMetadata>, what_if: bool, cancel: CancelToken) -> Self {
        Self {
            run_id: metadata.run_id.clone(),
            metadata,
            what_if,
            cancel,
            started_at: Utc::now(),
        }
    }

    pub fn environment(&self) -> &str {
        &self.metadata.environment_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifecycle_types::PlanIntent;

    #[test]
    fn test_context_takes_run_id_from_metadata() {
        let metadata = Arc::new(PlanMetadata::new(
            "dev",
            "eastus",
            "rg-dev",
            "abc",
            PlanIntent::Provision,
        ));
        let ctx = RunContext::new(metadata.clone(), true, CancelToken::never());
        assert_eq!(ctx.run_id, metadata.run_id);
        assert_eq!(ctx.environment(), "dev");
        assert!(ctx.what_if);
    }
}
