//! Report sinks.
//!
//! The orchestrator hands every operation result, every retry notice and
//! the final [`RunReport`] to its sinks. It never formats anything itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lifecycle_types::{OperationOutcome, OperationResult, RunReport};
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::error::Result;

/// Receiver of run output
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// A terminal operation result, in completion order
    async fn on_operation(&self, _result: &OperationResult) -> Result<()> {
        Ok(())
    }

    /// A non-terminal progress event (currently `Retrying`)
    async fn on_progress(&self, _result: &OperationResult) -> Result<()> {
        Ok(())
    }

    /// The final report; called exactly once per run
    async fn finish(&self, report: &RunReport) -> Result<()>;
}

/// Logs results through `tracing`
#[derive(Debug, Default)]
pub struct TracingReportSink;

#[async_trait]
impl ReportSink for TracingReportSink {
    async fn on_operation(&self, result: &OperationResult) -> Result<()> {
        let error = result
            .last_error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or("");
        match result.outcome {
            OperationOutcome::Failed => error!(
                operation = %result.operation_id,
                attempts = result.attempts,
                error = error,
                "Operation failed"
            ),
            OperationOutcome::InProgress => warn!(
                operation = %result.operation_id,
                elapsed_ms = result.elapsed_ms,
                "Operation still in progress"
            ),
            outcome => info!(
                operation = %result.operation_id,
                outcome = %outcome,
                attempts = result.attempts,
                elapsed_ms = result.elapsed_ms,
                "Operation finished"
            ),
        }
        Ok(())
    }

    async fn on_progress(&self, result: &OperationResult) -> Result<()> {
        warn!(
            operation = %result.operation_id,
            attempt = result.attempts,
            error = result.last_error.as_ref().map(|e| e.message.as_str()).unwrap_or(""),
            "Transient failure, retrying"
        );
        Ok(())
    }

    async fn finish(&self, report: &RunReport) -> Result<()> {
        info!(
            run_id = %report.run_id,
            state = %report.state,
            score = report.validation.score(),
            recommendation = %report.validation.recommendation(),
            "{}",
            report.next_action()
        );
        Ok(())
    }
}

/// Writes the serialized report to a file at the end of the run
pub struct JsonFileReportSink {
    path: PathBuf,
}

impl JsonFileReportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReportSink for JsonFileReportSink {
    async fn finish(&self, report: &RunReport) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&self.path, json).await?;
        info!(path = %self.path.display(), "Report written");
        Ok(())
    }
}

/// In-memory sink for tests
#[derive(Default)]
pub struct CollectingReportSink {
    operations: RwLock<Vec<OperationResult>>,
    progress: RwLock<Vec<OperationResult>>,
    report: RwLock<Option<RunReport>>,
}

impl CollectingReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operations(&self) -> Vec<OperationResult> {
        self.operations.read().clone()
    }

    pub fn progress(&self) -> Vec<OperationResult> {
        self.progress.read().clone()
    }

    pub fn report(&self) -> Option<RunReport> {
        self.report.read().clone()
    }
}

#[async_trait]
impl ReportSink for CollectingReportSink {
    async fn on_operation(&self, result: &OperationResult) -> Result<()> {
        self.operations.write().push(result.clone());
        Ok(())
    }

    async fn on_progress(&self, result: &OperationResult) -> Result<()> {
        self.progress.write().push(result.clone());
        Ok(())
    }

    async fn finish(&self, report: &RunReport) -> Result<()> {
        *self.report.write() = Some(report.clone());
        Ok(())
    }
}

/// Fans events out to several sinks. Sink errors are logged, never propagated.
#[derive(Clone, Default)]
pub struct ReportFanout {
    sinks: Vec<Arc<dyn ReportSink>>,
}

impl ReportFanout {
    pub fn new(sinks: Vec<Arc<dyn ReportSink>>) -> Self {
        Self { sinks }
    }

    pub fn add(&mut self, sink: Arc<dyn ReportSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub async fn operation(&self, result: &OperationResult) {
        for sink in &self.sinks {
            if let Err(e) = sink.on_operation(result).await {
                warn!(operation = %result.operation_id, error = %e, "Report sink rejected result");
            }
        }
    }

    pub async fn progress(&self, result: &OperationResult) {
        for sink in &self.sinks {
            if let Err(e) = sink.on_progress(result).await {
                warn!(operation = %result.operation_id, error = %e, "Report sink rejected progress");
            }
        }
    }

    pub async fn finish(&self, report: &RunReport) {
        for sink in &self.sinks {
            if let Err(e) = sink.finish(report).await {
                error!(run_id = %report.run_id, error = %e, "Report sink failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lifecycle_types::{
        Operation, PlanIntent, PlanMetadata, ResourceDescriptor, RunState, ValidationReport,
    };

    fn report() -> RunReport {
        let metadata = PlanMetadata::new("dev", "eastus", "rg-dev", "t", PlanIntent::Provision);
        RunReport {
            run_id: metadata.run_id.clone(),
            metadata,
            what_if: false,
            state: RunState::Completed {
                with_failures: false,
            },
            phases: vec![],
            validation: ValidationReport::empty(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_fanout_delivers_to_every_sink() {
        let a = Arc::new(CollectingReportSink::new());
        let b = Arc::new(CollectingReportSink::new());
        let fanout = ReportFanout::new(vec![a.clone(), b.clone(), Arc::new(TracingReportSink)]);

        let op = Operation::create("infra", ResourceDescriptor::new("rg", "rg-dev"));
        let result = OperationResult::new("infra", &op, OperationOutcome::Succeeded);
        fanout.operation(&result).await;
        fanout.finish(&report()).await;

        assert_eq!(a.operations().len(), 1);
        assert_eq!(b.operations().len(), 1);
        assert!(a.report().is_some());
    }

    #[tokio::test]
    async fn test_json_file_sink_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.json");
        let sink = JsonFileReportSink::new(&path);
        sink.finish(&report()).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(written["validation"]["score"], 1.0);
        assert_eq!(written["state"]["state"], "completed");
    }
}
