//! Simulated control plane.
//!
//! An in-memory, eventually-consistent stand-in for a cloud control plane.
//! Failures, latency and async completion are scriptable per resource, and
//! every call is recorded so tests can assert on ordering and on the absence
//! of mutating calls. The CLI uses it with a JSON state file for local runs.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use lifecycle_types::{
    OperationKind, OperationStatus, PowerState, ProvisioningState, ResourceDescriptor,
    ResourceState,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::{OperationHandle, ResourceClient};
use crate::error::{ClientError, ClientResult, OrchestratorError};

/// Client method, as recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Get,
    Create,
    Update,
    Delete,
    Stop,
    Deallocate,
    Poll,
}

impl CallKind {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, CallKind::Get | CallKind::Poll)
    }

    fn from_operation(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Create => CallKind::Create,
            OperationKind::Update => CallKind::Update,
            OperationKind::Delete => CallKind::Delete,
            OperationKind::Stop => CallKind::Stop,
            OperationKind::Deallocate => CallKind::Deallocate,
        }
    }
}

/// One recorded call. Sequence numbers are global across the client:
/// `started` is taken on entry, `finished` on return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub kind: CallKind,
    pub target: String,
    pub started: u64,
    pub finished: u64,
}

/// How a submitted operation completes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Completion {
    /// Applied at submission; the first poll reports success.
    #[default]
    Immediate,
    /// Applied once the operation has been polled this many times.
    AfterPolls(u32),
    /// Never completes; the resource stays in its transitional state.
    Never,
    /// Fails once polled this many times, leaving the resource `Failed`.
    FailAfterPolls {
        polls: u32,
        message: String,
        retryable: bool,
    },
}

#[derive(Debug, Clone)]
struct PendingOperation {
    descriptor: ResourceDescriptor,
    kind: OperationKind,
    completion: Completion,
    polls: u32,
    status: OperationStatus,
}

/// Serializable resource table, keyed by descriptor key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulatedSnapshot {
    pub resources: BTreeMap<String, ResourceState>,
}

/// In-memory control plane.
pub struct SimulatedResourceClient {
    resources: DashMap<String, ResourceState>,
    operations: DashMap<String, PendingOperation>,
    failures: DashMap<(String, CallKind), VecDeque<ClientError>>,
    completions: DashMap<String, Completion>,
    latency: DashMap<String, Duration>,
    calls: Mutex<Vec<CallRecord>>,
    sequence: AtomicU64,
    next_operation: AtomicU64,
}

impl SimulatedResourceClient {
    /// Create an empty control plane.
    pub fn new() -> Self {
        Self {
            resources: DashMap::new(),
            operations: DashMap::new(),
            failures: DashMap::new(),
            completions: DashMap::new(),
            latency: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
            next_operation: AtomicU64::new(1),
        }
    }

    /// Seed an existing, healthy resource.
    pub fn seed(&self, descriptor: &ResourceDescriptor) {
        self.insert(
            descriptor,
            ResourceState::present(ProvisioningState::Succeeded, descriptor.properties.clone()),
        );
    }

    /// Seed a resource in an arbitrary state.
    pub fn insert(&self, descriptor: &ResourceDescriptor, state: ResourceState) {
        self.resources.insert(descriptor.key(), state);
    }

    /// Make the next `times` calls of `kind` against `descriptor` fail with `error`.
    pub fn fail_next(
        &self,
        descriptor: &ResourceDescriptor,
        kind: CallKind,
        error: ClientError,
        times: usize,
    ) {
        let mut queue = self.failures.entry((descriptor.key(), kind)).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Set how operations submitted against `descriptor` complete.
    pub fn set_completion(&self, descriptor: &ResourceDescriptor, completion: Completion) {
        self.completions.insert(descriptor.key(), completion);
    }

    /// Delay every mutating call against `descriptor`.
    pub fn set_latency(&self, descriptor: &ResourceDescriptor, latency: Duration) {
        self.latency.insert(descriptor.key(), latency);
    }

    /// Current state without recording a call.
    pub fn peek(&self, descriptor: &ResourceDescriptor) -> ResourceState {
        self.resources
            .get(&descriptor.key())
            .map(|s| s.clone())
            .unwrap_or_else(ResourceState::absent)
    }

    /// Every recorded call, in completion order.
    pub async fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().await.clone()
    }

    /// Recorded calls that mutate state.
    pub async fn mutating_calls(&self) -> Vec<CallRecord> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.kind.is_mutating())
            .cloned()
            .collect()
    }

    /// Recorded calls of one kind.
    pub async fn calls_of(&self, kind: CallKind) -> Vec<CallRecord> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.kind == kind)
            .cloned()
            .collect()
    }

    /// Resource table as it stands.
    pub fn snapshot(&self) -> SimulatedSnapshot {
        SimulatedSnapshot {
            resources: self
                .resources
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }

    /// Build a control plane from a snapshot.
    pub fn from_snapshot(snapshot: SimulatedSnapshot) -> Self {
        let client = Self::new();
        for (key, state) in snapshot.resources {
            client.resources.insert(key, state);
        }
        client
    }

    /// Load a snapshot file; a missing file yields an empty control plane.
    pub async fn load(path: &Path) -> Result<Self, OrchestratorError> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(Self::new());
        }
        let contents = tokio::fs::read_to_string(path).await?;
        let snapshot: SimulatedSnapshot = serde_json::from_str(&contents)?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Persist the resource table.
    pub async fn save(&self, path: &Path) -> Result<(), OrchestratorError> {
        let contents = serde_json::to_string_pretty(&self.snapshot())?;
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    fn begin(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    async fn finish(&self, kind: CallKind, target: String, started: u64) {
        let finished = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().await.push(CallRecord {
            kind,
            target,
            started,
            finished,
        });
    }

    fn take_failure(&self, key: &str, kind: CallKind) -> Option<ClientError> {
        self.failures
            .get_mut(&(key.to_string(), kind))
            .and_then(|mut queue| queue.pop_front())
    }

    async fn submit(
        &self,
        descriptor: &ResourceDescriptor,
        kind: OperationKind,
    ) -> ClientResult<OperationHandle> {
        let key = descriptor.key();
        let call = CallKind::from_operation(kind);
        let started = self.begin();

        let latency = self.latency.get(&key).map(|d| *d);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let result = self.apply_submission(descriptor, kind);
        self.finish(call, key, started).await;
        result
    }

    fn apply_submission(
        &self,
        descriptor: &ResourceDescriptor,
        kind: OperationKind,
    ) -> ClientResult<OperationHandle> {
        let key = descriptor.key();
        if let Some(error) = self.take_failure(&key, CallKind::from_operation(kind)) {
            return Err(error);
        }

        let current = self.resources.get(&key).map(|s| s.clone());
        match (kind, &current) {
            (OperationKind::Delete | OperationKind::Stop | OperationKind::Deallocate, None) => {
                return Err(ClientError::NotFound(key));
            }
            (_, Some(state)) if state.provisioning == ProvisioningState::Deleting => {
                return Err(ClientError::Conflict(format!("{} is being deleted", key)));
            }
            _ => {}
        }

        let transitional = match kind {
            OperationKind::Create => {
                ResourceState::present(ProvisioningState::Creating, descriptor.properties.clone())
            }
            OperationKind::Update => {
                ResourceState::present(ProvisioningState::Updating, descriptor.properties.clone())
            }
            OperationKind::Delete | OperationKind::Stop | OperationKind::Deallocate => {
                let mut state = current.clone().unwrap_or_else(ResourceState::absent);
                if kind == OperationKind::Delete {
                    state.provisioning = ProvisioningState::Deleting;
                }
                state
            }
        };
        self.resources.insert(key.clone(), transitional);

        let id = format!(
            "sim-op-{}",
            self.next_operation.fetch_add(1, Ordering::SeqCst)
        );
        let completion = self
            .completions
            .get(&key)
            .map(|c| c.clone())
            .unwrap_or_default();

        let mut pending = PendingOperation {
            descriptor: descriptor.clone(),
            kind,
            completion,
            polls: 0,
            status: OperationStatus::InProgress,
        };
        if pending.completion == Completion::Immediate {
            self.complete(&mut pending);
        }

        debug!(operation = %id, target = %key, kind = %kind, "Simulated operation submitted");
        self.operations.insert(id.clone(), pending);
        Ok(OperationHandle::new(id, kind, descriptor))
    }

    fn complete(&self, pending: &mut PendingOperation) {
        let key = pending.descriptor.key();
        match pending.kind {
            OperationKind::Create | OperationKind::Update => {
                let mut state = ResourceState::present(
                    ProvisioningState::Succeeded,
                    pending.descriptor.properties.clone(),
                );
                if let Some(previous) = self.resources.get(&key).and_then(|s| s.power) {
                    state.power = Some(previous);
                }
                self.resources.insert(key, state);
            }
            OperationKind::Delete => {
                self.resources.remove(&key);
            }
            OperationKind::Stop | OperationKind::Deallocate => {
                let power = if pending.kind == OperationKind::Stop {
                    PowerState::Stopped
                } else {
                    PowerState::Deallocated
                };
                if let Some(mut state) = self.resources.get_mut(&key) {
                    state.power = Some(power);
                }
            }
        }
        pending.status = OperationStatus::Succeeded;
    }

    fn fail(&self, pending: &mut PendingOperation, message: String, retryable: bool) {
        let key = pending.descriptor.key();
        if let Some(mut state) = self.resources.get_mut(&key) {
            state.provisioning = ProvisioningState::Failed;
        }
        pending.status = OperationStatus::Failed { message, retryable };
    }
}

impl Default for SimulatedResourceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceClient for SimulatedResourceClient {
    async fn get(&self, descriptor: &ResourceDescriptor) -> ClientResult<ResourceState> {
        let key = descriptor.key();
        let started = self.begin();
        let result = match self.take_failure(&key, CallKind::Get) {
            Some(error) => Err(error),
            None => Ok(self.peek(descriptor)),
        };
        self.finish(CallKind::Get, key, started).await;
        result
    }

    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        _spec: &serde_json::Value,
    ) -> ClientResult<OperationHandle> {
        self.submit(descriptor, OperationKind::Create).await
    }

    async fn update(
        &self,
        descriptor: &ResourceDescriptor,
        _spec: &serde_json::Value,
    ) -> ClientResult<OperationHandle> {
        self.submit(descriptor, OperationKind::Update).await
    }

    async fn delete(&self, descriptor: &ResourceDescriptor) -> ClientResult<OperationHandle> {
        self.submit(descriptor, OperationKind::Delete).await
    }

    async fn stop(&self, descriptor: &ResourceDescriptor) -> ClientResult<OperationHandle> {
        self.submit(descriptor, OperationKind::Stop).await
    }

    async fn deallocate(&self, descriptor: &ResourceDescriptor) -> ClientResult<OperationHandle> {
        self.submit(descriptor, OperationKind::Deallocate).await
    }

    async fn poll_operation(&self, handle: &OperationHandle) -> ClientResult<OperationStatus> {
        let started = self.begin();
        let result = match self.take_failure(&handle.target, CallKind::Poll) {
            Some(error) => Err(error),
            None => match self.operations.get_mut(&handle.id) {
                None => Err(ClientError::NotFound(handle.id.clone())),
                Some(mut entry) => {
                    let pending = entry.value_mut();
                    if !pending.status.is_terminal() {
                        pending.polls += 1;
                        match pending.completion.clone() {
                            Completion::Immediate => self.complete(pending),
                            Completion::AfterPolls(n) if pending.polls >= n => {
                                self.complete(pending)
                            }
                            Completion::FailAfterPolls {
                                polls,
                                message,
                                retryable,
                            } if pending.polls >= polls => self.fail(pending, message, retryable),
                            _ => {}
                        }
                    }
                    Ok(pending.status.clone())
                }
            },
        };
        self.finish(CallKind::Poll, handle.target.clone(), started).await;
        result
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rg() -> ResourceDescriptor {
        ResourceDescriptor::new("resource_group", "rg-dev").with_region("eastus")
    }

    #[tokio::test]
    async fn test_immediate_create_is_visible() {
        let client = SimulatedResourceClient::new();
        let handle = client.create(&rg(), &serde_json::Value::Null).await.unwrap();
        assert!(client.peek(&rg()).is_healthy());
        assert_eq!(
            client.poll_operation(&handle).await.unwrap(),
            OperationStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_delete_completes_after_polls() {
        let client = SimulatedResourceClient::new();
        client.seed(&rg());
        client.set_completion(&rg(), Completion::AfterPolls(2));

        let handle = client.delete(&rg()).await.unwrap();
        assert_eq!(client.peek(&rg()).provisioning, ProvisioningState::Deleting);
        assert_eq!(
            client.poll_operation(&handle).await.unwrap(),
            OperationStatus::InProgress
        );
        assert_eq!(
            client.poll_operation(&handle).await.unwrap(),
            OperationStatus::Succeeded
        );
        assert!(!client.peek(&rg()).exists);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed() {
        let client = SimulatedResourceClient::new();
        client.fail_next(&rg(), CallKind::Create, ClientError::Throttled("429".into()), 2);

        for _ in 0..2 {
            let err = client.create(&rg(), &serde_json::Value::Null).await.unwrap_err();
            assert!(err.is_transient());
        }
        assert!(client.create(&rg(), &serde_json::Value::Null).await.is_ok());
        assert_eq!(client.calls_of(CallKind::Create).await.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let client = SimulatedResourceClient::new();
        let err = client.delete(&rg()).await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_creation_marks_resource_failed() {
        let client = SimulatedResourceClient::new();
        client.set_completion(
            &rg(),
            Completion::FailAfterPolls {
                polls: 1,
                message: "deployment failed".into(),
                retryable: true,
            },
        );
        let handle = client.create(&rg(), &serde_json::Value::Null).await.unwrap();
        let status = client.poll_operation(&handle).await.unwrap();
        assert!(matches!(status, OperationStatus::Failed { retryable: true, .. }));
        assert_eq!(client.peek(&rg()).provisioning, ProvisioningState::Failed);
    }

    #[tokio::test]
    async fn test_deallocate_sets_power_state() {
        let vm = ResourceDescriptor::new("vm", "vm-1").in_scope("rg-dev");
        let client = SimulatedResourceClient::new();
        client.insert(
            &vm,
            ResourceState::present(ProvisioningState::Succeeded, Default::default())
                .with_power(PowerState::Running),
        );
        client.deallocate(&vm).await.unwrap();
        assert_eq!(client.peek(&vm).power, Some(PowerState::Deallocated));
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let client = SimulatedResourceClient::new();
        client.seed(&rg());
        client.save(&path).await.unwrap();

        let restored = SimulatedResourceClient::load(&path).await.unwrap();
        assert!(restored.peek(&rg()).is_healthy());

        let empty = SimulatedResourceClient::load(&dir.path().join("missing.json"))
            .await
            .unwrap();
        assert!(empty.snapshot().resources.is_empty());
    }

    #[tokio::test]
    async fn test_get_is_not_mutating() {
        let client = SimulatedResourceClient::new();
        client.get(&rg()).await.unwrap();
        assert!(client.mutating_calls().await.is_empty());
        assert_eq!(client.calls().await.len(), 1);
    }
}
