//! Control-plane client trait.
//!
//! The orchestrator talks to the cloud only through [`ResourceClient`].
//! Credentials, endpoints and vendor SDKs live behind implementations of
//! this trait; an `Authentication` error from any call is permanent.

use std::fmt;

use async_trait::async_trait;
use lifecycle_types::{Operation, OperationKind, OperationStatus, ResourceDescriptor, ResourceState};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Opaque reference to a long-running control-plane operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle {
    /// Control-plane operation id.
    pub id: String,
    /// What was requested.
    pub kind: OperationKind,
    /// Target key.
    pub target: String,
}

impl OperationHandle {
    pub fn new(id: impl Into<String>, kind: OperationKind, target: &ResourceDescriptor) -> Self {
        Self {
            id: id.into(),
            kind,
            target: target.key(),
        }
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.kind, self.target, self.id)
    }
}

/// Narrow interface to an eventually-consistent control plane.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Whether the resource exists.
    async fn exists(&self, descriptor: &ResourceDescriptor) -> ClientResult<bool> {
        Ok(self.get(descriptor).await?.exists)
    }

    /// Current state; a missing resource yields [`ResourceState::absent`].
    async fn get(&self, descriptor: &ResourceDescriptor) -> ClientResult<ResourceState>;

    /// Submit a creation.
    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        spec: &serde_json::Value,
    ) -> ClientResult<OperationHandle>;

    /// Submit an update. Defaults to create-or-update semantics.
    async fn update(
        &self,
        descriptor: &ResourceDescriptor,
        spec: &serde_json::Value,
    ) -> ClientResult<OperationHandle> {
        self.create(descriptor, spec).await
    }

    /// Submit a deletion.
    async fn delete(&self, descriptor: &ResourceDescriptor) -> ClientResult<OperationHandle>;

    /// Submit a stop. Not every control plane supports power transitions.
    async fn stop(&self, descriptor: &ResourceDescriptor) -> ClientResult<OperationHandle> {
        Err(ClientError::InvalidConfiguration(format!(
            "stop not supported for {}",
            descriptor.key()
        )))
    }

    /// Submit a deallocation.
    async fn deallocate(&self, descriptor: &ResourceDescriptor) -> ClientResult<OperationHandle> {
        Err(ClientError::InvalidConfiguration(format!(
            "deallocate not supported for {}",
            descriptor.key()
        )))
    }

    /// Status of a previously submitted operation.
    async fn poll_operation(&self, handle: &OperationHandle) -> ClientResult<OperationStatus>;

    /// Client name for logging.
    fn name(&self) -> &str;
}

/// Submit `operation` through the matching client method.
pub async fn dispatch(
    client: &dyn ResourceClient,
    operation: &Operation,
) -> ClientResult<OperationHandle> {
    let target = &operation.target;
    match operation.kind {
        OperationKind::Create => client.create(target, &operation.spec).await,
        OperationKind::Update => client.update(target, &operation.spec).await,
        OperationKind::Delete => client.delete(target).await,
        OperationKind::Stop => client.stop(target).await,
        OperationKind::Deallocate => client.deallocate(target).await,
    }
}
