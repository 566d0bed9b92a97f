//! Per-pass maintainers and health verification.
//!
//! Maintainers converge host-side state that must track the node regardless
//! of what happens to its container: network ACLs, node storage and
//! credentials. Each is invoked once per pass and must be idempotent.

use async_trait::async_trait;
use warden_reconcile::{Container, DockerImage};

use crate::context::NodeAgentContext;
use crate::error::ConvergenceError;
use crate::runtime::RegistryCredentials;

/// Keeps the container's network ACLs in sync with the cluster.
#[async_trait]
pub trait AclMaintainer: Send + Sync {
    async fn converge(&self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError>;
}

/// Manages the node's storage on the host.
#[async_trait]
pub trait StorageMaintainer: Send + Sync {
    async fn converge(&self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError>;

    /// Collect core dumps left in the container before it goes away.
    async fn handle_core_dumps(
        &self,
        ctx: &NodeAgentContext,
        container: &Container,
    ) -> Result<(), ConvergenceError>;

    /// Archive the node's storage when the node is returned to the pool.
    async fn archive_node_storage(&self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError>;
}

/// Keeps identity and service credentials on the node fresh.
#[async_trait]
pub trait CredentialsMaintainer: Send + Sync {
    async fn converge(&self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError>;

    /// Credentials for pulling `image`, if its registry requires them.
    async fn registry_credentials(
        &self,
        _ctx: &NodeAgentContext,
        _image: &DockerImage,
    ) -> Option<RegistryCredentials> {
        None
    }
}

/// Verifies the workload inside the container is serving.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Fails with a transient error while the node is unhealthy.
    async fn verify_health(&self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError>;
}
