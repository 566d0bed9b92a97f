//! Cluster orchestrator interface.
//!
//! The orchestrator grants permission to take a node out of service. The agent
//! must hold that permission before any disruptive change and give it back
//! once the node is healthy again.

use async_trait::async_trait;

use crate::error::OrchestratorError;

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Ask for permission to take the node down.
    ///
    /// Fails with [`OrchestratorError::Denied`] if too many peers are down.
    async fn suspend(&self, hostname: &str) -> Result<(), OrchestratorError>;

    /// Return the node to service.
    async fn resume(&self, hostname: &str) -> Result<(), OrchestratorError>;
}
