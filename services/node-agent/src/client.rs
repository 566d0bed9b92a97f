//! Node inventory interface.
//!
//! The inventory is the authority on desired node state. The agent reads a
//! [`NodeSpec`] from it at the start of every pass and writes back the
//! attributes it observed after converging. Transport failures surface as
//! [`ConvergenceError::Transient`].

use async_trait::async_trait;
use warden_reconcile::{NodeAttributes, NodeSpec, NodeState};

use crate::error::ConvergenceError;

/// Client for the authoritative node inventory.
#[async_trait]
pub trait NodeRepository: Send + Sync {
    /// Fetch the node, or `None` if the inventory does not know it.
    async fn get_node(&self, hostname: &str) -> Result<Option<NodeSpec>, ConvergenceError>;

    /// Report observed attributes for the node.
    async fn update_node_attributes(
        &self,
        hostname: &str,
        attributes: &NodeAttributes,
    ) -> Result<(), ConvergenceError>;

    /// Move the node to a new allocation state.
    async fn set_node_state(&self, hostname: &str, state: NodeState)
        -> Result<(), ConvergenceError>;
}
