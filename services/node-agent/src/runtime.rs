//! Container runtime interface.
//!
//! The runtime driver abstracts container lifecycle operations:
//! - Pulling images and creating/starting/removing containers
//! - Updating resource limits of a running container
//! - Stopping, starting and restarting the services inside the container
//!
//! Every operation is opaque to the agent and scoped to the node in the
//! given context.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use warden_reconcile::{Container, ContainerResources, DockerImage};

use crate::context::NodeAgentContext;
use crate::error::ConvergenceError;

/// Credentials for pulling from a private registry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub registry: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("registry", &self.registry)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Container runtime driver.
#[async_trait]
pub trait ContainerOperations: Send + Sync {
    /// Read the node's container, if one exists.
    async fn get_container(
        &self,
        ctx: &NodeAgentContext,
    ) -> Result<Option<Container>, ConvergenceError>;

    /// Start pulling `image` unless it is already present.
    ///
    /// Returns true while the pull is still in progress.
    async fn pull_image_async_if_needed(
        &self,
        ctx: &NodeAgentContext,
        image: &DockerImage,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<bool, ConvergenceError>;

    /// Create the node's container from its wanted image.
    async fn create_container(
        &self,
        ctx: &NodeAgentContext,
        resources: &ContainerResources,
    ) -> Result<(), ConvergenceError>;

    async fn start_container(&self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError>;

    /// Change the resource limits of a container in place.
    async fn update_container(
        &self,
        ctx: &NodeAgentContext,
        container_id: &str,
        resources: &ContainerResources,
    ) -> Result<(), ConvergenceError>;

    async fn remove_container(
        &self,
        ctx: &NodeAgentContext,
        container: &Container,
    ) -> Result<(), ConvergenceError>;

    async fn stop_services(&self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError>;

    async fn start_services(&self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError>;

    async fn restart_services(&self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError>;

    /// Tell the workload inside the container it is about to go down.
    async fn suspend_node(&self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError>;

    /// Tell the workload inside the container it may serve again.
    async fn resume_node(&self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError>;
}
