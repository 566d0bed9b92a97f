//! In-memory collaborators for testing and development.
//!
//! [`MockHost`] plays every external system at once: inventory, container
//! runtime, orchestrator, maintainers and health checker. It keeps just enough
//! state for passes to observe their own effects (a created container is
//! returned by the next `get_container`, reported attributes show up in the
//! next `get_node`) and records every call, in order, in a [`CallLog`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;
use warden_reconcile::{
    Container, ContainerResources, ContainerState, DockerImage, NodeAttributes, NodeSpec,
    NodeState, OrchestratorStatus,
};

use crate::client::NodeRepository;
use crate::context::NodeAgentContext;
use crate::engine::Collaborators;
use crate::error::{ConvergenceError, OrchestratorError};
use crate::maintainers::{AclMaintainer, CredentialsMaintainer, HealthChecker, StorageMaintainer};
use crate::orchestrator::Orchestrator;
use crate::runtime::{ContainerOperations, RegistryCredentials};

/// Calls that observe without changing anything.
const READ_ONLY_CALLS: &[&str] = &[
    "get_node",
    "get_container",
    "verify_health",
    "acl_converge",
    "storage_converge",
    "credentials_converge",
];

/// Ordered record of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, call: &str) {
        debug!(call, "[MOCK] Collaborator call");
        self.lock().push(call.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Calls that change state, leaving out reads and per-pass maintainers.
    pub fn mutating_calls(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|call| !READ_ONLY_CALLS.contains(&call.as_str()))
            .cloned()
            .collect()
    }

    pub fn count(&self, call: &str) -> usize {
        self.lock().iter().filter(|c| *c == call).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[derive(Default)]
struct MockState {
    node: Option<NodeSpec>,
    container: Option<Container>,
    next_container_id: u64,
    deny_suspend: Option<String>,
    pulls_in_progress: u32,
    unhealthy: bool,
    fail_core_dumps: bool,
    attribute_updates: Vec<NodeAttributes>,
}

/// Every external collaborator, simulated in memory.
pub struct MockHost {
    log: CallLog,
    state: Mutex<MockState>,
}

impl MockHost {
    /// Create a host whose inventory knows `node`.
    pub fn new(node: Option<NodeSpec>) -> Self {
        Self {
            log: CallLog::default(),
            state: Mutex::new(MockState {
                node,
                ..Default::default()
            }),
        }
    }

    pub fn with_container(self, container: Container) -> Self {
        self.lock().container = Some(container);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wire this host in as every collaborator of an engine.
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            node_repository: Arc::clone(self) as Arc<dyn NodeRepository>,
            containers: Arc::clone(self) as Arc<dyn ContainerOperations>,
            orchestrator: Arc::clone(self) as Arc<dyn Orchestrator>,
            health_checker: Arc::clone(self) as Arc<dyn HealthChecker>,
            acl_maintainer: Arc::clone(self) as Arc<dyn AclMaintainer>,
            storage_maintainer: Arc::clone(self) as Arc<dyn StorageMaintainer>,
            credentials_maintainer: Arc::clone(self) as Arc<dyn CredentialsMaintainer>,
        }
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    pub fn node(&self) -> Option<NodeSpec> {
        self.lock().node.clone()
    }

    pub fn set_node(&self, node: Option<NodeSpec>) {
        self.lock().node = node;
    }

    /// Change the inventory's copy of the node in place.
    pub fn update_node(&self, f: impl FnOnce(&mut NodeSpec)) {
        if let Some(node) = self.lock().node.as_mut() {
            f(node);
        }
    }

    pub fn container(&self) -> Option<Container> {
        self.lock().container.clone()
    }

    pub fn set_container(&self, container: Option<Container>) {
        self.lock().container = container;
    }

    /// Make every suspend fail with `reason` until [`MockHost::allow_suspend`].
    pub fn deny_suspend(&self, reason: &str) {
        self.lock().deny_suspend = Some(reason.to_string());
    }

    pub fn allow_suspend(&self) {
        self.lock().deny_suspend = None;
    }

    /// Report the next `count` image pulls as still in progress.
    pub fn set_pulls_in_progress(&self, count: u32) {
        self.lock().pulls_in_progress = count;
    }

    pub fn set_unhealthy(&self, unhealthy: bool) {
        self.lock().unhealthy = unhealthy;
    }

    pub fn fail_core_dumps(&self) {
        self.lock().fail_core_dumps = true;
    }

    /// Every attribute update received, in order.
    pub fn attribute_updates(&self) -> Vec<NodeAttributes> {
        self.lock().attribute_updates.clone()
    }
}

#[async_trait]
impl NodeRepository for MockHost {
    async fn get_node(&self, _hostname: &str) -> Result<Option<NodeSpec>, ConvergenceError> {
        self.log.record("get_node");
        Ok(self.lock().node.clone())
    }

    async fn update_node_attributes(
        &self,
        _hostname: &str,
        attributes: &NodeAttributes,
    ) -> Result<(), ConvergenceError> {
        self.log.record("update_node_attributes");
        let mut state = self.lock();
        if let Some(node) = state.node.as_mut() {
            if let Some(image) = &attributes.current_docker_image {
                node.current_docker_image = Some(image.clone());
            }
            if let Some(version) = &attributes.current_version {
                node.current_version = Some(version.clone());
            }
            if let Some(generation) = attributes.current_restart_generation {
                node.current_restart_generation = Some(generation);
            }
            if let Some(generation) = attributes.current_reboot_generation {
                node.current_reboot_generation = generation;
            }
        }
        state.attribute_updates.push(attributes.clone());
        Ok(())
    }

    async fn set_node_state(
        &self,
        _hostname: &str,
        node_state: NodeState,
    ) -> Result<(), ConvergenceError> {
        self.log.record("set_node_state");
        if let Some(node) = self.lock().node.as_mut() {
            node.state = node_state;
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerOperations for MockHost {
    async fn get_container(
        &self,
        _ctx: &NodeAgentContext,
    ) -> Result<Option<Container>, ConvergenceError> {
        self.log.record("get_container");
        Ok(self.lock().container.clone())
    }

    async fn pull_image_async_if_needed(
        &self,
        _ctx: &NodeAgentContext,
        _image: &DockerImage,
        _credentials: Option<&RegistryCredentials>,
    ) -> Result<bool, ConvergenceError> {
        self.log.record("pull_image");
        let mut state = self.lock();
        if state.pulls_in_progress > 0 {
            state.pulls_in_progress -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    async fn create_container(
        &self,
        ctx: &NodeAgentContext,
        resources: &ContainerResources,
    ) -> Result<(), ConvergenceError> {
        self.log.record("create_container");
        let mut state = self.lock();
        if state.container.is_some() {
            return Err(ConvergenceError::fatal("container already exists"));
        }

        state.next_container_id += 1;
        state.container = Some(Container {
            id: format!("container-{}", state.next_container_id),
            name: ctx.hostname().to_string(),
            created_at: ctx.now(),
            state: ContainerState::Created,
            image: ctx.node().wanted_docker_image.clone().unwrap_or_default(),
            resources: *resources,
            ports: vec![],
        });
        Ok(())
    }

    async fn start_container(&self, _ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        self.log.record("start_container");
        match self.lock().container.as_mut() {
            Some(container) => {
                container.state = ContainerState::Running;
                Ok(())
            }
            None => Err(ConvergenceError::fatal("no container to start")),
        }
    }

    async fn update_container(
        &self,
        _ctx: &NodeAgentContext,
        container_id: &str,
        resources: &ContainerResources,
    ) -> Result<(), ConvergenceError> {
        self.log.record("update_container");
        match self.lock().container.as_mut() {
            Some(container) if container.id == container_id => {
                container.resources = *resources;
                Ok(())
            }
            _ => Err(ConvergenceError::transient(format!(
                "no container with id {container_id}"
            ))),
        }
    }

    async fn remove_container(
        &self,
        _ctx: &NodeAgentContext,
        container: &Container,
    ) -> Result<(), ConvergenceError> {
        self.log.record("remove_container");
        let mut state = self.lock();
        if state.container.as_ref().map(|c| c.id.as_str()) == Some(container.id.as_str()) {
            state.container = None;
        }
        Ok(())
    }

    async fn stop_services(&self, _ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        self.log.record("stop_services");
        Ok(())
    }

    async fn start_services(&self, _ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        self.log.record("start_services");
        Ok(())
    }

    async fn restart_services(&self, _ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        self.log.record("restart_services");
        Ok(())
    }

    async fn suspend_node(&self, _ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        self.log.record("suspend_node");
        Ok(())
    }

    async fn resume_node(&self, _ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        self.log.record("resume_node");
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for MockHost {
    async fn suspend(&self, _hostname: &str) -> Result<(), OrchestratorError> {
        self.log.record("orchestrator_suspend");
        let mut state = self.lock();
        if let Some(reason) = &state.deny_suspend {
            return Err(OrchestratorError::Denied(reason.clone()));
        }
        if let Some(node) = state.node.as_mut() {
            node.orchestrator_status = OrchestratorStatus::AllowedToBeDown;
        }
        Ok(())
    }

    async fn resume(&self, _hostname: &str) -> Result<(), OrchestratorError> {
        self.log.record("orchestrator_resume");
        if let Some(node) = self.lock().node.as_mut() {
            node.orchestrator_status = OrchestratorStatus::NoRemarks;
        }
        Ok(())
    }
}

#[async_trait]
impl HealthChecker for MockHost {
    async fn verify_health(&self, _ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        self.log.record("verify_health");
        if self.lock().unhealthy {
            return Err(ConvergenceError::transient("node is not yet healthy"));
        }
        Ok(())
    }
}

#[async_trait]
impl AclMaintainer for MockHost {
    async fn converge(&self, _ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        self.log.record("acl_converge");
        Ok(())
    }
}

#[async_trait]
impl StorageMaintainer for MockHost {
    async fn converge(&self, _ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        self.log.record("storage_converge");
        Ok(())
    }

    async fn handle_core_dumps(
        &self,
        _ctx: &NodeAgentContext,
        _container: &Container,
    ) -> Result<(), ConvergenceError> {
        self.log.record("handle_core_dumps");
        if self.lock().fail_core_dumps {
            return Err(ConvergenceError::transient("core dump upload failed"));
        }
        Ok(())
    }

    async fn archive_node_storage(&self, _ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        self.log.record("archive_node_storage");
        Ok(())
    }
}

#[async_trait]
impl CredentialsMaintainer for MockHost {
    async fn converge(&self, _ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        self.log.record("credentials_converge");
        Ok(())
    }
}
