//! Convergence engine: one reconciliation pass per context.
//!
//! A pass resolves the node's desired state from the inventory, reads the
//! container from the runtime and performs the smallest set of transitions
//! that brings the two together:
//!
//! ```text
//! provisioned ──> ready
//! dirty / parked / failed (unowned) ──> stop ─> dump ─> remove ─> archive ─> ready
//! active / inactive / reserved ──> decide() ──> NoAction | Create | Recreate
//!                                               | UpdateResources | RestartServices
//!                                               | StartServices
//! ```
//!
//! Disruptive actions ask the orchestrator for permission first. Any change to
//! what runs on the node opens a warm-up window; the node is not handed back
//! to the orchestrator until it is healthy and the window has elapsed.
//!
//! ACLs are converged at the top of every pass that finds a container, ahead
//! of any suspend, so a denied suspend never leaves them stale. A freshly
//! started container gets its ACLs converged again once it runs, which makes
//! that twice in a recreate pass. A pass that finds no container converges
//! ACLs only after the new container starts, and not at all if the image is
//! still downloading.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn, Instrument};
use warden_reconcile::{
    decide, Container, ContainerResources, ConvergeAction, NodeAttributes, NodeState,
};

use crate::client::NodeRepository;
use crate::context::NodeAgentContext;
use crate::error::ConvergenceError;
use crate::maintainers::{AclMaintainer, CredentialsMaintainer, HealthChecker, StorageMaintainer};
use crate::orchestrator::Orchestrator;
use crate::runtime::ContainerOperations;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time a node must have been running after a change before it may be
    /// resumed in the orchestrator.
    pub warm_up_duration: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            warm_up_duration: Duration::from_secs(90),
        }
    }
}

/// External systems the engine drives.
#[derive(Clone)]
pub struct Collaborators {
    pub node_repository: Arc<dyn NodeRepository>,
    pub containers: Arc<dyn ContainerOperations>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub health_checker: Arc<dyn HealthChecker>,
    pub acl_maintainer: Arc<dyn AclMaintainer>,
    pub storage_maintainer: Arc<dyn StorageMaintainer>,
    pub credentials_maintainer: Arc<dyn CredentialsMaintainer>,
}

/// Converges one node's container to its desired state.
///
/// The engine keeps a little memory between passes (whether it owes the
/// orchestrator a resume, when the last change happened) but never caches
/// the node or the container.
pub struct ConvergenceEngine {
    collaborators: Collaborators,
    config: EngineConfig,

    /// Suspended or changed by this engine and not yet resumed.
    resume_pending: bool,

    /// When the running container last changed, for the warm-up rule.
    last_change_at: Option<DateTime<Utc>>,

    /// Services were stopped for a host suspension.
    services_stopped: bool,

    /// `resume_node` has run against the current container.
    node_resumed: bool,
}

impl ConvergenceEngine {
    pub fn new(collaborators: Collaborators, config: EngineConfig) -> Self {
        Self {
            collaborators,
            config,
            resume_pending: false,
            last_change_at: None,
            services_stopped: false,
            node_resumed: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// True if the engine owes the orchestrator a resume.
    pub fn is_resume_pending(&self) -> bool {
        self.resume_pending
    }

    /// Run one convergence pass for `ctx`.
    pub async fn converge(&mut self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        let span = tracing::info_span!("converge", hostname = %ctx.hostname());
        self.converge_node(ctx).instrument(span).await
    }

    async fn converge_node(&mut self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        let hostname = ctx.hostname();
        let Some(node) = self
            .collaborators
            .node_repository
            .get_node(hostname)
            .await?
        else {
            debug!("Node unknown to inventory, nothing to converge");
            return Ok(());
        };

        let ctx = ctx.with_node(node);
        let node = ctx.node();

        match node.state {
            NodeState::Provisioned => {
                info!("Marking provisioned node ready");
                self.collaborators
                    .node_repository
                    .set_node_state(hostname, NodeState::Ready)
                    .await
            }
            state if state.expects_container() => self.converge_container(&ctx).await,
            state if state.is_decommissioning() => {
                if state == NodeState::Dirty || !node.has_owner() {
                    return self.decommission(&ctx).await;
                }
                if let Some(container) = self.collaborators.containers.get_container(&ctx).await? {
                    self.stop_and_remove(&ctx, &container).await?;
                }
                Ok(())
            }
            _ => {
                debug!("Node is ready, no container expected");
                Ok(())
            }
        }
    }

    // =========================================================================
    // Decommission
    // =========================================================================

    /// Clean the node up and hand it back to the pool.
    async fn decommission(&mut self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        info!(state = %ctx.node().state, "Decommissioning node");

        if let Some(container) = self.collaborators.containers.get_container(ctx).await? {
            self.stop_and_remove(ctx, &container).await?;
        }

        self.collaborators
            .storage_maintainer
            .archive_node_storage(ctx)
            .await?;

        let repository = &self.collaborators.node_repository;
        repository
            .set_node_state(ctx.hostname(), NodeState::Ready)
            .await?;
        repository
            .update_node_attributes(ctx.hostname(), &NodeAttributes::cleared())
            .await?;

        info!("Node returned to ready");
        Ok(())
    }

    // =========================================================================
    // Container Reconciliation
    // =========================================================================

    async fn converge_container(&mut self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        let container = self.collaborators.containers.get_container(ctx).await?;

        // ACLs first, so a failing suspend never starves them.
        if container.is_some() {
            self.collaborators.acl_maintainer.converge(ctx).await?;
        }
        self.collaborators.credentials_maintainer.converge(ctx).await?;
        self.collaborators.storage_maintainer.converge(ctx).await?;

        let action = decide(
            ctx.node(),
            container.as_ref(),
            ctx.flags().cpu_multiplier,
            self.services_stopped,
        );

        if action.requires_suspend() && container.is_some() {
            self.suspend(ctx).await?;
        }

        match (&action, &container) {
            (ConvergeAction::NoAction, _) => return self.resume_if_suspended(ctx).await,
            (ConvergeAction::Create, _) => {
                info!("No container, starting one");
                self.start_container(ctx).await?;
            }
            (ConvergeAction::Recreate(reason), Some(container)) => {
                info!(reason = reason.as_str(), container_id = %container.id, "Recreating container");
                self.stop_and_remove(ctx, container).await?;
                self.start_container(ctx).await?;
            }
            (ConvergeAction::UpdateResources(target), Some(container)) => {
                info!(
                    container_id = %container.id,
                    from_cpus = container.resources.cpus,
                    to_cpus = target.cpus,
                    "Updating container CPU in place"
                );
                self.collaborators
                    .containers
                    .update_container(ctx, &container.id, target)
                    .await?;
            }
            (ConvergeAction::RestartServices, Some(_)) => {
                info!(
                    wanted = ?ctx.node().wanted_restart_generation,
                    current = ?ctx.node().current_restart_generation,
                    "Restarting services"
                );
                self.collaborators.containers.restart_services(ctx).await?;
            }
            (ConvergeAction::StartServices, Some(_)) => {
                info!("Starting services stopped for host suspension");
                self.collaborators.containers.start_services(ctx).await?;
                self.services_stopped = false;
            }
            (other, None) => {
                return Err(ConvergenceError::fatal(format!(
                    "decided {other:?} without a container"
                )));
            }
        }

        if action.is_change() {
            self.record_change(ctx);
        }
        self.verify_and_resume(ctx).await
    }

    /// Pull, create and start a container and converge its ACLs.
    async fn start_container(&mut self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        let node = ctx.node();
        let image = node
            .wanted_docker_image
            .clone()
            .filter(|image| !image.is_empty())
            .ok_or_else(|| ConvergenceError::fatal("node has no wanted docker image"))?;

        let containers = &self.collaborators.containers;
        let credentials = self
            .collaborators
            .credentials_maintainer
            .registry_credentials(ctx, &image)
            .await;
        if containers
            .pull_image_async_if_needed(ctx, &image, credentials.as_ref())
            .await?
        {
            return Err(ConvergenceError::transient(format!(
                "waiting for image {image} to download"
            )));
        }

        let resources = ContainerResources::from_node(&node.resources, ctx.flags().cpu_multiplier);
        containers.create_container(ctx, &resources).await?;
        containers.start_container(ctx).await?;
        info!(image = %image, cpus = resources.cpus, "Container started");

        self.services_stopped = false;
        self.node_resumed = false;

        self.collaborators.acl_maintainer.converge(ctx).await
    }

    /// Stop services, collect core dumps and remove the container.
    async fn stop_and_remove(
        &mut self,
        ctx: &NodeAgentContext,
        container: &Container,
    ) -> Result<(), ConvergenceError> {
        let containers = &self.collaborators.containers;

        if container.is_running() {
            containers.stop_services(ctx).await?;
            if let Err(e) = self
                .collaborators
                .storage_maintainer
                .handle_core_dumps(ctx, container)
                .await
            {
                warn!(error = %e, "Failed to collect core dumps, continuing");
            }
        }

        containers.remove_container(ctx, container).await?;
        info!(container_id = %container.id, "Container removed");

        self.node_resumed = false;
        self.services_stopped = false;
        Ok(())
    }

    async fn suspend(&mut self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        self.collaborators.orchestrator.suspend(ctx.hostname()).await?;
        self.resume_pending = true;
        debug!("Suspended in orchestrator");
        Ok(())
    }

    fn record_change(&mut self, ctx: &NodeAgentContext) {
        self.last_change_at = Some(ctx.now());
        self.resume_pending = true;
    }

    // =========================================================================
    // Resume
    // =========================================================================

    async fn resume_if_suspended(&mut self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        if self.resume_pending || ctx.node().orchestrator_status.is_suspended() {
            return self.verify_and_resume(ctx).await;
        }

        self.report_attributes(ctx).await?;
        debug!("Node converged");
        Ok(())
    }

    /// Resume the workload, verify health, report attributes and resume in
    /// the orchestrator once the warm-up window has elapsed.
    async fn verify_and_resume(&mut self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        if !self.node_resumed {
            self.collaborators.containers.resume_node(ctx).await?;
            self.node_resumed = true;
        }

        self.collaborators.health_checker.verify_health(ctx).await?;
        self.report_attributes(ctx).await?;
        self.check_warm_up(ctx)?;

        self.collaborators.orchestrator.resume(ctx.hostname()).await?;
        self.resume_pending = false;
        self.last_change_at = None;
        info!("Resumed in orchestrator");
        Ok(())
    }

    async fn report_attributes(&self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        let attributes = NodeAttributes::after_start(ctx.node());
        if attributes.is_empty() {
            return Ok(());
        }

        debug!(?attributes, "Reporting node attributes");
        self.collaborators
            .node_repository
            .update_node_attributes(ctx.hostname(), &attributes)
            .await
    }

    fn check_warm_up(&self, ctx: &NodeAgentContext) -> Result<(), ConvergenceError> {
        let Some(changed_at) = self.last_change_at else {
            return Ok(());
        };

        let elapsed = (ctx.now() - changed_at).to_std().unwrap_or_default();
        if elapsed >= self.config.warm_up_duration {
            return Ok(());
        }

        let remaining = self.config.warm_up_duration - elapsed;
        Err(ConvergenceError::fatal(format!(
            "refusing to resume {}: {:.1}s of warm-up remaining",
            ctx.hostname(),
            remaining.as_secs_f64()
        )))
    }

    // =========================================================================
    // Host Suspension
    // =========================================================================

    /// Take the workload down for a host-level suspension.
    ///
    /// The caller must already hold the orchestrator's permission. The next
    /// pass after the host comes back starts the services again.
    pub async fn stop_for_host_suspension(
        &mut self,
        ctx: &NodeAgentContext,
    ) -> Result<(), ConvergenceError> {
        let containers = &self.collaborators.containers;
        let Some(container) = containers.get_container(ctx).await? else {
            return Ok(());
        };
        if !container.is_running() {
            return Ok(());
        }

        info!(hostname = %ctx.hostname(), "Stopping services for host suspension");
        containers.suspend_node(ctx).await?;
        self.node_resumed = false;
        containers.stop_services(ctx).await?;
        self.services_stopped = true;
        self.resume_pending = true;
        Ok(())
    }
}
