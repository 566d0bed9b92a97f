//! The reconciliation decision table.
//!
//! Given immutable snapshots of the desired node and the observed container,
//! [`decide`] picks the single action a convergence pass should take. Guards
//! are evaluated in priority order and the first match wins.

use crate::container::{Container, ContainerResources};
use crate::node::NodeSpec;

/// Why an existing container must be replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateReason {
    ImageChanged,
    RebootRequested,
    NotRunning,
    MemoryOrDiskChanged,
}

impl RecreateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImageChanged => "image changed",
            Self::RebootRequested => "reboot requested",
            Self::NotRunning => "container not running",
            Self::MemoryOrDiskChanged => "memory or disk changed",
        }
    }
}

/// Action for one convergence pass over a node that expects a container.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvergeAction {
    /// Container matches and nothing is pending.
    NoAction,
    /// No container exists; pull, create and start one.
    Create,
    /// Suspend, stop and remove the container, then create a new one.
    Recreate(RecreateReason),
    /// Only the CPU allocation differs; update it in place.
    UpdateResources(ContainerResources),
    /// A restart generation bump is pending.
    RestartServices,
    /// Services were stopped for a host suspension and must be started again.
    StartServices,
}

impl ConvergeAction {
    /// True if the action changes what runs on the node, which starts a new
    /// warm-up window before the node may be resumed.
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::Recreate(_) | Self::UpdateResources(_) | Self::RestartServices
        )
    }

    /// True if the action needs permission from the orchestrator first.
    pub fn requires_suspend(&self) -> bool {
        matches!(self, Self::Recreate(_) | Self::RestartServices)
    }
}

/// Decide what to do about `container` so that it matches `node`.
///
/// `services_stopped` is true if the agent stopped services for a host
/// suspension and has not started them again.
pub fn decide(
    node: &NodeSpec,
    container: Option<&Container>,
    cpu_multiplier: f64,
    services_stopped: bool,
) -> ConvergeAction {
    let Some(container) = container else {
        return ConvergeAction::Create;
    };

    if let Some(wanted) = &node.wanted_docker_image {
        if *wanted != container.image {
            return ConvergeAction::Recreate(RecreateReason::ImageChanged);
        }
    }

    if node.wants_reboot() {
        return ConvergeAction::Recreate(RecreateReason::RebootRequested);
    }

    if !container.is_running() {
        return ConvergeAction::Recreate(RecreateReason::NotRunning);
    }

    let wanted = ContainerResources::from_node(&node.resources, cpu_multiplier);
    if wanted.differs_in_memory_or_disk(&container.resources) {
        return ConvergeAction::Recreate(RecreateReason::MemoryOrDiskChanged);
    }
    if wanted.differs_in_cpu(&container.resources) {
        return ConvergeAction::UpdateResources(wanted);
    }

    if node.wants_restart() {
        return ConvergeAction::RestartServices;
    }

    if services_stopped {
        return ConvergeAction::StartServices;
    }

    ConvergeAction::NoAction
}
