//! Desired node state as published by the node inventory.
//!
//! A [`NodeSpec`] carries both the wanted and the last reported ("current")
//! values of the attributes the agent converges. It is an immutable snapshot:
//! the agent never mutates it, it only reports new current values back through
//! [`NodeAttributes`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors parsing inventory values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown node state: {0}")]
    UnknownNodeState(String),
}

/// Allocation state of a node in the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Provisioned,
    Ready,
    Reserved,
    Active,
    Inactive,
    Dirty,
    Failed,
    Parked,
}

impl NodeState {
    /// States in which the node is expected to run its workload container.
    pub fn expects_container(&self) -> bool {
        matches!(self, Self::Active | Self::Inactive | Self::Reserved)
    }

    /// States from which the node is being decommissioned back to the pool.
    pub fn is_decommissioning(&self) -> bool {
        matches!(self, Self::Dirty | Self::Parked | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioned => "provisioned",
            Self::Ready => "ready",
            Self::Reserved => "reserved",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Dirty => "dirty",
            Self::Failed => "failed",
            Self::Parked => "parked",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioned" => Ok(Self::Provisioned),
            "ready" => Ok(Self::Ready),
            "reserved" => Ok(Self::Reserved),
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "dirty" => Ok(Self::Dirty),
            "failed" => Ok(Self::Failed),
            "parked" => Ok(Self::Parked),
            other => Err(ParseError::UnknownNodeState(other.to_string())),
        }
    }
}

/// A container image reference. The empty reference means "no image".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DockerImage(String);

impl DockerImage {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DockerImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Version of the software running in the container. Empty means unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Disk speed requirement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskSpeed {
    Fast,
    Slow,
    #[default]
    Any,
}

/// Where the node's storage lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    Local,
    Remote,
    #[default]
    Any,
}

/// Resources allocated to the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeResources {
    pub vcpu: f64,
    pub memory_gb: f64,
    pub disk_gb: f64,
    #[serde(default)]
    pub disk_speed: DiskSpeed,
    #[serde(default)]
    pub storage_type: StorageType,
}

/// Node status as seen by the cluster orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorStatus {
    #[default]
    NoRemarks,
    AllowedToBeDown,
    PermanentlyDown,
}

impl OrchestratorStatus {
    /// True if the orchestrator still considers the node suspended.
    pub fn is_suspended(&self) -> bool {
        !matches!(self, Self::NoRemarks)
    }
}

/// Desired and last reported configuration of a managed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub hostname: String,
    pub state: NodeState,
    pub wanted_docker_image: Option<DockerImage>,
    pub current_docker_image: Option<DockerImage>,
    pub wanted_version: Option<Version>,
    pub current_version: Option<Version>,
    #[serde(default)]
    pub wanted_restart_generation: Option<u64>,
    #[serde(default)]
    pub current_restart_generation: Option<u64>,
    #[serde(default)]
    pub wanted_reboot_generation: u64,
    #[serde(default)]
    pub current_reboot_generation: u64,
    pub resources: NodeResources,
    #[serde(default)]
    pub orchestrator_status: OrchestratorStatus,
    /// Application owning the node, if allocated.
    #[serde(default)]
    pub owner: Option<String>,
    /// Opaque keyed reports filed by other node-level agents.
    #[serde(default)]
    pub reports: BTreeMap<String, serde_json::Value>,
}

impl NodeSpec {
    pub fn has_owner(&self) -> bool {
        self.owner.is_some()
    }

    /// True if a reboot has been requested and not yet performed.
    pub fn wants_reboot(&self) -> bool {
        self.wanted_reboot_generation > self.current_reboot_generation
    }

    /// True if a service restart has been requested and not yet performed.
    pub fn wants_restart(&self) -> bool {
        match (self.wanted_restart_generation, self.current_restart_generation) {
            (Some(wanted), Some(current)) => wanted > current,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

/// Sparse update of the node's reported attributes.
///
/// Only fields that are `Some` are sent to the inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_docker_image: Option<DockerImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_version: Option<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_restart_generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_reboot_generation: Option<u64>,
}

impl NodeAttributes {
    /// Attributes reported when a node is handed back to the pool.
    pub fn cleared() -> Self {
        Self {
            current_docker_image: Some(DockerImage::empty()),
            current_version: Some(Version::empty()),
            ..Default::default()
        }
    }

    /// Attributes describing a freshly started container, minus anything the
    /// inventory already reports.
    pub fn after_start(node: &NodeSpec) -> Self {
        let mut attributes = Self::default();

        if let Some(wanted) = &node.wanted_docker_image {
            if node.current_docker_image.as_ref() != Some(wanted) {
                attributes.current_docker_image = Some(wanted.clone());
            }
        }
        if let Some(wanted) = &node.wanted_version {
            if node.current_version.as_ref() != Some(wanted) {
                attributes.current_version = Some(wanted.clone());
            }
        }
        if let Some(wanted) = node.wanted_restart_generation {
            if node.current_restart_generation != Some(wanted) {
                attributes.current_restart_generation = Some(wanted);
            }
        }
        if node.wanted_reboot_generation != node.current_reboot_generation {
            attributes.current_reboot_generation = Some(node.wanted_reboot_generation);
        }

        attributes
    }

    pub fn is_empty(&self) -> bool {
        self.current_docker_image.is_none()
            && self.current_version.is_none()
            && self.current_restart_generation.is_none()
            && self.current_reboot_generation.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeSpec {
        NodeSpec {
            hostname: "host1.example.com".to_string(),
            state: NodeState::Active,
            wanted_docker_image: Some(DockerImage::new("registry/app:2")),
            current_docker_image: Some(DockerImage::new("registry/app:1")),
            wanted_version: Some(Version::new("8.2.0")),
            current_version: Some(Version::new("8.2.0")),
            wanted_restart_generation: Some(3),
            current_restart_generation: Some(3),
            wanted_reboot_generation: 2,
            current_reboot_generation: 1,
            resources: NodeResources {
                vcpu: 2.0,
                memory_gb: 8.0,
                disk_gb: 50.0,
                disk_speed: DiskSpeed::Fast,
                storage_type: StorageType::Local,
            },
            orchestrator_status: OrchestratorStatus::NoRemarks,
            owner: Some("tenant:app:default".to_string()),
            reports: BTreeMap::new(),
        }
    }

    const ALL_STATES: [NodeState; 8] = [
        NodeState::Provisioned,
        NodeState::Ready,
        NodeState::Reserved,
        NodeState::Active,
        NodeState::Inactive,
        NodeState::Dirty,
        NodeState::Failed,
        NodeState::Parked,
    ];

    #[test]
    fn test_node_state_round_trips_through_str() {
        for state in ALL_STATES {
            assert_eq!(state.as_str().parse::<NodeState>().unwrap(), state);
        }
        assert_eq!(
            "deprovisioned".parse::<NodeState>(),
            Err(ParseError::UnknownNodeState("deprovisioned".to_string()))
        );
    }

    #[test]
    fn test_node_state_classes() {
        let expecting: Vec<_> = ALL_STATES.iter().filter(|s| s.expects_container()).collect();
        assert_eq!(
            expecting,
            [&NodeState::Reserved, &NodeState::Active, &NodeState::Inactive]
        );

        let decommissioning: Vec<_> = ALL_STATES.iter().filter(|s| s.is_decommissioning()).collect();
        assert_eq!(
            decommissioning,
            [&NodeState::Dirty, &NodeState::Failed, &NodeState::Parked]
        );
    }

    #[test]
    fn test_after_start_only_reports_differences() {
        let attributes = NodeAttributes::after_start(&node());
        assert_eq!(
            attributes.current_docker_image,
            Some(DockerImage::new("registry/app:2"))
        );
        assert_eq!(attributes.current_version, None);
        assert_eq!(attributes.current_restart_generation, None);
        assert_eq!(attributes.current_reboot_generation, Some(2));
    }

    #[test]
    fn test_after_start_is_empty_when_converged() {
        let mut node = node();
        node.current_docker_image = node.wanted_docker_image.clone();
        node.current_reboot_generation = node.wanted_reboot_generation;
        assert!(NodeAttributes::after_start(&node).is_empty());
    }

    #[test]
    fn test_cleared_attributes_serialize_sparsely() {
        let json = serde_json::to_value(NodeAttributes::cleared()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"current_docker_image": "", "current_version": ""})
        );
    }

    #[test]
    fn test_wants_restart() {
        let mut node = node();
        assert!(!node.wants_restart());
        node.wanted_restart_generation = Some(4);
        assert!(node.wants_restart());
        node.current_restart_generation = None;
        assert!(node.wants_restart());
        node.wanted_restart_generation = None;
        assert!(!node.wants_restart());
    }

    #[test]
    fn test_orchestrator_status_suspended() {
        assert!(!OrchestratorStatus::NoRemarks.is_suspended());
        assert!(OrchestratorStatus::AllowedToBeDown.is_suspended());
    }
}
