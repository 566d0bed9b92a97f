//! Observed container state.
//!
//! A [`Container`] is re-read from the container runtime at the start of every
//! convergence pass and never cached across passes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::{DockerImage, NodeResources};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// CPU allocations closer than this are considered equal.
const CPU_EPSILON: f64 = 1e-6;

/// Runtime state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Created,
    Running,
    Exited,
}

/// Resources the container runtime enforces for a container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContainerResources {
    pub cpus: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
}

impl ContainerResources {
    /// Resources a container for `resources` should get, with the CPU
    /// allocation scaled by `cpu_multiplier`.
    pub fn from_node(resources: &NodeResources, cpu_multiplier: f64) -> Self {
        Self {
            cpus: resources.vcpu * cpu_multiplier,
            memory_bytes: gb_to_bytes(resources.memory_gb),
            disk_bytes: gb_to_bytes(resources.disk_gb),
        }
    }

    pub fn differs_in_cpu(&self, other: &Self) -> bool {
        (self.cpus - other.cpus).abs() > CPU_EPSILON
    }

    pub fn differs_in_memory_or_disk(&self, other: &Self) -> bool {
        self.memory_bytes != other.memory_bytes || self.disk_bytes != other.disk_bytes
    }
}

fn gb_to_bytes(gb: f64) -> u64 {
    (gb * BYTES_PER_GB).round() as u64
}

/// A published port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: String,
}

/// Container observed on the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub state: ContainerState,
    pub image: DockerImage,
    pub resources: ContainerResources,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
}

impl Container {
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }
}
