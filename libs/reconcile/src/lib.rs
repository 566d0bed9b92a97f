//! Node convergence primitives.
//!
//! This library holds the I/O-free half of the node agent: the snapshots it
//! converges between and the decision table that picks what to do.
//!
//! - **Desired state**: [`NodeSpec`], published by the node inventory.
//! - **Observed state**: [`Container`], read from the container runtime.
//! - **Decision**: [`decide`] maps a pair of snapshots to one [`ConvergeAction`].
//!
//! # Invariants
//!
//! - Snapshots are immutable once built
//! - Decisions are deterministic given the same inputs
//! - A converged pair always decides [`ConvergeAction::NoAction`]

mod backoff;
mod container;
mod decision;
mod node;

pub use backoff::BackoffPolicy;
pub use container::{Container, ContainerResources, ContainerState, PortMapping};
pub use decision::{decide, ConvergeAction, RecreateReason};
pub use node::{
    DiskSpeed, DockerImage, NodeAttributes, NodeResources, NodeSpec, NodeState,
    OrchestratorStatus, ParseError, StorageType, Version,
};
