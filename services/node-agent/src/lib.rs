//! Warden Node Agent Library
//!
//! The node agent runs on each host and keeps the node's container in sync
//! with the desired state published by the node inventory. It pulls images,
//! creates and removes containers, asks the orchestrator for permission before
//! disruptive changes and hands the node back once it is healthy.
//!
//! ## Architecture
//!
//! ```text
//! TickScheduler ──schedule_tick──> ContextTickCoordinator ──next_context──> AgentLoop
//!                                        ^                                     │
//!                         set_frozen ────┘                                     v
//!                                                                      ConvergenceEngine
//!                                                                              │
//!               NodeRepository, ContainerOperations, Orchestrator, ... <───────┘
//! ```
//!
//! - **Coordinator**: single-slot mailbox with deadlines and a freeze protocol
//! - **Engine**: one reconciliation pass per context
//! - **Agent loop**: drives the engine, retries failed passes with backoff
//! - **Scheduler**: produces a fresh context every interval
//!
//! ## Modules
//!
//! - `client`, `runtime`, `orchestrator`, `maintainers`: collaborator interfaces
//! - `mock`: in-memory collaborators for tests and development

pub mod agent;
pub mod client;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod maintainers;
pub mod mock;
pub mod orchestrator;
pub mod runtime;
pub mod scheduler;

// Re-export commonly used types
pub use agent::{AgentLoop, NodeAgent};
pub use context::{Clock, FeatureFlags, ManualClock, NodeAgentContext, SystemClock};
pub use coordinator::ContextTickCoordinator;
pub use engine::{Collaborators, ConvergenceEngine, EngineConfig};
pub use error::{ConvergenceError, CoordinatorError, ErrorKind, OrchestratorError};
pub use mock::MockHost;
