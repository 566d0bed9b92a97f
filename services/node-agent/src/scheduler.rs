//! Periodic tick scheduler.
//!
//! The scheduler:
//! - Periodically fetches the node from the inventory
//! - Builds a fresh context from it
//! - Hands the context to the agent through the coordinator

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::NodeRepository;
use crate::context::{Clock, FeatureFlags, NodeAgentContext};
use crate::coordinator::ContextTickCoordinator;
use crate::error::ConvergenceError;

/// Floor for the tick interval; a zero period would panic in `interval`.
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Tick scheduler configuration.
#[derive(Debug, Clone)]
pub struct TickSchedulerConfig {
    /// Interval between ticks.
    pub tick_interval: Duration,
}

impl Default for TickSchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
        }
    }
}

/// Produces one tick per interval for a single node.
pub struct TickScheduler {
    hostname: String,
    path_to_node_root: PathBuf,
    node_repository: Arc<dyn NodeRepository>,
    coordinator: Arc<ContextTickCoordinator>,
    flags: FeatureFlags,
    clock: Arc<dyn Clock>,
    config: TickSchedulerConfig,
}

impl TickScheduler {
    pub fn new(
        hostname: impl Into<String>,
        path_to_node_root: impl Into<PathBuf>,
        node_repository: Arc<dyn NodeRepository>,
        coordinator: Arc<ContextTickCoordinator>,
        flags: FeatureFlags,
        clock: Arc<dyn Clock>,
        config: TickSchedulerConfig,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            path_to_node_root: path_to_node_root.into(),
            node_repository,
            coordinator,
            flags,
            clock,
            config,
        }
    }

    /// Run the scheduling loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            hostname = %self.hostname,
            tick_interval_secs = self.config.tick_interval.as_secs(),
            "Starting tick scheduler"
        );

        let period = self.config.tick_interval.max(MIN_TICK_INTERVAL);
        let mut interval = tokio::time::interval(period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(hostname = %self.hostname, error = %e, "Failed to schedule tick");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(hostname = %self.hostname, "Tick scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Fetch the node and schedule a tick for it now.
    ///
    /// Returns false if the inventory does not know the node.
    pub async fn tick(&self) -> Result<bool, ConvergenceError> {
        let Some(node) = self.node_repository.get_node(&self.hostname).await? else {
            debug!(hostname = %self.hostname, "Node not in inventory, skipping tick");
            return Ok(false);
        };

        let ctx = NodeAgentContext::new(
            node,
            self.path_to_node_root.clone(),
            self.flags,
            Arc::clone(&self.clock),
        );
        self.coordinator.schedule_tick(Arc::new(ctx), Instant::now());
        Ok(true)
    }
}
