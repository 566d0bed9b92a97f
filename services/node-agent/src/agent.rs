//! The agent loop: drives the engine with contexts from the coordinator.
//!
//! The loop:
//! - Waits for the next context from the [`ContextTickCoordinator`]
//! - Runs one convergence pass with it
//! - On failure, logs and offers the same context again after a backoff
//!   unless the scheduler has already sent a newer one
//!
//! It exits when the coordinator is interrupted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};
use warden_reconcile::BackoffPolicy;

use crate::context::NodeAgentContext;
use crate::coordinator::ContextTickCoordinator;
use crate::engine::ConvergenceEngine;
use crate::error::{ConvergenceError, CoordinatorError};

/// Consecutive failures logged as warnings before escalating to errors.
const WARN_FAILURE_LIMIT: u32 = 3;

/// Consumes contexts and converges until interrupted.
pub struct AgentLoop {
    coordinator: Arc<ContextTickCoordinator>,
    engine: Arc<Mutex<ConvergenceEngine>>,
    backoff: BackoffPolicy,
    consecutive_failures: u32,
}

impl AgentLoop {
    pub fn new(
        coordinator: Arc<ContextTickCoordinator>,
        engine: Arc<Mutex<ConvergenceEngine>>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            coordinator,
            engine,
            backoff,
            consecutive_failures: 0,
        }
    }

    /// Run until the coordinator is interrupted.
    pub async fn run(mut self) {
        info!("Starting agent loop");

        loop {
            let ctx = match self.coordinator.next_context().await {
                Ok(ctx) => ctx,
                Err(CoordinatorError::Interrupted) => {
                    info!("Agent loop interrupted, shutting down");
                    break;
                }
            };

            let pass = tokio::spawn({
                let engine = Arc::clone(&self.engine);
                let ctx = Arc::clone(&ctx);
                async move { engine.lock().await.converge(&ctx).await }
            });

            match pass.await {
                Ok(Ok(())) => {
                    if self.consecutive_failures > 0 {
                        info!(
                            hostname = %ctx.hostname(),
                            consecutive_failures = self.consecutive_failures,
                            "Convergence recovered"
                        );
                    }
                    self.consecutive_failures = 0;
                }
                Ok(Err(e)) => self.on_failure(&ctx, &e),
                Err(e) => {
                    error!(hostname = %ctx.hostname(), error = %e, "Convergence pass panicked");
                    self.on_failure(&ctx, &ConvergenceError::fatal(e.to_string()));
                }
            }
        }
    }

    fn on_failure(&mut self, ctx: &Arc<NodeAgentContext>, e: &ConvergenceError) {
        self.consecutive_failures += 1;
        let consecutive_failures = self.consecutive_failures;

        if e.is_transient() && consecutive_failures <= WARN_FAILURE_LIMIT {
            warn!(
                hostname = %ctx.hostname(),
                kind = %e.kind(),
                error = %e.message(),
                consecutive_failures,
                "Convergence failed, will retry"
            );
        } else {
            error!(
                hostname = %ctx.hostname(),
                kind = %e.kind(),
                error = %e.message(),
                consecutive_failures,
                "Convergence failed"
            );
        }

        let delay = self.backoff.delay(consecutive_failures - 1);
        if !self
            .coordinator
            .schedule_retry(Arc::clone(ctx), Instant::now() + delay)
        {
            info!(hostname = %ctx.hostname(), "Newer tick pending, skipping retry");
        }
    }
}

/// Handle to one node's agent: its coordinator and its engine.
pub struct NodeAgent {
    coordinator: Arc<ContextTickCoordinator>,
    engine: Arc<Mutex<ConvergenceEngine>>,
    backoff: BackoffPolicy,
}

impl NodeAgent {
    pub fn new(engine: ConvergenceEngine, backoff: BackoffPolicy) -> Self {
        Self {
            coordinator: Arc::new(ContextTickCoordinator::new()),
            engine: Arc::new(Mutex::new(engine)),
            backoff,
        }
    }

    pub fn coordinator(&self) -> Arc<ContextTickCoordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Start the agent loop on a new task.
    pub fn spawn(&self) -> JoinHandle<()> {
        let agent_loop = AgentLoop::new(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.engine),
            self.backoff.clone(),
        );
        tokio::spawn(agent_loop.run())
    }

    /// Pause the agent between passes. Returns true if frozen in time.
    pub async fn freeze(&self, timeout: Duration) -> bool {
        self.coordinator.set_frozen(true, timeout).await
    }

    pub async fn unfreeze(&self) -> bool {
        self.coordinator.set_frozen(false, Duration::ZERO).await
    }

    /// Stop the node's services ahead of a host suspension.
    ///
    /// The agent must be frozen so no pass runs concurrently.
    pub async fn stop_for_host_suspension(
        &self,
        ctx: &NodeAgentContext,
    ) -> Result<(), ConvergenceError> {
        if !self.coordinator.is_frozen() {
            return Err(ConvergenceError::fatal(
                "agent must be frozen before stopping for host suspension",
            ));
        }
        self.engine.lock().await.stop_for_host_suspension(ctx).await
    }

    /// Interrupt the agent loop.
    pub fn shutdown(&self) {
        info!("Shutting down node agent");
        self.coordinator.interrupt();
    }
}
