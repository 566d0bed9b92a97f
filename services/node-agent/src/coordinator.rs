//! Single-slot handoff of contexts from schedulers to the agent.
//!
//! The coordinator holds at most one pending tick. Schedulers replace it with
//! [`ContextTickCoordinator::schedule_tick`] (last write wins, nothing is
//! queued), and the agent takes it with [`ContextTickCoordinator::next_context`]
//! once its `not_before` deadline has passed.
//!
//! It also implements the freeze protocol. A freeze is only honored while the
//! agent is idle inside `next_context`, never in the middle of a pass:
//!
//! ```text
//!   set_frozen(true) ──> want_frozen ──(agent idle)──> frozen
//!   set_frozen(false) ─> !want_frozen, !frozen, agent woken
//! ```
//!
//! All mutable fields live in one record behind one mutex. Wakeups go through
//! two [`Notify`]s: one for the consumer, one for callers waiting on a freeze.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::context::NodeAgentContext;
use crate::error::CoordinatorError;

struct PendingTick {
    context: Arc<NodeAgentContext>,
    not_before: Instant,
}

#[derive(Default)]
struct State {
    current: Option<Arc<NodeAgentContext>>,
    pending: Option<PendingTick>,
    want_frozen: bool,
    frozen: bool,
    /// The consumer is parked in `next_context`, between passes.
    consumer_waiting: bool,
    interrupted: bool,
}

/// Thread-safe mailbox between the tick schedulers and the agent.
#[derive(Default)]
pub struct ContextTickCoordinator {
    state: Mutex<State>,
    consumer_wakeup: Notify,
    idle_changed: Notify,
}

impl ContextTickCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Offer `context` to the agent no earlier than `not_before`.
    ///
    /// Replaces any tick that has not been consumed yet.
    pub fn schedule_tick(&self, context: Arc<NodeAgentContext>, not_before: Instant) {
        {
            let mut state = self.lock();
            if state.pending.is_some() {
                debug!(hostname = %context.hostname(), "Replacing pending tick");
            }
            state.pending = Some(PendingTick {
                context,
                not_before,
            });
        }
        self.consumer_wakeup.notify_one();
    }

    /// Offer `context` again after a failed pass, unless a newer tick is
    /// already pending.
    ///
    /// Returns true if the retry was scheduled.
    pub fn schedule_retry(&self, context: Arc<NodeAgentContext>, not_before: Instant) -> bool {
        {
            let mut state = self.lock();
            if state.pending.is_some() {
                return false;
            }
            state.pending = Some(PendingTick {
                context,
                not_before,
            });
        }
        self.consumer_wakeup.notify_one();
        true
    }

    /// Wait for the next context. Only one task may call this.
    ///
    /// Blocks while frozen, then until a pending tick exists whose deadline
    /// has passed. The tick is promoted to current and returned.
    pub async fn next_context(&self) -> Result<Arc<NodeAgentContext>, CoordinatorError> {
        loop {
            let notified = self.consumer_wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.lock();
                state.consumer_waiting = true;

                if state.interrupted {
                    state.interrupted = false;
                    state.consumer_waiting = false;
                    return Err(CoordinatorError::Interrupted);
                }

                if state.frozen != state.want_frozen {
                    state.frozen = state.want_frozen;
                    info!(frozen = state.frozen, "Agent freeze state changed");
                    self.idle_changed.notify_waiters();
                }

                if state.frozen {
                    None
                } else {
                    match state.pending.as_ref().map(|tick| tick.not_before) {
                        Some(not_before) if Instant::now() >= not_before => {
                            if let Some(tick) = state.pending.take() {
                                state.current = Some(Arc::clone(&tick.context));
                                state.consumer_waiting = false;
                                return Ok(tick.context);
                            }
                            None
                        }
                        other => other,
                    }
                }
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Freeze or unfreeze the agent.
    ///
    /// Freezing waits until the agent is idle between passes, or until
    /// `timeout` elapses, and returns whether the agent is frozen. A request
    /// that times out stays in force: the agent freezes at its next idle
    /// point, but that does not change this call's result. Unfreezing takes
    /// effect immediately and always returns true.
    pub async fn set_frozen(&self, freeze: bool, timeout: Duration) -> bool {
        {
            let mut state = self.lock();
            state.want_frozen = freeze;

            if !freeze {
                let was_frozen = state.frozen;
                state.frozen = false;
                drop(state);
                if was_frozen {
                    info!("Unfreezing agent");
                }
                self.consumer_wakeup.notify_one();
                return true;
            }

            if state.frozen {
                return true;
            }
            if state.consumer_waiting {
                state.frozen = true;
                info!("Agent frozen while idle");
                return true;
            }
        }

        debug!(timeout_ms = timeout.as_millis() as u64, "Waiting for agent to go idle");

        // A timeout too large to represent waits without a deadline.
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let notified = self.idle_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.lock();
                if state.frozen {
                    return true;
                }
                if !state.want_frozen {
                    // Unfrozen by a later caller.
                    return false;
                }
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        debug!("Timed out waiting for agent to freeze");
                        return false;
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Wake a waiting consumer with [`CoordinatorError::Interrupted`].
    ///
    /// If the consumer is mid-pass the interruption is delivered on its next
    /// call to `next_context`.
    pub fn interrupt(&self) {
        self.lock().interrupted = true;
        self.consumer_wakeup.notify_one();
    }

    pub fn is_frozen(&self) -> bool {
        self.lock().frozen
    }

    /// The context most recently handed to the agent.
    pub fn current_context(&self) -> Option<Arc<NodeAgentContext>> {
        self.lock().current.clone()
    }

    pub fn has_pending_tick(&self) -> bool {
        self.lock().pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use warden_reconcile::{
        DiskSpeed, NodeResources, NodeSpec, NodeState, OrchestratorStatus, StorageType,
    };

    use super::*;
    use crate::context::{FeatureFlags, SystemClock};

    fn context(hostname: &str) -> Arc<NodeAgentContext> {
        let node = NodeSpec {
            hostname: hostname.to_string(),
            state: NodeState::Active,
            wanted_docker_image: None,
            current_docker_image: None,
            wanted_version: None,
            current_version: None,
            wanted_restart_generation: None,
            current_restart_generation: None,
            wanted_reboot_generation: 0,
            current_reboot_generation: 0,
            resources: NodeResources {
                vcpu: 1.0,
                memory_gb: 1.0,
                disk_gb: 1.0,
                disk_speed: DiskSpeed::Any,
                storage_type: StorageType::Any,
            },
            orchestrator_status: OrchestratorStatus::NoRemarks,
            owner: None,
            reports: BTreeMap::new(),
        };
        Arc::new(NodeAgentContext::new(
            node,
            "/tmp/nodes",
            FeatureFlags::default(),
            Arc::new(SystemClock),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_scheduled_tick_wins() {
        let coordinator = ContextTickCoordinator::new();
        coordinator.schedule_tick(context("first"), Instant::now());
        coordinator.schedule_tick(context("second"), Instant::now());

        let ctx = coordinator.next_context().await.unwrap();
        assert_eq!(ctx.hostname(), "second");
        assert!(!coordinator.has_pending_tick());
        assert_eq!(
            coordinator.current_context().unwrap().hostname(),
            "second"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_not_returned_before_deadline() {
        let coordinator = ContextTickCoordinator::new();
        let start = Instant::now();
        coordinator.schedule_tick(context("host"), start + Duration::from_millis(250));

        coordinator.next_context().await.unwrap();
        assert!(Instant::now() >= start + Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_does_not_replace_pending_tick() {
        let coordinator = ContextTickCoordinator::new();
        coordinator.schedule_tick(context("fresh"), Instant::now());
        assert!(!coordinator.schedule_retry(context("stale"), Instant::now()));

        let ctx = coordinator.next_context().await.unwrap();
        assert_eq!(ctx.hostname(), "fresh");

        assert!(coordinator.schedule_retry(context("retry"), Instant::now()));
        assert_eq!(coordinator.next_context().await.unwrap().hostname(), "retry");
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_wakes_waiting_consumer() {
        let coordinator = Arc::new(ContextTickCoordinator::new());
        let consumer = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.next_context().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        coordinator.interrupt();

        let result = consumer.await.unwrap();
        assert_eq!(result.unwrap_err(), CoordinatorError::Interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_freeze_without_consumer_times_out() {
        let coordinator = ContextTickCoordinator::new();
        assert!(!coordinator.set_frozen(true, Duration::from_millis(100)).await);
        assert!(!coordinator.is_frozen());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfreeze_returns_immediately() {
        let coordinator = ContextTickCoordinator::new();
        assert!(coordinator.set_frozen(false, Duration::ZERO).await);
        assert!(!coordinator.is_frozen());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_freeze_timeout_waits_for_idle() {
        let coordinator = Arc::new(ContextTickCoordinator::new());
        assert!(coordinator.set_frozen(false, Duration::MAX).await);

        let freezer = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.set_frozen(true, Duration::MAX).await }
        });
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!freezer.is_finished());

        let consumer = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.next_context().await }
        });
        assert!(freezer.await.unwrap());
        assert!(coordinator.is_frozen());

        coordinator.interrupt();
        assert_eq!(
            consumer.await.unwrap().unwrap_err(),
            CoordinatorError::Interrupted
        );
    }
}
