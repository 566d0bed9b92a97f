//! The unit of work handed to the agent on every tick.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_reconcile::NodeSpec;

/// Source of wall-clock time for a pass.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(delta) = chrono::Duration::from_std(by) {
            *now += delta;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Feature flag values captured when the context was built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Factor applied to the node's vcpu before it is given to the container.
    pub cpu_multiplier: f64,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            cpu_multiplier: 1.0,
        }
    }
}

/// Immutable snapshot of everything one convergence pass needs to know.
#[derive(Clone)]
pub struct NodeAgentContext {
    node: NodeSpec,
    path_to_node_root: PathBuf,
    flags: FeatureFlags,
    clock: Arc<dyn Clock>,
}

impl NodeAgentContext {
    pub fn new(
        node: NodeSpec,
        path_to_node_root: impl Into<PathBuf>,
        flags: FeatureFlags,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            node,
            path_to_node_root: path_to_node_root.into(),
            flags,
            clock,
        }
    }

    /// The same context with a freshly resolved node.
    pub fn with_node(&self, node: NodeSpec) -> Self {
        Self {
            node,
            path_to_node_root: self.path_to_node_root.clone(),
            flags: self.flags,
            clock: Arc::clone(&self.clock),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.node.hostname
    }

    /// The desired state this context was built for.
    pub fn node(&self) -> &NodeSpec {
        &self.node
    }

    /// Root of the node's filesystem on the host.
    pub fn path_to_node_root(&self) -> &Path {
        &self.path_to_node_root
    }

    pub fn flags(&self) -> &FeatureFlags {
        &self.flags
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl fmt::Debug for NodeAgentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeAgentContext")
            .field("hostname", &self.node.hostname)
            .field("state", &self.node.state)
            .field("path_to_node_root", &self.path_to_node_root)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(90));
    }

    #[test]
    fn test_feature_flags_default() {
        assert_eq!(FeatureFlags::default().cpu_multiplier, 1.0);
    }
}
