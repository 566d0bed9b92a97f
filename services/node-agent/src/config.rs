//! Configuration for the node agent.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::context::FeatureFlags;
use crate::engine::EngineConfig;
use crate::scheduler::TickSchedulerConfig;

/// Node agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hostname of the managed node.
    pub hostname: String,

    /// Directory holding the filesystem roots of managed nodes.
    pub node_root: PathBuf,

    /// Interval between ticks in seconds.
    pub tick_interval_secs: u64,

    /// Warm-up after a change before the node may be resumed, in seconds.
    pub warm_up_secs: u64,

    /// How long maintenance waits for the agent to freeze, in seconds.
    pub freeze_timeout_secs: u64,

    /// Factor applied to the node's vcpu allocation.
    pub cpu_multiplier: f64,

    /// Log level (trace, debug, info, warn, error) for the hosting daemon's
    /// tracing subscriber. This crate only emits events.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let hostname = std::env::var("WARDEN_HOSTNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "localhost".to_string());

        let node_root = std::env::var("WARDEN_NODE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/warden/nodes"));

        let tick_interval_secs: u64 = env_or("WARDEN_TICK_INTERVAL_SECS", 30)?;
        if tick_interval_secs == 0 {
            anyhow::bail!("WARDEN_TICK_INTERVAL_SECS must be at least 1");
        }
        let warm_up_secs = env_or("WARDEN_WARM_UP_SECS", 90)?;
        let freeze_timeout_secs = env_or("WARDEN_FREEZE_TIMEOUT_SECS", 30)?;
        let cpu_multiplier: f64 = env_or("WARDEN_CPU_MULTIPLIER", 1.0)?;
        if cpu_multiplier.is_nan() || cpu_multiplier <= 0.0 {
            anyhow::bail!("WARDEN_CPU_MULTIPLIER must be positive, got {cpu_multiplier}");
        }

        let log_level = std::env::var("WARDEN_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            hostname,
            node_root,
            tick_interval_secs,
            warm_up_secs,
            freeze_timeout_secs,
            cpu_multiplier,
            log_level,
        })
    }

    /// Filesystem root of the managed node.
    pub fn path_to_node_root(&self) -> PathBuf {
        self.node_root.join(&self.hostname)
    }

    pub fn freeze_timeout(&self) -> Duration {
        Duration::from_secs(self.freeze_timeout_secs)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            warm_up_duration: Duration::from_secs(self.warm_up_secs),
        }
    }

    pub fn scheduler_config(&self) -> TickSchedulerConfig {
        TickSchedulerConfig {
            tick_interval: Duration::from_secs(self.tick_interval_secs),
        }
    }

    pub fn feature_flags(&self) -> FeatureFlags {
        FeatureFlags {
            cpu_multiplier: self.cpu_multiplier,
        }
    }
}

/// Parse `name` if set, otherwise use `default`.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {value:?}")),
        Err(_) => Ok(default),
    }
}
