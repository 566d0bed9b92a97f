//! Error taxonomy for convergence passes.
//!
//! Every failure inside a pass is a [`ConvergenceError`], tagged as either
//! transient (retry on the next tick, nothing is assumed broken) or fatal
//! (surface to the caller and abort the pass). Interruption of the agent's
//! wait is not a convergence failure and has its own type.

use std::fmt;

use thiserror::Error;

/// How a convergence failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Fatal => f.write_str("fatal"),
        }
    }
}

/// A failed convergence step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvergenceError {
    /// Retry on the next tick.
    #[error("transient error: {0}")]
    Transient(String),

    /// Abort the pass and surface the failure.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl ConvergenceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) => ErrorKind::Transient,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(message) | Self::Fatal(message) => message,
        }
    }
}

/// Errors from the cluster orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    /// The orchestrator refused to let the node go down.
    #[error("suspend denied: {0}")]
    Denied(String),

    /// The orchestrator could not be reached.
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),
}

impl From<OrchestratorError> for ConvergenceError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Denied(_) => Self::Fatal(err.to_string()),
            OrchestratorError::Unavailable(_) => Self::Transient(err.to_string()),
        }
    }
}

/// Errors from waiting on the tick coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// The wait was interrupted for shutdown.
    #[error("interrupted while waiting for next context")]
    Interrupted,
}
