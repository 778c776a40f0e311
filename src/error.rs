//! Error taxonomy for the resilience & isolation fabric.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by operation methods called from outside the fabric.
///
/// Background loops never propagate these; they log at ERROR with context
/// and continue (see the module docs on each loop for specifics).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FabricError {
    /// Invalid input: bad `user_id`, out-of-range interval, unsupported transport, etc.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A pool had no available connection and its breaker is open.
    #[error("resource unavailable for {resource}")]
    ResourceUnavailable {
        /// The pool/server/session this was requested from.
        resource: String,
    },

    /// A circuit breaker rejected the call without attempting it.
    #[error("circuit '{name}' is open ({failure_count} failures, open for {open_for:?})")]
    CircuitOpenRejection {
        name: String,
        failure_count: usize,
        open_for: Duration,
    },

    /// A call exceeded its configured timeout.
    #[error("call to '{name}' timed out after {elapsed:?} (limit {limit:?})")]
    Timeout {
        name: String,
        elapsed: Duration,
        limit: Duration,
    },

    /// A transient I/O-style failure, subject to retry/backoff.
    #[error("transient failure on '{context}': {message}")]
    Transient { context: String, message: String },

    /// Failure during connection setup, before reaching `CONNECTED`.
    #[error("connection setup failed for server '{server}': {message}")]
    ConnectionSetup { server: String, message: String },

    /// A transport kind has no registered factory.
    #[error("unsupported transport: {0:?}")]
    UnsupportedTransport(crate::mcp::Transport),

    /// New work was rejected because shutdown is in progress.
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// An agent/session/factory lookup failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation was cancelled cooperatively; neither a success nor a failure.
    #[error("operation cancelled")]
    Cancelled,
}

impl FabricError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpenRejection { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_resource_unavailable(&self) -> bool {
        matches!(self, Self::ResourceUnavailable { .. })
    }
}

pub type FabricResult<T> = Result<T, FabricError>;
