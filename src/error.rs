//! Unified error handling for switchboard.
//!
//! One taxonomy for the whole crate: business-level negative
//! acknowledgments, timeouts, transport faults, and handler faults are
//! distinct variants so callers can branch on them without string
//! matching.

use thiserror::Error;

/// Errors surfaced by the middleware core.
#[derive(Debug, Error)]
pub enum Error {
    /// Structured business-level rejection (e.g. ownership denied, alias
    /// unowned). Distinct from transport or timeout failure.
    #[error("negative acknowledgment: {reason}")]
    Nack {
        /// Reason string carried by the rejecting party.
        reason: String,
    },

    /// No correlated reply arrived within the deadline. Cancellation is
    /// not an error: a cancelled wait returns its partial result.
    #[error("timed out waiting for reply")]
    Timeout,

    /// Failure at the queue transport boundary.
    #[error("transport error: {0}")]
    Transport(String),

    /// The session lock on a session-affine receiver expired. The receive
    /// loop renews the lock and retries on this variant.
    #[error("session lock lost")]
    LockLost,

    /// A plugin handler callback failed. Isolated per handler; never
    /// propagates out of the dispatch loop.
    #[error("handler fault: {0}")]
    Handler(String),

    /// Malformed caller input (blank identity, empty token, unresolvable
    /// reply channel).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A plugin of the same kind is already loaded.
    #[error("plugin conflict: {0}")]
    PluginConflict(String),

    /// The communicator or a channel receiver has shut down.
    #[error("channel closed")]
    ChannelClosed,
}

impl Error {
    /// Static error code for log labeling.
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Nack { .. } => "nack",
            Self::Timeout => "timeout",
            Self::Transport(_) => "transport",
            Self::LockLost => "lock_lost",
            Self::Handler(_) => "handler_fault",
            Self::InvalidInput(_) => "invalid_input",
            Self::PluginConflict(_) => "plugin_conflict",
            Self::ChannelClosed => "channel_closed",
        }
    }

    /// Build a negative-acknowledgment error.
    pub fn nack(reason: impl Into<String>) -> Self {
        Self::Nack { reason: reason.into() }
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
