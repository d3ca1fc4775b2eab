//! Error types for pool operations
use std::time::Duration;

use thiserror::Error;

/// Opaque user-code failure produced by a [`Factory`](crate::factory::Factory)
/// method.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pool operations.
///
/// Waiting-path outcomes (`Timeout`, `Interrupted`, `Closed`) are explicit
/// variants rather than control flow; factory failures are carried opaquely
/// and surfaced unchanged to the borrowing caller.
#[derive(Error, Debug)]
pub enum Error {
    /// Non-blocking borrow found no capacity
    #[error("pool exhausted: {active}/{max_total} in use, {waiters} waiting")]
    Exhausted {
        /// Instances currently allocated to borrowers
        active: usize,
        /// Configured capacity
        max_total: usize,
        /// Borrowers blocked on the idle queue
        waiters: usize,
    },

    /// Blocking borrow exceeded its wait budget
    #[error("borrow timed out after {waited:?}")]
    Timeout {
        /// Time spent waiting before giving up
        waited: Duration,
    },

    /// Borrower was woken by `interrupt_waiters` while blocked
    #[error("borrower interrupted while waiting")]
    Interrupted,

    /// Operation on a closed pool
    #[error("pool is closed")]
    Closed,

    /// State-machine violation: stale return, unknown instance, etc.
    #[error("invalid object state: {reason}")]
    InvalidState {
        /// What the caller attempted and why it was rejected
        reason: String,
    },

    /// User factory code failed; the source is surfaced unchanged
    #[error("factory error: {source}")]
    Factory {
        /// The failure reported by the factory
        #[source]
        source: BoxError,
    },

    /// Pool configuration is invalid
    #[error("configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid-state error
    pub fn invalid_state<S: Into<String>>(reason: S) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Wrap a factory failure
    pub fn factory<E: Into<BoxError>>(source: E) -> Self {
        Self::Factory {
            source: source.into(),
        }
    }

    /// Check if retrying the operation later could succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::Timeout { .. })
    }
}

/// Listener for errors the pool swallows on background paths (evictor
/// probing, destroy failures, return-on-drop).
///
/// The pool never panics on a swallowed error; it hands it here and keeps
/// going. A listener that itself panics propagates on the thread that
/// triggered the swallow, and the pool continues operating afterwards.
pub trait SwallowedErrorListener: Send + Sync {
    /// Called with each swallowed error.
    fn swallowed(&self, error: &Error);
}
