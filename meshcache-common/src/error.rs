//! # Error Kinds
//!
//! Purpose: Define the error surface shared by every crate in the
//! coordinator so handles, the backplane, and the manager report failures
//! through one vocabulary instead of ad-hoc strings.
//!
//! ## Design Principles
//! 1. **Closed Set**: Five kinds cover every failure mode the core raises;
//!    callers match exhaustively instead of string-sniffing messages.
//! 2. **Propagate, Don't Wrap Twice**: `HandleError` carries the backend's
//!    own error as-is rather than re-stringifying it.
//! 3. **Fail Fast**: `InvalidArgument` and `Disposed` are never retried by
//!    the manager; they surface unconditionally.

use std::fmt;

/// Result alias used throughout the coordinator.
pub type CacheResult<T> = Result<T, CacheError>;

/// Error kinds raised by handles, the backplane, and the manager.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Null key/value, out-of-range timeout, non-UTC timestamp, or a
    /// negative `max_retries`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Raised by the convenience `get` accessor when the key is absent.
    #[error("key not found")]
    NotFound,

    /// Update/AddOrUpdate failure surfaced by a throw-on-failure variant,
    /// an expiration mode without a timeout, a duplicate backplane source,
    /// or an empty handle list.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Operation attempted on a disposed manager or handle.
    #[error("operation on a disposed cache")]
    Disposed,

    /// Propagated verbatim from a handle backend.
    #[error("handle error: {0}")]
    HandleError(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl CacheError {
    /// Builds an `InvalidArgument` from a displayable reason.
    pub fn invalid_argument(reason: impl fmt::Display) -> Self {
        CacheError::InvalidArgument(reason.to_string())
    }

    /// Builds an `InvariantViolation` from a displayable reason.
    pub fn invariant_violation(reason: impl fmt::Display) -> Self {
        CacheError::InvariantViolation(reason.to_string())
    }

    /// Wraps a handle backend error, preserving its source chain.
    pub fn handle_error(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        CacheError::HandleError(Box::new(source))
    }
}
