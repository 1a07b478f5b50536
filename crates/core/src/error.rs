//! Shared error taxonomy.
//!
//! Every core operation returns a `CoreResult`: callers get a typed error kind,
//! never a panic and never raw storage error text. `Internal` carries its cause
//! for logging but renders a generic message at the boundary.

use std::sync::Arc;

use chrono::Duration;
use thiserror::Error;

/// Result type used across the identity core.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error taxonomy.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Malformed input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested entity/version does not exist.
    #[error("not found")]
    NotFound,

    /// CAS contention exceeded the retry budget.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Credential verification failed.
    #[error("unauthorized")]
    Unauthorized,

    /// Account lockout is active.
    #[error("locked: retry after {}s", .retry_after.num_seconds())]
    Locked { retry_after: Duration },

    /// Request budget exhausted for the current window.
    #[error("rate limited: retry after {}s", .retry_after.num_seconds())]
    RateLimited { retry_after: Duration },

    /// Token or session past its deadline.
    #[error("expired")]
    Expired,

    /// Storage or other unexpected failure. The cause is logged at the point
    /// of construction; only this generic message crosses the boundary.
    #[error("internal error")]
    Internal(#[source] Arc<anyhow::Error>),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Wrap an unexpected failure, logging full context exactly once.
    pub fn internal(operation: &str, cause: impl Into<anyhow::Error>) -> Self {
        let cause = cause.into();
        tracing::error!(operation, cause = %cause, "internal error");
        Self::Internal(Arc::new(cause))
    }

    /// Like [`CoreError::internal`] for causes that are plain messages.
    pub fn internal_msg(operation: &str, msg: impl Into<String>) -> Self {
        Self::internal(operation, anyhow::anyhow!(msg.into()))
    }
}
