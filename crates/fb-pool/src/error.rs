//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by the pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool was closed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// No slot became free within the checkout timeout.
    #[error("connection pool exhausted: {max} connections in use after waiting {waited:?}")]
    Exhausted {
        /// Configured maximum.
        max: u32,
        /// How long the checkout waited.
        waited: Duration,
    },

    /// Establishing a new connection failed.
    #[error("failed to establish connection: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The configuration is invalid.
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}
