//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during pool operations.
///
/// `E` is the connection manager's error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError<E> {
    /// No connection became available within the timeout.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(Duration),

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Opening a new connection failed.
    #[error("failed to create connection: {0}")]
    Connection(#[source] E),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl<E> PoolError<E> {
    /// Whether the error is an acquisition timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::AcquisitionTimeout(_))
    }
}
