//! Connection lifecycle management.
//!
//! The pool is generic over a [`ManageConnection`] implementation, which
//! knows how to open a connection, validate it, and tell whether it is
//! still fit for reuse.

use std::time::{Duration, Instant};

/// Opens and checks connections for a [`Pool`](crate::Pool).
///
/// Uses `#[async_trait]` so the manager can be stored behind the pool's
/// shared state without naming future types.
#[async_trait::async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    /// The pooled connection type.
    type Connection: Send + 'static;
    /// Error produced while connecting or validating.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Check that an idle connection still works before handing it out.
    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error>;

    /// Whether a returned connection must be discarded instead of reused.
    ///
    /// Called synchronously when a connection is released, so it must not
    /// perform I/O.
    fn has_broken(&self, conn: &mut Self::Connection) -> bool;
}

/// Metadata about a pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Unique identifier for this connection.
    pub id: u64,
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection was last checked out or returned.
    pub last_used_at: Instant,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
}

impl ConnectionMetadata {
    /// Create metadata for a new connection.
    #[must_use]
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
        }
    }

    /// Check if the connection has exceeded its maximum lifetime.
    #[must_use]
    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.created_at.elapsed() > max_lifetime
    }

    /// Check if the connection has been idle too long.
    #[must_use]
    pub fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used_at.elapsed() > idle_timeout
    }

    /// Mark the connection as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
    }

    /// Mark the connection as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_metadata_new() {
        let meta = ConnectionMetadata::new(1);
        assert_eq!(meta.id, 1);
        assert_eq!(meta.checkout_count, 0);
        assert!(!meta.is_expired(Duration::from_secs(60)));
    }

    #[test]
    fn test_connection_metadata_checkout() {
        let mut meta = ConnectionMetadata::new(1);
        meta.mark_checkout();
        meta.mark_checkin();
        meta.mark_checkout();
        assert_eq!(meta.checkout_count, 2);
    }

    #[test]
    fn test_zero_timeouts_expire_immediately() {
        let meta = ConnectionMetadata::new(7);
        std::thread::sleep(Duration::from_millis(2));
        assert!(meta.is_expired(Duration::ZERO));
        assert!(meta.is_idle_expired(Duration::ZERO));
    }
}
