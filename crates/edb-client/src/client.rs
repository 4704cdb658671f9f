//! Pooled client.
//!
//! [`Client`] is cheap to clone; clones share one bounded pool. Every
//! operation checks a connection out, uses it and returns it when the guard
//! drops, also on error or panic. Connections that are not `Idle` on return
//! (timed out, abandoned mid-command, fatal error, open transaction) are
//! discarded instead of being reused.

use async_trait::async_trait;
use edb_pool::{ManageConnection, Pool, PoolConfig, PoolStatus, PooledConnection};
use edb_types::{FromValue, QueryArgs, Value};

use crate::config::{ConnectOptions, DEFAULT_MAX_POOL_SIZE, RetryPolicy, TransportKind};
use crate::connection::Connection;
use crate::error::{Error, Result};

/// Opens [`Connection`]s for the pool.
///
/// Options are resolved on every connect, so missing connection
/// parameters surface as a configuration error from the first operation
/// rather than from [`Client::new`].
pub struct ConnectionManager {
    options: ConnectOptions,
}

impl ConnectionManager {
    /// Create a manager for `options`.
    #[must_use]
    pub fn new(options: ConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ManageConnection for ConnectionManager {
    type Connection = Connection;
    type Error = Error;

    async fn connect(&self) -> Result<Connection> {
        let params = self.options.resolve()?;
        Connection::open(params).await
    }

    async fn is_valid(&self, conn: &mut Connection) -> Result<()> {
        if conn.state().is_usable() {
            Ok(())
        } else {
            Err(Error::ConnectionClosed)
        }
    }

    fn has_broken(&self, conn: &mut Connection) -> bool {
        !conn.state().is_usable() || conn.is_in_transaction()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("options", &self.options)
            .finish()
    }
}

/// A pooled database client.
#[derive(Clone)]
pub struct Client {
    pool: Pool<ConnectionManager>,
    retry: RetryPolicy,
    transport: TransportKind,
}

impl Client {
    /// Create a client. No connection is opened until the first operation.
    ///
    /// The pool holds at most `max_pool_size` connections.
    pub async fn new(options: ConnectOptions) -> Result<Self> {
        let max = options.max_pool_size.unwrap_or(DEFAULT_MAX_POOL_SIZE);
        Self::with_pool_config(options, PoolConfig::new().max_connections(max)).await
    }

    /// Create a client with explicit pool settings.
    pub async fn with_pool_config(options: ConnectOptions, config: PoolConfig) -> Result<Self> {
        let retry = options.retry.clone().unwrap_or_default();
        let transport = options.transport;
        let pool = Pool::new(ConnectionManager::new(options), config).await?;
        Ok(Self {
            pool,
            retry,
            transport,
        })
    }

    /// Check a connection out and make sure it is connected.
    pub(crate) async fn acquire(&self) -> Result<PooledConnection<ConnectionManager>> {
        let mut conn = self.pool.get().await?;
        conn.ensure_connected().await?;
        Ok(conn)
    }

    /// Open (or reuse) one connection.
    ///
    /// Fails with [`Error::Configuration`] before any I/O when no
    /// connection parameters were supplied.
    pub async fn ensure_connected(&self) -> Result<()> {
        self.acquire().await.map(drop)
    }

    /// Run `f` with a pooled connection.
    ///
    /// The connection goes back to the pool when `f` finishes, whatever
    /// its outcome.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.acquire().await?;
        f(&mut *conn).await
    }

    /// Run a query and return all rows.
    pub async fn query(&self, text: &str, args: &QueryArgs) -> Result<Vec<Value>> {
        self.acquire().await?.query(text, args).await
    }

    /// Run a query that must return exactly one row.
    pub async fn query_single(&self, text: &str, args: &QueryArgs) -> Result<Value> {
        self.acquire().await?.query_single(text, args).await
    }

    /// Run a single-row query and convert the row.
    pub async fn query_single_as<T: FromValue>(&self, text: &str, args: &QueryArgs) -> Result<T> {
        let value = self.query_single(text, args).await?;
        Ok(T::from_value(value)?)
    }

    /// Run a query and return the result as a JSON array.
    pub async fn query_json(&self, text: &str, args: &QueryArgs) -> Result<String> {
        self.acquire().await?.query_json(text, args).await
    }

    /// Run a single-result query and return it as JSON.
    pub async fn query_single_json(&self, text: &str, args: &QueryArgs) -> Result<String> {
        self.acquire().await?.query_single_json(text, args).await
    }

    /// Run a command and discard its output.
    pub async fn execute(&self, text: &str, args: &QueryArgs) -> Result<()> {
        self.acquire().await?.execute_command(text, args).await.map(drop)
    }

    /// Pool occupancy.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Close the pool. Pending and later operations fail with
    /// [`Error::PoolClosed`].
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Whether [`Client::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub(crate) fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn transport(&self) -> TransportKind {
        self.transport
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("pool", &self.pool.status())
            .field("retry", &self.retry)
            .field("transport", &self.transport)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[tokio::test]
    async fn test_empty_options_fail_before_io() {
        let client = Client::new(ConnectOptions::new()).await.unwrap();
        let err = client.ensure_connected().await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(client.status().total, 0);
    }

    #[tokio::test]
    async fn test_zero_pool_size_rejected() {
        let err = Client::new(ConnectOptions::new().host("localhost").max_pool_size(0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
