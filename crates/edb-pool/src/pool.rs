//! Connection pool implementation.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionMetadata, ManageConnection};

/// A bounded pool of connections.
///
/// At most `max_connections` connections are alive at any time, counting
/// both idle and checked-out ones. Acquirers beyond that wait in FIFO order
/// until a connection is released or the acquisition timeout expires.
pub struct Pool<M: ManageConnection> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Idle<C> {
    conn: C,
    meta: ConnectionMetadata,
}

struct PoolState<C> {
    idle: VecDeque<Idle<C>>,
    /// Live connections: idle, checked out, or being opened.
    total: u32,
    closed: bool,
}

struct PoolInner<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState<M::Connection>>,
    next_id: AtomicU64,
}

impl<M: ManageConnection> PoolInner<M> {
    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);
    }

    /// Drop expired idle connections and those idle too long beyond the minimum.
    fn reap(&self) -> usize {
        let reaped: Vec<Idle<M::Connection>> = {
            let mut state = self.state.lock();
            let mut keep = VecDeque::with_capacity(state.idle.len());
            let mut reaped = Vec::new();
            let mut total = state.total;
            while let Some(idle) = state.idle.pop_front() {
                let expired = idle.meta.is_expired(self.config.max_lifetime);
                let surplus = total > self.config.min_connections
                    && idle.meta.is_idle_expired(self.config.idle_timeout);
                if expired || surplus {
                    total -= 1;
                    reaped.push(idle);
                } else {
                    keep.push_back(idle);
                }
            }
            state.idle = keep;
            state.total = total;
            reaped
        };
        for idle in &reaped {
            tracing::debug!(connection_id = idle.meta.id, "reaped idle connection");
        }
        reaped.len()
    }
}

/// Reserved slot for a connection being opened; released unless defused.
struct Reservation<'a, M: ManageConnection> {
    inner: &'a PoolInner<M>,
    armed: bool,
}

impl<M: ManageConnection> Drop for Reservation<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.release_slot();
        }
    }
}

impl<M: ManageConnection> Pool<M> {
    /// Create a pool and open `min_connections` connections.
    pub async fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError<M::Error>> {
        config.validate()?;
        let semaphore = Arc::new(Semaphore::new(config.max_connections as usize));
        let inner = Arc::new(PoolInner {
            manager,
            config,
            semaphore,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
                closed: false,
            }),
            next_id: AtomicU64::new(1),
        });
        let pool = Self { inner };

        for _ in 0..pool.inner.config.min_connections {
            let conn = pool.get().await?;
            drop(conn);
        }

        if let Some(interval) = pool.inner.config.reap_interval {
            spawn_reaper(Arc::downgrade(&pool.inner), interval);
        }

        tracing::debug!(
            min = pool.inner.config.min_connections,
            max = pool.inner.config.max_connections,
            "connection pool created"
        );
        Ok(pool)
    }

    /// Get a connection from the pool.
    ///
    /// Returns an idle connection if one is available, opens a new one if
    /// the pool is below capacity, and otherwise waits until a connection
    /// is released or `acquire_timeout` expires.
    pub async fn get(&self) -> Result<PooledConnection<M>, PoolError<M::Error>> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        tracing::trace!("acquiring connection from pool");
        let timeout = self.inner.config.acquire_timeout;
        let permit = tokio::time::timeout(timeout, Arc::clone(&self.inner.semaphore).acquire_owned())
            .await
            .map_err(|_| PoolError::AcquisitionTimeout(timeout))?
            .map_err(|_| PoolError::PoolClosed)?;

        self.checkout(permit).await
    }

    /// Get an idle connection without waiting or connecting.
    ///
    /// Returns `None` when no idle connection is available.
    pub fn try_get(&self) -> Result<Option<PooledConnection<M>>, PoolError<M::Error>> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        let Ok(permit) = Arc::clone(&self.inner.semaphore).try_acquire_owned() else {
            return Ok(None);
        };
        let idle = self.inner.state.lock().idle.pop_back();
        Ok(idle.map(|idle| self.wrap(idle.conn, idle.meta, permit)))
    }

    async fn checkout(
        &self,
        permit: OwnedSemaphorePermit,
    ) -> Result<PooledConnection<M>, PoolError<M::Error>> {
        loop {
            let candidate = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(PoolError::PoolClosed);
                }
                match state.idle.pop_back() {
                    Some(idle) => Some(idle),
                    None => {
                        // holding a permit with no idle connection implies room
                        state.total += 1;
                        None
                    }
                }
            };

            let Some(Idle { mut conn, meta }) = candidate else {
                return self.open(permit).await;
            };

            let mut reservation = Reservation {
                inner: &self.inner,
                armed: true,
            };
            if meta.is_expired(self.inner.config.max_lifetime) {
                tracing::debug!(connection_id = meta.id, "discarding expired connection");
                continue;
            }
            if self.inner.config.test_on_checkout {
                if let Err(e) = self.inner.manager.is_valid(&mut conn).await {
                    tracing::debug!(connection_id = meta.id, error = %e, "discarding invalid connection");
                    continue;
                }
            }
            reservation.armed = false;
            return Ok(self.wrap(conn, meta, permit));
        }
    }

    async fn open(
        &self,
        permit: OwnedSemaphorePermit,
    ) -> Result<PooledConnection<M>, PoolError<M::Error>> {
        let mut reservation = Reservation {
            inner: &self.inner,
            armed: true,
        };
        let conn = self
            .inner
            .manager
            .connect()
            .await
            .map_err(PoolError::Connection)?;
        reservation.armed = false;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection_id = id, "opened pooled connection");
        Ok(self.wrap(conn, ConnectionMetadata::new(id), permit))
    }

    fn wrap(
        &self,
        conn: M::Connection,
        mut meta: ConnectionMetadata,
        permit: OwnedSemaphorePermit,
    ) -> PooledConnection<M> {
        meta.mark_checkout();
        PooledConnection {
            conn: Some(conn),
            meta,
            pool: Arc::clone(&self.inner),
            discard: false,
            _permit: permit,
        }
    }

    /// Close idle connections that exceeded their lifetime or idle timeout.
    ///
    /// Runs periodically when `reap_interval` is set; returns the number of
    /// connections closed.
    pub fn reap(&self) -> usize {
        self.inner.reap()
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        let available = u32::try_from(state.idle.len()).unwrap_or(u32::MAX);
        PoolStatus {
            available,
            in_use: state.total.saturating_sub(available),
            total: state.total,
            max: self.inner.config.max_connections,
        }
    }

    /// Close the pool, dropping all idle connections.
    ///
    /// Waiting acquirers fail with [`PoolError::PoolClosed`]; checked-out
    /// connections are dropped when released.
    pub async fn close(&self) {
        let idle = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            state.total = state.total.saturating_sub(u32::try_from(idle.len()).unwrap_or(u32::MAX));
            idle
        };
        self.inner.semaphore.close();
        drop(idle);
        tracing::info!("connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The connection manager.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }
}

impl<M: ManageConnection> fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

fn spawn_reaper<M: ManageConnection>(pool: Weak<PoolInner<M>>, interval: std::time::Duration) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("no tokio runtime; idle reaper disabled");
        return;
    };
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = pool.upgrade() else { break };
            if inner.state.lock().closed {
                break;
            }
            let reaped = inner.reap();
            if reaped > 0 {
                tracing::debug!(reaped, "idle reaper pass");
            }
        }
    });
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently checked out or being opened.
    pub in_use: u32,
    /// Total number of live connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

/// A connection retrieved from the pool.
///
/// When dropped, the connection is returned to the pool unless it was
/// marked for discard or the manager reports it broken.
pub struct PooledConnection<M: ManageConnection> {
    conn: Option<M::Connection>,
    meta: ConnectionMetadata,
    pool: Arc<PoolInner<M>>,
    discard: bool,
    _permit: OwnedSemaphorePermit,
}

impl<M: ManageConnection> PooledConnection<M> {
    /// Drop the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        self.discard = true;
    }

    /// Detach the connection from the pool.
    ///
    /// The slot it occupied is freed for a new connection.
    pub fn detach(mut self) -> Option<M::Connection> {
        let conn = self.conn.take();
        self.pool.release_slot();
        conn
    }

    /// Metadata of this connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.meta
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection taken before drop"),
        }
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => conn,
            None => unreachable!("connection taken before drop"),
        }
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let broken = self.discard || self.pool.manager.has_broken(&mut conn);
        let mut state = self.pool.state.lock();
        if broken || state.closed {
            state.total = state.total.saturating_sub(1);
            drop(state);
            tracing::debug!(connection_id = self.meta.id, broken, "dropping pooled connection");
            return;
        }
        self.meta.mark_checkin();
        state.idle.push_back(Idle {
            conn,
            meta: self.meta.clone(),
        });
        tracing::trace!(connection_id = self.meta.id, "returned connection to pool");
    }
}
