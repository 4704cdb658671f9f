//! Pool behavior tests against an in-memory connection manager.

#![allow(clippy::unwrap_used, missing_docs)]

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use edb_pool::{ManageConnection, Pool, PoolConfig, PoolError};

#[derive(Default)]
struct Counters {
    created: AtomicU32,
    live: AtomicU32,
    peak: AtomicU32,
    fail_next: AtomicBool,
}

struct TestConn {
    id: u32,
    broken: bool,
    valid: bool,
    counters: Arc<Counters>,
}

impl Drop for TestConn {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct TestManager {
    counters: Arc<Counters>,
}

#[async_trait::async_trait]
impl ManageConnection for TestManager {
    type Connection = TestConn;
    type Error = io::Error;

    async fn connect(&self) -> Result<TestConn, io::Error> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        if self.counters.fail_next.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        }
        let id = self.counters.created.fetch_add(1, Ordering::SeqCst) + 1;
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(live, Ordering::SeqCst);
        Ok(TestConn {
            id,
            broken: false,
            valid: true,
            counters: Arc::clone(&self.counters),
        })
    }

    async fn is_valid(&self, conn: &mut TestConn) -> Result<(), io::Error> {
        if conn.valid {
            Ok(())
        } else {
            Err(io::Error::other("stale"))
        }
    }

    fn has_broken(&self, conn: &mut TestConn) -> bool {
        conn.broken
    }
}

fn config(max: u32) -> PoolConfig {
    PoolConfig::new()
        .max_connections(max)
        .acquire_timeout(Duration::from_secs(5))
        .reap_interval(None)
}

#[tokio::test]
async fn test_pool_never_exceeds_max() {
    let manager = TestManager::default();
    let counters = Arc::clone(&manager.counters);
    let pool = Pool::new(manager, config(3)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..24 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let conn = pool.get().await.unwrap();
            assert!(pool.status().total <= 3);
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(conn);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(counters.peak.load(Ordering::SeqCst) <= 3);
    assert!(counters.created.load(Ordering::SeqCst) <= 3);
    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert!(status.available <= 3);
}

#[tokio::test]
async fn test_connection_reuse() {
    let manager = TestManager::default();
    let counters = Arc::clone(&manager.counters);
    let pool = Pool::new(manager, config(2)).await.unwrap();

    let first_id = pool.get().await.unwrap().id;
    let conn = pool.get().await.unwrap();
    assert_eq!(conn.id, first_id);
    assert_eq!(conn.metadata().checkout_count, 2);
    assert_eq!(counters.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_acquisition_timeout() {
    let pool = Pool::new(
        TestManager::default(),
        config(1).acquire_timeout(Duration::from_millis(30)),
    )
    .await
    .unwrap();

    let _held = pool.get().await.unwrap();
    let err = pool.get().await.err().unwrap();
    assert!(err.is_timeout(), "{err}");
}

#[tokio::test]
async fn test_waiter_served_on_release() {
    let pool = Pool::new(TestManager::default(), config(1)).await.unwrap();
    let held = pool.get().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|c| c.id) })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!waiter.is_finished());

    let id = held.id;
    drop(held);
    assert_eq!(waiter.await.unwrap().unwrap(), id);
}

#[tokio::test]
async fn test_broken_connection_discarded() {
    let manager = TestManager::default();
    let counters = Arc::clone(&manager.counters);
    let pool = Pool::new(manager, config(2)).await.unwrap();

    let mut conn = pool.get().await.unwrap();
    conn.broken = true;
    drop(conn);
    assert_eq!(pool.status().total, 0);
    assert_eq!(counters.live.load(Ordering::SeqCst), 0);

    let conn = pool.get().await.unwrap();
    conn.discard();
    assert_eq!(pool.status().total, 0);
    assert_eq!(counters.created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_connect_failure_frees_slot() {
    let manager = TestManager::default();
    manager.counters.fail_next.store(true, Ordering::SeqCst);
    let pool = Pool::new(manager, config(1)).await.unwrap();

    assert!(matches!(pool.get().await, Err(PoolError::Connection(_))));
    assert_eq!(pool.status().total, 0);
    assert!(pool.get().await.is_ok());
}

#[tokio::test]
async fn test_invalid_idle_connection_replaced() {
    let manager = TestManager::default();
    let counters = Arc::clone(&manager.counters);
    let pool = Pool::new(manager, config(1).test_on_checkout(true))
        .await
        .unwrap();

    let mut conn = pool.get().await.unwrap();
    conn.valid = false;
    let stale = conn.id;
    drop(conn);

    let fresh = pool.get().await.unwrap();
    assert_ne!(fresh.id, stale);
    assert_eq!(counters.live.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_min_connections_and_reaping() {
    let manager = TestManager::default();
    let pool = Pool::new(
        manager,
        config(4)
            .min_connections(1)
            .idle_timeout(Duration::ZERO),
    )
    .await
    .unwrap();
    assert_eq!(pool.status().available, 1);

    let a = pool.get().await.unwrap();
    let b = pool.get().await.unwrap();
    let c = pool.get().await.unwrap();
    drop((a, b, c));
    assert_eq!(pool.status().available, 3);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(pool.reap(), 2);
    assert_eq!(pool.status().total, 1);
}

#[tokio::test]
async fn test_try_get() {
    let pool = Pool::new(TestManager::default(), config(1)).await.unwrap();
    assert!(pool.try_get().unwrap().is_none());

    drop(pool.get().await.unwrap());
    let conn = pool.try_get().unwrap();
    assert!(conn.is_some());
    assert!(pool.try_get().unwrap().is_none());
}

#[tokio::test]
async fn test_close_wakes_waiters() {
    let manager = TestManager::default();
    let counters = Arc::clone(&manager.counters);
    let pool = Pool::new(manager, config(1)).await.unwrap();
    let held = pool.get().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|c| c.id) })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    pool.close().await;
    assert!(pool.is_closed());
    assert!(matches!(waiter.await.unwrap(), Err(PoolError::PoolClosed)));
    assert!(matches!(pool.get().await, Err(PoolError::PoolClosed)));

    drop(held);
    assert_eq!(counters.live.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let result = Pool::new(TestManager::default(), config(2).min_connections(3)).await;
    assert!(matches!(result, Err(PoolError::Configuration(_))));
}
