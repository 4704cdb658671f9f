//! Transaction and retry tests against the mock server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use edb_client::{
    Client, ConnectOptions, Error, ErrorCategory, IsolationLevel, QueryArgs, RetryPolicy,
    SecurityMode, TransactionOptions, TransportKind,
};
use edb_protocol::error_code;
use edb_testing::{MockResponse, MockResult, MockServer};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

fn options(server: &MockServer) -> ConnectOptions {
    ConnectOptions::new()
        .host(server.host())
        .port(server.port())
        .database(server.database())
        .security_mode(SecurityMode::Insecure)
        .retry(fast_retry(3))
}

fn fast_retry(attempts: u32) -> RetryPolicy {
    RetryPolicy::new()
        .max_attempts(attempts)
        .initial_backoff(Duration::from_millis(1))
        .max_backoff(Duration::from_millis(5))
        .jitter(false)
}

fn counter(value: i64) -> MockResponse {
    MockResponse::Result(MockResult::int64(&[value]).unwrap())
}

/// TCP relay in front of the mock server.
///
/// Connections whose 1-based accept number is in `refused` are closed
/// right after accept. `sever` closes every relayed connection.
struct Relay {
    port: u16,
    accepted: Arc<AtomicUsize>,
    sever: broadcast::Sender<()>,
}

impl Relay {
    async fn start(target: SocketAddr, refused: &'static [usize]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (sever, _) = broadcast::channel(1);

        let count = Arc::clone(&accepted);
        let severed = sever.clone();
        tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                let n = count.fetch_add(1, Ordering::SeqCst) + 1;
                if refused.contains(&n) {
                    drop(inbound);
                    continue;
                }
                let mut severed = severed.subscribe();
                tokio::spawn(async move {
                    let Ok(mut outbound) = TcpStream::connect(target).await else {
                        return;
                    };
                    tokio::select! {
                        _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound) => {}
                        _ = severed.recv() => {}
                    }
                });
            }
        });

        Self {
            port,
            accepted,
            sever,
        }
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    async fn sever(&self) {
        let _ = self.sever.send(());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_transaction_commits() {
    let server = MockServer::builder()
        .with_response("insert Account", MockResponse::complete("INSERT"))
        .with_response("select count(Account)", counter(1))
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    let count: i64 = client
        .transaction(async |tx| {
            tx.execute("insert Account", &QueryArgs::none()).await?;
            tx.query_single_as("select count(Account)", &QueryArgs::none()).await
        })
        .await
        .unwrap();
    assert_eq!(count, 1);

    assert_eq!(
        server.executed(),
        vec![
            "start transaction isolation serializable, read write",
            "insert Account",
            "select count(Account)",
            "commit",
        ]
    );
}

#[tokio::test]
async fn test_transaction_options_in_start_statement() {
    let server = MockServer::builder()
        .with_response("select 1", counter(1))
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    let options = TransactionOptions::new()
        .isolation(IsolationLevel::RepeatableRead)
        .read_only(true);
    client
        .transaction_with(options, async |tx| tx.query("select 1", &QueryArgs::none()).await)
        .await
        .unwrap();
    assert_eq!(
        server.executed()[0],
        "start transaction isolation repeatable read, read only"
    );
}

#[tokio::test]
async fn test_transaction_retries_serialization_failure() {
    let server = MockServer::builder()
        .with_response(
            "select balance",
            MockResponse::sequence(vec![MockResponse::serialization_error(), counter(90)]),
        )
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    let mut calls = 0;
    let balance: i64 = client
        .transaction(async |tx| {
            calls += 1;
            tx.query_single_as("select balance", &QueryArgs::none()).await
        })
        .await
        .unwrap();
    assert_eq!(balance, 90);
    assert_eq!(calls, 2);

    let executed = server.executed();
    assert_eq!(executed.iter().filter(|t| t.starts_with("start transaction")).count(), 2);
    assert_eq!(executed.iter().filter(|t| *t == "rollback").count(), 1);
    assert_eq!(executed.iter().filter(|t| *t == "commit").count(), 1);
}

#[tokio::test]
async fn test_transaction_retries_exhausted() {
    let server = MockServer::builder()
        .with_response(
            "select balance",
            MockResponse::serialization_error(),
        )
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    let mut calls = 0;
    let err = client
        .transaction(async |tx| {
            calls += 1;
            tx.query("select balance", &QueryArgs::none()).await
        })
        .await
        .unwrap_err();
    assert_eq!(calls, 3);
    assert_eq!(err.server_code(), Some(error_code::TRANSACTION_SERIALIZATION));
    assert_eq!(err.category(), ErrorCategory::Transient);
}

#[tokio::test]
async fn test_non_transient_error_is_not_retried() {
    let server = MockServer::builder()
        .with_response(
            "insert Account",
            MockResponse::error(error_code::INTEGRITY, "violates exclusivity constraint"),
        )
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    let mut calls = 0;
    let err = client
        .transaction(async |tx| {
            calls += 1;
            tx.execute("insert Account", &QueryArgs::none()).await
        })
        .await
        .unwrap_err();
    assert_eq!(calls, 1);
    assert_eq!(err.server_code(), Some(error_code::INTEGRITY));
    assert!(server.executed().contains(&"rollback".to_owned()));
    assert!(!server.executed().contains(&"commit".to_owned()));
}

#[tokio::test]
async fn test_closure_error_rolls_back() {
    let server = MockServer::builder()
        .with_response("insert Account", MockResponse::complete("INSERT"))
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server).max_pool_size(1)).await.unwrap();

    let err = client
        .transaction(async |tx| -> edb_client::Result<()> {
            tx.execute("insert Account", &QueryArgs::none()).await?;
            Err(Error::Transaction("insufficient funds".into()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Transaction(_)));
    assert_eq!(server.executed().last().map(String::as_str), Some("rollback"));

    // The connection left the transaction and was returned to the pool.
    assert_eq!(client.status().available, 1);
}

#[tokio::test]
async fn test_transactions_unavailable_over_http() {
    let server = MockServer::builder().build().await.unwrap();
    let client = Client::new(options(&server).transport(TransportKind::Http))
        .await
        .unwrap();

    let err = client
        .transaction(async |tx| tx.query("select 1", &QueryArgs::none()).await)
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(server.commands().is_empty());
}

#[tokio::test]
async fn test_transaction_retries_failed_connect() {
    let server = MockServer::builder()
        .with_response("select 1", counter(1))
        .build()
        .await
        .unwrap();
    let relay = Relay::start(server.addr(), &[1]).await;
    let client = Client::new(options(&server).port(relay.port)).await.unwrap();

    let mut calls = 0;
    let value: i64 = client
        .transaction(async |tx| {
            calls += 1;
            tx.query_single_as("select 1", &QueryArgs::none()).await
        })
        .await
        .unwrap();
    assert_eq!(value, 1);
    // The first attempt never reached the body.
    assert_eq!(calls, 1);
    assert_eq!(relay.accepted(), 2);
    assert_eq!(server.total_connections(), 1);
}

#[tokio::test]
async fn test_transaction_retries_failed_reconnect() {
    let server = MockServer::builder()
        .with_response(
            "select 1",
            MockResponse::sequence(vec![MockResponse::Disconnect, counter(1)]),
        )
        .build()
        .await
        .unwrap();
    // The reconnect after the dropped session is refused once.
    let relay = Relay::start(server.addr(), &[2]).await;
    let client = Client::new(options(&server).port(relay.port).max_pool_size(1))
        .await
        .unwrap();

    let mut calls = 0;
    let value: i64 = client
        .transaction(async |tx| {
            calls += 1;
            tx.query_single_as("select 1", &QueryArgs::none()).await
        })
        .await
        .unwrap();
    assert_eq!(value, 1);
    assert_eq!(calls, 2);
    assert_eq!(relay.accepted(), 3);
    assert_eq!(server.executed().last().map(String::as_str), Some("commit"));
}

#[tokio::test]
async fn test_transaction_replaces_stale_pooled_connection() {
    let server = MockServer::builder()
        .with_response("select 1", counter(1))
        .build()
        .await
        .unwrap();
    let relay = Relay::start(server.addr(), &[]).await;
    let client = Client::new(options(&server).port(relay.port).max_pool_size(1))
        .await
        .unwrap();

    client.query("select 1", &QueryArgs::none()).await.unwrap();
    assert_eq!(client.status().available, 1);
    // The idle connection still looks usable but its socket is gone.
    relay.sever().await;

    let mut calls = 0;
    let value: i64 = client
        .transaction(async |tx| {
            calls += 1;
            tx.query_single_as("select 1", &QueryArgs::none()).await
        })
        .await
        .unwrap();
    assert_eq!(value, 1);
    assert_eq!(calls, 1);
    assert_eq!(relay.accepted(), 2);

    let executed = server.executed();
    assert_eq!(executed.iter().filter(|t| *t == "commit").count(), 1);
    assert_eq!(client.status().available, 1);
}
