//! HTTP transport tests against the mock server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use edb_client::{
    Client, ConnectOptions, Connection, ConnectionState, ErrorCategory, QueryArgs, SecurityMode,
    TransportKind, Value,
};
use edb_protocol::error_code;
use edb_testing::{MockResponse, MockResult, MockServer};

fn options(server: &MockServer) -> ConnectOptions {
    ConnectOptions::new()
        .host(server.host())
        .port(server.port())
        .database(server.database())
        .security_mode(SecurityMode::Insecure)
        .transport(TransportKind::Http)
}

fn rows(values: &[i64]) -> MockResponse {
    MockResponse::Result(MockResult::int64(values).unwrap())
}

#[tokio::test]
async fn test_http_query_with_trust() {
    let server = MockServer::builder()
        .with_response("select {1, 2}", rows(&[1, 2]))
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    let values = client.query("select {1, 2}", &QueryArgs::none()).await.unwrap();
    assert_eq!(values, vec![Value::Int64(1), Value::Int64(2)]);

    let commands = server.commands();
    assert!(!commands.is_empty());
    assert!(commands.iter().all(|c| c.over_http));
}

#[tokio::test]
async fn test_http_open_performs_no_io() {
    let server = MockServer::builder().build().await.unwrap();
    let mut conn = Connection::new(options(&server).resolve().unwrap());

    conn.ensure_connected().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Idle);
    assert!(conn.protocol_version().is_none());
    assert_eq!(server.total_connections(), 0);
}

#[tokio::test]
async fn test_http_statement_cache() {
    let server = MockServer::builder()
        .with_response("select 7", rows(&[7]))
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server).max_pool_size(1)).await.unwrap();

    for _ in 0..2 {
        let value: i64 = client.query_single_as("select 7", &QueryArgs::none()).await.unwrap();
        assert_eq!(value, 7);
    }
    assert_eq!(server.parse_count("select 7"), 1);
    assert_eq!(server.executed().len(), 2);
}

#[tokio::test]
async fn test_http_secret_key() {
    let server = MockServer::builder()
        .with_secret_key("nbwt1_http")
        .with_response("select 1", rows(&[1]))
        .build()
        .await
        .unwrap();

    let client = Client::new(options(&server).secret_key("nbwt1_http")).await.unwrap();
    assert_eq!(
        client.query_single("select 1", &QueryArgs::none()).await.unwrap(),
        Value::Int64(1)
    );

    let client = Client::new(options(&server).secret_key("nbwt1_wrong")).await.unwrap();
    let err = client.query("select 1", &QueryArgs::none()).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Authentication);
}

#[tokio::test]
async fn test_http_scram_token() {
    let server = MockServer::builder()
        .with_password("admin", "s3cret")
        .with_response("select 1", rows(&[1]))
        .build()
        .await
        .unwrap();

    let client = Client::new(options(&server).user("admin").password("s3cret").max_pool_size(1))
        .await
        .unwrap();
    client.query("select 1", &QueryArgs::none()).await.unwrap();
    // The token is reused for later requests.
    client.query("select 1", &QueryArgs::none()).await.unwrap();
    assert_eq!(server.executed().len(), 2);

    let client = Client::new(options(&server).user("admin").password("wrong"))
        .await
        .unwrap();
    let err = client.query("select 1", &QueryArgs::none()).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Authentication);
    assert_eq!(server.executed().len(), 2);
}

#[tokio::test]
async fn test_http_server_error() {
    let server = MockServer::builder()
        .with_response(
            "select 1 / 0",
            MockResponse::error(error_code::EXECUTION, "division by zero"),
        )
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    let err = client.query("select 1 / 0", &QueryArgs::none()).await.unwrap_err();
    assert_eq!(err.server_code(), Some(error_code::EXECUTION));
    assert!(err.to_string().contains("division by zero"));
}

#[tokio::test]
async fn test_http_unreachable_host() {
    let server = MockServer::builder().build().await.unwrap();
    let port = server.port();
    drop(server);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let client = Client::new(
        ConnectOptions::new()
            .host("127.0.0.1")
            .port(port)
            .security_mode(SecurityMode::Insecure)
            .transport(TransportKind::Http),
    )
    .await
    .unwrap();
    // Opening succeeds; the first request fails.
    client.ensure_connected().await.unwrap();
    let err = client.query("select 1", &QueryArgs::none()).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Transient);
}
