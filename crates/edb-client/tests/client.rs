//! Client integration tests against the in-process mock server.
//!
//! Every test starts its own `MockServer` on an ephemeral port, so they run
//! in parallel without a real database.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use edb_client::{
    Client, ConnectOptions, Connection, Error, ErrorCategory, QueryArgs, SecurityMode, Value,
};
use edb_protocol::{ProtocolVersion, error_code, scalars};
use edb_testing::fixtures::{self, named_args, positional_args};
use edb_testing::{CommandKind, MockResponse, MockResult, MockServer};
use uuid::Uuid;

// =============================================================================
// Helpers
// =============================================================================

fn options(server: &MockServer) -> ConnectOptions {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    ConnectOptions::new()
        .host(server.host())
        .port(server.port())
        .database(server.database())
        .security_mode(SecurityMode::Insecure)
}

fn rows(values: &[i64]) -> MockResponse {
    MockResponse::Result(MockResult::int64(values).unwrap())
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_query_scalars() {
    let server = MockServer::builder()
        .with_response("select {1, 2, 3}", rows(&[1, 2, 3]))
        .with_response(
            "select {'a', 'b'}",
            MockResponse::Result(MockResult::strings(&["a", "b"]).unwrap()),
        )
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    let ints = client.query("select {1, 2, 3}", &QueryArgs::none()).await.unwrap();
    assert_eq!(ints, vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]);

    let strs = client.query("select {'a', 'b'}", &QueryArgs::none()).await.unwrap();
    assert_eq!(strs, vec![Value::Str("a".into()), Value::Str("b".into())]);
}

#[tokio::test]
async fn test_query_objects() {
    let alice = Uuid::from_u128(1);
    let server = MockServer::builder()
        .with_response(
            "select User { name, email }",
            MockResponse::Result(
                fixtures::users(&[
                    fixtures::user(alice, "Alice", Some("alice@example.com")),
                    fixtures::user(Uuid::from_u128(2), "Bob", None),
                ])
                .unwrap(),
            ),
        )
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    let users = client
        .query("select User { name, email }", &QueryArgs::none())
        .await
        .unwrap();
    assert_eq!(users.len(), 2);

    let Value::Object(first) = &users[0] else {
        panic!("expected an object, got {:?}", users[0]);
    };
    assert_eq!(first.get("id"), Some(&Value::Uuid(alice)));
    assert_eq!(first.get("name"), Some(&Value::Str("Alice".into())));

    let Value::Object(second) = &users[1] else {
        panic!("expected an object, got {:?}", users[1]);
    };
    assert_eq!(second.get("email"), Some(&Value::Nothing));
}

#[tokio::test]
async fn test_query_single_cardinality() {
    let server = MockServer::builder()
        .with_response("select 42", rows(&[42]))
        .with_response("select {1, 2}", rows(&[1, 2]))
        .with_response("select <int64>{}", rows(&[]))
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();
    let none = QueryArgs::none();

    let answer: i64 = client.query_single_as("select 42", &none).await.unwrap();
    assert_eq!(answer, 42);

    let err = client.query_single("select {1, 2}", &none).await.unwrap_err();
    assert!(matches!(err, Error::ResultCardinality(2)), "got {err:?}");

    let err = client.query_single("select <int64>{}", &none).await.unwrap_err();
    assert!(matches!(err, Error::ResultCardinality(0)), "got {err:?}");
}

#[tokio::test]
async fn test_query_json() {
    let server = MockServer::builder()
        .with_response(
            "select User { name }",
            MockResponse::Result(MockResult::json(r#"[{"name": "Alice"}]"#).unwrap()),
        )
        .with_response(
            "select User { name } limit 1",
            MockResponse::Result(MockResult::json(r#"{"name": "Alice"}"#).unwrap()),
        )
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();
    let none = QueryArgs::none();

    let doc = client.query_json("select User { name }", &none).await.unwrap();
    assert_eq!(doc, r#"[{"name": "Alice"}]"#);

    let doc = client
        .query_single_json("select User { name } limit 1", &none)
        .await
        .unwrap();
    assert_eq!(doc, r#"{"name": "Alice"}"#);

    let recorded = server.commands();
    assert!(
        recorded
            .iter()
            .all(|c| c.output_format == edb_client::OutputFormat::Json)
    );
}

#[tokio::test]
async fn test_positional_and_named_arguments() {
    let (positional_id, positional_block) = positional_args(&[scalars::INT64, scalars::STR]);
    let (named_id, named_block) = named_args(&[("name", scalars::STR)]);
    let server = MockServer::builder()
        .with_response(
            "select <int64>$0 + len(<str>$1)",
            MockResponse::Result(
                MockResult::int64(&[6])
                    .unwrap()
                    .with_input(positional_id, positional_block),
            ),
        )
        .with_response(
            "select <str>$name",
            MockResponse::Result(
                MockResult::strings(&["Alice"])
                    .unwrap()
                    .with_input(named_id, named_block),
            ),
        )
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    let sum: i64 = client
        .query_single_as("select <int64>$0 + len(<str>$1)", &(3_i64, "abc").into())
        .await
        .unwrap();
    assert_eq!(sum, 6);

    let name: String = client
        .query_single_as("select <str>$name", &QueryArgs::named([("name", "Alice")]))
        .await
        .unwrap();
    assert_eq!(name, "Alice");

    let executes: Vec<_> = server
        .commands()
        .into_iter()
        .filter(|c| c.kind == CommandKind::Execute)
        .collect();
    assert_eq!(executes.len(), 2);
    assert!(executes.iter().all(|c| !c.arguments.is_empty()));
}

#[tokio::test]
async fn test_wrong_argument_count_is_rejected_locally() {
    let (id, block) = positional_args(&[scalars::INT64]);
    let server = MockServer::builder()
        .with_response(
            "select <int64>$0",
            MockResponse::Result(MockResult::int64(&[1]).unwrap().with_input(id, block)),
        )
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    let err = client
        .query("select <int64>$0", &(1_i64, 2_i64).into())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Encode(_) | Error::Type(_)), "got {err:?}");
    assert!(server.executed().is_empty());
}

#[tokio::test]
async fn test_server_error_is_reported() {
    let server = MockServer::builder()
        .with_response(
            "insert User",
            MockResponse::error(error_code::INTEGRITY, "missing value for required property"),
        )
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    let err = client.execute("insert User", &QueryArgs::none()).await.unwrap_err();
    assert_eq!(err.server_code(), Some(error_code::INTEGRITY));
    assert_eq!(err.category(), ErrorCategory::Query);
    assert!(!err.is_transient());
    let server_error = err.as_server_error().unwrap();
    assert!(server_error.message.contains("required property"));

    // The connection survives a query error.
    let err = client.query("selct", &QueryArgs::none()).await.unwrap_err();
    assert_eq!(err.server_code(), Some(error_code::INVALID_SYNTAX));
    assert_eq!(server.total_connections(), 1);
}

// =============================================================================
// Statement and type caches
// =============================================================================

#[tokio::test]
async fn test_statement_cache_skips_parse() {
    let server = MockServer::builder()
        .with_response("select 1", rows(&[1]))
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    for _ in 0..3 {
        let value = client.query_single("select 1", &QueryArgs::none()).await.unwrap();
        assert_eq!(value, Value::Int64(1));
    }
    assert_eq!(server.parse_count("select 1"), 1);
    assert_eq!(server.executed().len(), 3);

    client
        .with_connection(async |conn: &mut Connection| {
            assert_eq!(conn.statement_cache().hits(), 2);
            assert_eq!(conn.statement_cache().misses(), 1);
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_stale_type_cache_is_rebuilt() {
    let server = MockServer::builder()
        .with_response(
            "select 1",
            MockResponse::sequence(vec![
                MockResponse::error(error_code::STATE_MISMATCH, "type descriptors changed"),
                rows(&[1]),
            ]),
        )
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    let value = client.query_single("select 1", &QueryArgs::none()).await.unwrap();
    assert_eq!(value, Value::Int64(1));
    assert_eq!(server.parse_count("select 1"), 2);
    assert_eq!(server.total_connections(), 1);
}

#[tokio::test]
async fn test_stale_type_cache_retried_once() {
    let server = MockServer::builder()
        .with_response(
            "select 1",
            MockResponse::sequence(vec![
                MockResponse::error(error_code::STATE_MISMATCH, "type descriptors changed"),
                MockResponse::error(error_code::STATE_MISMATCH, "type descriptors changed"),
                rows(&[1]),
            ]),
        )
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();

    let err = client.query_single("select 1", &QueryArgs::none()).await.unwrap_err();
    assert_eq!(err.server_code(), Some(error_code::STATE_MISMATCH));
    assert_eq!(server.executed().len(), 2);
}

// =============================================================================
// Connection lifecycle
// =============================================================================

#[tokio::test]
async fn test_empty_options_fail_with_configuration_error() {
    let client = Client::new(ConnectOptions::new()).await.unwrap();
    let err = client.query("select 1", &QueryArgs::none()).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(err.to_string().contains("no connection options specified"));
}

#[tokio::test]
async fn test_connection_refused() {
    let server = MockServer::builder().build().await.unwrap();
    let port = server.port();
    drop(server);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut conn = Connection::new(
        ConnectOptions::new()
            .host("127.0.0.1")
            .port(port)
            .security_mode(SecurityMode::Insecure)
            .connect_timeout(Duration::from_secs(1))
            .resolve()
            .unwrap(),
    );
    let err = conn.ensure_connected().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Connection);
    assert_eq!(conn.state(), edb_client::ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_timeout() {
    let server = MockServer::builder()
        .with_handshake_delay(Duration::from_millis(500))
        .build()
        .await
        .unwrap();
    let mut conn = Connection::new(
        options(&server)
            .connect_timeout(Duration::from_millis(50))
            .resolve()
            .unwrap(),
    );

    let err = conn.ensure_connected().await.unwrap_err();
    assert!(matches!(err, Error::ConnectionTimeout), "got {err:?}");
    assert_eq!(conn.state(), edb_client::ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_negotiated_minor_version_accepted() {
    let server = MockServer::builder()
        .with_protocol_version(ProtocolVersion::new(1, 3))
        .with_response("select 1", rows(&[1]))
        .build()
        .await
        .unwrap();
    let mut conn = Connection::open(options(&server).resolve().unwrap()).await.unwrap();
    assert_eq!(conn.protocol_version(), Some(ProtocolVersion::new(1, 3)));
    assert_eq!(conn.query("select 1", &QueryArgs::none()).await.unwrap(), vec![Value::Int64(1)]);
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_unsupported_major_version_rejected() {
    let server = MockServer::builder()
        .with_protocol_version(ProtocolVersion::new(2, 0))
        .build()
        .await
        .unwrap();
    let err = Connection::open(options(&server).resolve().unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Connection);
    assert!(err.to_string().contains("not supported"));
}

#[tokio::test]
async fn test_disconnect_mid_command_discards_connection() {
    let server = MockServer::builder()
        .with_response("select 1", rows(&[1]))
        .with_response("select crash", MockResponse::Disconnect)
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server).max_pool_size(1)).await.unwrap();

    client.query("select 1", &QueryArgs::none()).await.unwrap();
    let err = client.query("select crash", &QueryArgs::none()).await.unwrap_err();
    assert!(err.is_fatal(), "got {err:?}");

    // The next checkout reconnects.
    client.query("select 1", &QueryArgs::none()).await.unwrap();
    assert_eq!(server.total_connections(), 2);
}

#[tokio::test]
async fn test_command_timeout_discards_connection() {
    let server = MockServer::builder()
        .with_response("select 1", rows(&[1]))
        .with_response(
            "select sleep",
            MockResponse::delayed(Duration::from_millis(500), rows(&[1])),
        )
        .build()
        .await
        .unwrap();
    let client = Client::new(
        options(&server)
            .max_pool_size(1)
            .command_timeout(Duration::from_millis(50)),
    )
    .await
    .unwrap();

    let err = client.query("select sleep", &QueryArgs::none()).await.unwrap_err();
    assert!(matches!(err, Error::CommandTimeout), "got {err:?}");

    client.query("select 1", &QueryArgs::none()).await.unwrap();
    assert_eq!(server.total_connections(), 2);
}

#[tokio::test]
async fn test_close_connection() {
    let server = MockServer::builder()
        .with_response("select 1", rows(&[1]))
        .build()
        .await
        .unwrap();
    let mut conn = Connection::open(options(&server).resolve().unwrap()).await.unwrap();
    assert!(conn.state().is_usable());
    conn.query("select 1", &QueryArgs::none()).await.unwrap();

    conn.close().await.unwrap();
    assert_eq!(conn.state(), edb_client::ConnectionState::Disconnected);

    // A closed connection reconnects on demand.
    conn.query("select 1", &QueryArgs::none()).await.unwrap();
    assert_eq!(server.total_connections(), 2);
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_scram_authentication() {
    let server = MockServer::builder()
        .with_password("admin", "s3cret")
        .with_response("select 1", rows(&[1]))
        .build()
        .await
        .unwrap();

    let client = Client::new(options(&server).user("admin").password("s3cret"))
        .await
        .unwrap();
    assert_eq!(
        client.query_single("select 1", &QueryArgs::none()).await.unwrap(),
        Value::Int64(1)
    );

    let client = Client::new(options(&server).user("admin").password("wrong"))
        .await
        .unwrap();
    let err = client.ensure_connected().await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Authentication);
}

#[tokio::test]
async fn test_secret_key_authentication() {
    let server = MockServer::builder()
        .with_secret_key("nbwt1_token")
        .with_response("select 1", rows(&[1]))
        .build()
        .await
        .unwrap();

    let client = Client::new(options(&server).secret_key("nbwt1_token")).await.unwrap();
    client.ensure_connected().await.unwrap();

    let client = Client::new(options(&server).secret_key("nbwt1_other")).await.unwrap();
    let err = client.query("select 1", &QueryArgs::none()).await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Authentication);
    assert!(matches!(err, Error::Authentication(_)));
}

#[tokio::test]
async fn test_unknown_database_rejected() {
    let server = MockServer::builder()
        .with_database("main")
        .build()
        .await
        .unwrap();
    let err = Client::new(options(&server).database("other"))
        .await
        .unwrap()
        .ensure_connected()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not exist"), "got {err}");
}

// =============================================================================
// Pool
// =============================================================================

#[tokio::test]
async fn test_pool_never_exceeds_max_size() {
    let server = MockServer::builder()
        .with_response(
            "select slow",
            MockResponse::delayed(Duration::from_millis(50), rows(&[1])),
        )
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server).max_pool_size(2)).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.query("select slow", &QueryArgs::none()).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(server.total_connections() <= 2);
    assert_eq!(server.executed().len(), 8);
    assert!(client.status().total <= 2);
}

#[tokio::test]
async fn test_with_connection_returns_connection() {
    let server = MockServer::builder()
        .with_response("select 1", rows(&[1]))
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server).max_pool_size(1)).await.unwrap();

    let value = client
        .with_connection(async |conn: &mut Connection| conn.query_single("select 1", &QueryArgs::none()).await)
        .await
        .unwrap();
    assert_eq!(value, Value::Int64(1));
    assert_eq!(client.status().available, 1);

    // An error inside the closure still returns the connection.
    let err = client
        .with_connection(async |conn: &mut Connection| conn.query("selct", &QueryArgs::none()).await)
        .await
        .unwrap_err();
    assert_eq!(err.server_code(), Some(error_code::INVALID_SYNTAX));
    client.query("select 1", &QueryArgs::none()).await.unwrap();
    assert_eq!(server.total_connections(), 1);
}

#[tokio::test]
async fn test_closed_client_rejects_operations() {
    let server = MockServer::builder()
        .with_response("select 1", rows(&[1]))
        .build()
        .await
        .unwrap();
    let client = Client::new(options(&server)).await.unwrap();
    client.query("select 1", &QueryArgs::none()).await.unwrap();

    client.close().await;
    assert!(client.is_closed());
    let err = client.query("select 1", &QueryArgs::none()).await.unwrap_err();
    assert!(matches!(err, Error::PoolClosed), "got {err:?}");
}
