//! Mock server fidelity tests.
//!
//! These tests drive the mock server with a raw framed connection, the way
//! a client would, and check the message flow it produces.
//!
//! ```bash
//! cargo test -p edb-testing --test mock_fidelity
//! ```

#![allow(clippy::unwrap_used, clippy::panic, missing_docs)]

use bytes::Bytes;
use edb_auth::{SCRAM_MECHANISM, ScramClient};
use edb_codec::FramedConnection;
use edb_protocol::{
    Authentication, ClientHandshake, ClientMessage, CommandParams, Execute, OutputFormat,
    ProtocolVersion, ServerMessage, TransactionState, TypeId, error_code, scalars,
};
use edb_testing::{CommandKind, MockResponse, MockResult, MockServer};
use tokio::net::TcpStream;

type Conn = FramedConnection<TcpStream>;

fn handshake(params: &[(&str, &str)]) -> ClientMessage {
    ClientMessage::Handshake(ClientHandshake {
        version: ProtocolVersion::V1_0,
        params: params
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect(),
        extensions: Vec::new(),
    })
}

async fn read_until_ready(conn: &mut Conn) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    loop {
        let message = conn.read_server_message().await.unwrap().unwrap();
        let done = matches!(message, ServerMessage::ReadyForCommand { .. });
        messages.push(message);
        if done {
            return messages;
        }
    }
}

async fn connect_trusted(server: &MockServer) -> Conn {
    let stream = TcpStream::connect(server.addr()).await.unwrap();
    let mut conn = FramedConnection::new(stream);
    conn.send_all([handshake(&[("user", "edgedb"), ("branch", "edgedb")])])
        .await
        .unwrap();
    let messages = read_until_ready(&mut conn).await;
    assert!(matches!(
        messages[0],
        ServerMessage::Authentication(Authentication::Ok)
    ));
    conn
}

fn execute(text: &str, output: TypeId) -> ClientMessage {
    ClientMessage::Execute(Execute {
        params: CommandParams::new(text),
        input_typedesc_id: TypeId::EMPTY_TUPLE,
        output_typedesc_id: output,
        arguments: Bytes::new(),
    })
}

#[tokio::test]
async fn test_trust_handshake_reaches_idle() {
    let server = MockServer::builder().build().await.unwrap();
    let _conn = connect_trusted(&server).await;
    assert_eq!(server.total_connections(), 1);
}

#[tokio::test]
async fn test_scram_handshake() {
    let server = MockServer::builder()
        .with_password("admin", "hunter2")
        .build()
        .await
        .unwrap();
    let stream = TcpStream::connect(server.addr()).await.unwrap();
    let mut conn = FramedConnection::new(stream);
    conn.send_all([handshake(&[("user", "admin"), ("branch", "edgedb")])])
        .await
        .unwrap();

    let Some(ServerMessage::Authentication(Authentication::Sasl { methods })) =
        conn.read_server_message().await.unwrap()
    else {
        panic!("expected SASL challenge");
    };
    assert_eq!(methods, vec![SCRAM_MECHANISM.to_owned()]);

    let mut scram = ScramClient::new("admin", "hunter2");
    conn.send_all([ClientMessage::SaslInitialResponse {
        method: SCRAM_MECHANISM.into(),
        data: Bytes::from(scram.client_first()),
    }])
    .await
    .unwrap();
    let Some(ServerMessage::Authentication(Authentication::SaslContinue { data })) =
        conn.read_server_message().await.unwrap()
    else {
        panic!("expected SASL continue");
    };
    let client_final = scram
        .handle_server_first(std::str::from_utf8(&data).unwrap())
        .unwrap();
    conn.send_all([ClientMessage::SaslResponse {
        data: Bytes::from(client_final),
    }])
    .await
    .unwrap();

    let messages = read_until_ready(&mut conn).await;
    let ServerMessage::Authentication(Authentication::SaslFinal { data }) = &messages[0] else {
        panic!("expected SASL final, got {messages:?}");
    };
    scram
        .verify_server_final(std::str::from_utf8(data).unwrap())
        .unwrap();
    assert!(matches!(
        messages[1],
        ServerMessage::Authentication(Authentication::Ok)
    ));
}

#[tokio::test]
async fn test_wrong_secret_key_rejected() {
    let server = MockServer::builder()
        .with_secret_key("nbwt1_good")
        .build()
        .await
        .unwrap();
    let stream = TcpStream::connect(server.addr()).await.unwrap();
    let mut conn = FramedConnection::new(stream);
    conn.send_all([handshake(&[("branch", "edgedb"), ("secret_key", "nbwt1_bad")])])
        .await
        .unwrap();

    let Some(ServerMessage::ErrorResponse(error)) = conn.read_server_message().await.unwrap()
    else {
        panic!("expected error response");
    };
    assert_eq!(error.code, error_code::AUTHENTICATION);
    assert!(error.is_fatal());
    assert!(conn.read_server_message().await.unwrap().is_none());
}

#[tokio::test]
async fn test_version_downgrade_announced() {
    let server = MockServer::builder()
        .with_protocol_version(ProtocolVersion::new(1, 0))
        .build()
        .await
        .unwrap();
    let stream = TcpStream::connect(server.addr()).await.unwrap();
    let mut conn = FramedConnection::new(stream);
    conn.send_all([ClientMessage::Handshake(ClientHandshake {
        version: ProtocolVersion::new(2, 0),
        params: vec![("branch".into(), "edgedb".into())],
        extensions: Vec::new(),
    })])
    .await
    .unwrap();

    let messages = read_until_ready(&mut conn).await;
    assert!(matches!(
        messages[0],
        ServerMessage::Handshake { version, .. } if version == ProtocolVersion::V1_0
    ));
}

#[tokio::test]
async fn test_execute_returns_description_and_rows() {
    let server = MockServer::builder()
        .with_response("select {1, 2}", MockResponse::Result(MockResult::int64(&[1, 2]).unwrap()))
        .build()
        .await
        .unwrap();
    let mut conn = connect_trusted(&server).await;

    conn.send_all([execute("select {1, 2}", TypeId::NULL), ClientMessage::Sync])
        .await
        .unwrap();
    let messages = read_until_ready(&mut conn).await;
    let names: Vec<_> = messages.iter().map(ServerMessage::name).collect();
    assert_eq!(
        names,
        [
            "CommandDataDescription",
            "Data",
            "Data",
            "CommandComplete",
            "ReadyForCommand"
        ]
    );

    // known output type: no description
    conn.send_all([execute("select {1, 2}", scalars::INT64), ClientMessage::Sync])
        .await
        .unwrap();
    let messages = read_until_ready(&mut conn).await;
    assert_eq!(messages.len(), 4);
    assert_eq!(server.executed(), ["select {1, 2}", "select {1, 2}"]);
}

#[tokio::test]
async fn test_error_skips_until_sync() {
    let server = MockServer::builder()
        .with_response("select 1", MockResponse::Result(MockResult::int64(&[1]).unwrap()))
        .build()
        .await
        .unwrap();
    let mut conn = connect_trusted(&server).await;

    conn.send_all([
        ClientMessage::Parse(CommandParams::new("select oops")),
        execute("select 1", TypeId::NULL),
        ClientMessage::Sync,
    ])
    .await
    .unwrap();
    let messages = read_until_ready(&mut conn).await;
    assert_eq!(messages.len(), 2);
    let ServerMessage::ErrorResponse(error) = &messages[0] else {
        panic!("expected error, got {messages:?}");
    };
    assert_eq!(error.code, error_code::INVALID_SYNTAX);
    assert!(server.executed().is_empty());
    assert_eq!(server.commands()[0].kind, CommandKind::Parse);
}

#[tokio::test]
async fn test_transaction_state_reported() {
    let server = MockServer::builder()
        .with_response("insert Fail", MockResponse::serialization_error())
        .build()
        .await
        .unwrap();
    let mut conn = connect_trusted(&server).await;

    let exec = |text: &str| {
        let mut params = CommandParams::new(text);
        params.output_format = OutputFormat::None;
        [
            ClientMessage::Execute(Execute {
                params,
                input_typedesc_id: TypeId::EMPTY_TUPLE,
                output_typedesc_id: TypeId::NULL,
                arguments: Bytes::new(),
            }),
            ClientMessage::Sync,
        ]
    };
    let state = |messages: &[ServerMessage]| match messages.last() {
        Some(ServerMessage::ReadyForCommand {
            transaction_state, ..
        }) => *transaction_state,
        other => panic!("expected ReadyForCommand, got {other:?}"),
    };

    conn.send_all(exec("start transaction")).await.unwrap();
    assert_eq!(state(&read_until_ready(&mut conn).await), TransactionState::InTransaction);
    conn.send_all(exec("insert Fail")).await.unwrap();
    assert_eq!(
        state(&read_until_ready(&mut conn).await),
        TransactionState::InFailedTransaction
    );
    conn.send_all(exec("rollback")).await.unwrap();
    assert_eq!(
        state(&read_until_ready(&mut conn).await),
        TransactionState::NotInTransaction
    );
}

#[tokio::test]
async fn test_disconnect_response_closes_connection() {
    let server = MockServer::builder()
        .with_response("select boom", MockResponse::Disconnect)
        .build()
        .await
        .unwrap();
    let mut conn = connect_trusted(&server).await;
    conn.send_all([execute("select boom", TypeId::NULL), ClientMessage::Sync])
        .await
        .unwrap();
    assert!(conn.read_server_message().await.unwrap().is_none());
}
