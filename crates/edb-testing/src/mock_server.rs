//! Mock EdgeDB server for unit testing.
//!
//! The server speaks the binary protocol over plain TCP and the HTTP
//! transport on the same port (the first byte of a connection decides which).
//! Responses are scripted per command text.
//!
//! ## Features
//!
//! - Handshake with optional protocol version override
//! - Trust, secret key or SCRAM-SHA-256 authentication
//! - `Parse` / `Execute` / `Sync` with type descriptors and encoded rows
//! - Error injection, response sequences, delays and abrupt disconnects
//! - Transaction state tracking in `ReadyForCommand`
//! - Recording of every command the clients sent
//!
//! ## Example
//!
//! ```rust,ignore
//! use edb_testing::{MockResponse, MockResult, MockServer};
//!
//! let server = MockServer::builder()
//!     .with_response("select 1", MockResponse::Result(MockResult::int64(&[1])?))
//!     .build()
//!     .await?;
//! // Connect a client to server.addr()...
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use edb_auth::{SCRAM_MECHANISM, ScramServer};
use edb_codec::{CodecError, FramedConnection};
use edb_protocol::descriptors::DescriptorBlockBuilder;
use edb_protocol::{
    Authentication, Capabilities, Cardinality, ClientHandshake, ClientMessage, CommandComplete,
    CommandDataDescription, CommandParams, ErrorResponse, OutputFormat, ProtocolError,
    ProtocolVersion, ServerMessage, TransactionState, TypeId, error_code, scalars,
};
use edb_types::{CodecCache, Value};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Salt used for SCRAM verifiers.
pub(crate) const SCRAM_SALT: &[u8] = b"edb-mock-salt";
/// PBKDF2 iterations used for SCRAM verifiers.
pub(crate) const SCRAM_ITERATIONS: u32 = 4096;

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A scripted response could not be built.
    #[error("invalid fixture: {0}")]
    Fixture(String),

    /// The client sent something the server did not expect.
    #[error("unexpected client behavior: {0}")]
    Unexpected(String),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// A successful command result: type descriptions plus encoded rows.
#[derive(Debug, Clone)]
pub struct MockResult {
    input_id: TypeId,
    input_block: Bytes,
    output_id: TypeId,
    output_block: Bytes,
    cardinality: Cardinality,
    capabilities: Capabilities,
    rows: Vec<Bytes>,
    status: String,
}

impl MockResult {
    /// A result of `values`, encoded with the type `output_id` described by
    /// `output_block`.
    pub fn new(output_id: TypeId, output_block: Bytes, values: &[Value]) -> Result<Self> {
        let mut cache = CodecCache::new();
        cache.ingest(&output_block)?;
        let codec = cache.codec_for(output_id)?;
        let mut rows = Vec::with_capacity(values.len());
        for value in values {
            let mut buf = BytesMut::new();
            codec
                .encode(&mut buf, value)
                .map_err(|e| MockServerError::Fixture(e.to_string()))?;
            rows.push(buf.freeze());
        }
        Ok(Self {
            input_id: TypeId::EMPTY_TUPLE,
            input_block: Bytes::new(),
            output_id,
            output_block,
            cardinality: Cardinality::Many,
            capabilities: Capabilities::empty(),
            rows,
            status: "SELECT".into(),
        })
    }

    /// A result of base scalar values.
    pub fn scalars(scalar: TypeId, values: &[Value]) -> Result<Self> {
        let block = DescriptorBlockBuilder::new().base_scalar(scalar).build()?;
        Self::new(scalar, block, values)
    }

    /// A result of `int64` values.
    pub fn int64(values: &[i64]) -> Result<Self> {
        let values: Vec<Value> = values.iter().copied().map(Value::Int64).collect();
        Self::scalars(scalars::INT64, &values)
    }

    /// A result of `str` values.
    pub fn strings(values: &[&str]) -> Result<Self> {
        let values: Vec<Value> = values.iter().map(|s| Value::Str((*s).to_owned())).collect();
        Self::scalars(scalars::STR, &values)
    }

    /// A JSON-format result: one `str` row holding the document.
    pub fn json(document: &str) -> Result<Self> {
        Ok(Self::strings(&[document])?.with_cardinality(Cardinality::One))
    }

    /// A command without output, such as `insert` without a shape.
    #[must_use]
    pub fn complete(status: impl Into<String>) -> Self {
        Self {
            input_id: TypeId::EMPTY_TUPLE,
            input_block: Bytes::new(),
            output_id: TypeId::NULL,
            output_block: Bytes::new(),
            cardinality: Cardinality::NoResult,
            capabilities: Capabilities::empty(),
            rows: Vec::new(),
            status: status.into(),
        }
    }

    /// Declare the argument type.
    #[must_use]
    pub fn with_input(mut self, id: TypeId, block: Bytes) -> Self {
        self.input_id = id;
        self.input_block = block;
        self
    }

    /// Declare the result cardinality.
    #[must_use]
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Declare the capabilities the command uses.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the `CommandComplete` status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Output type id.
    #[must_use]
    pub fn output_id(&self) -> TypeId {
        self.output_id
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn description(&self) -> CommandDataDescription {
        CommandDataDescription {
            annotations: Vec::new(),
            capabilities: self.capabilities,
            result_cardinality: self.cardinality,
            input_typedesc_id: self.input_id,
            input_typedesc: self.input_block.clone(),
            output_typedesc_id: self.output_id,
            output_typedesc: self.output_block.clone(),
        }
    }
}

/// A response sequence; each execution advances to the next element and
/// the last one repeats.
pub struct Sequence {
    responses: Vec<MockResponse>,
    cursor: AtomicUsize,
}

impl Sequence {
    fn current_index(&self) -> usize {
        self.cursor
            .load(Ordering::SeqCst)
            .min(self.responses.len().saturating_sub(1))
    }

    /// Number of executions served so far.
    #[must_use]
    pub fn served(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// Describe and return rows.
    Result(MockResult),

    /// Fail with a server error.
    Error(ErrorResponse),

    /// Successive responses for successive executions.
    Sequence(Arc<Sequence>),

    /// Wait before answering `Execute`.
    Delayed(Duration, Box<MockResponse>),

    /// Drop the connection without answering.
    Disconnect,

    /// Compute the response from the command.
    Custom(Arc<dyn Fn(&CommandParams) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Result(r) => f.debug_tuple("Result").field(r).finish(),
            Self::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Self::Sequence(seq) => f
                .debug_struct("Sequence")
                .field("responses", &seq.responses)
                .field("served", &seq.served())
                .finish(),
            Self::Delayed(d, inner) => f.debug_tuple("Delayed").field(d).field(inner).finish(),
            Self::Disconnect => f.write_str("Disconnect"),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

/// What the server does for one message, after scripts are resolved.
enum Reply {
    Result(MockResult),
    Error(ErrorResponse),
    Disconnect,
}

impl MockResponse {
    /// A server error with the given code.
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Self::Error(ErrorResponse::new(code, message))
    }

    /// A transaction serialization failure.
    pub fn serialization_error() -> Self {
        Self::error(
            error_code::TRANSACTION_SERIALIZATION,
            "could not serialize access due to concurrent update",
        )
    }

    /// A command without output.
    pub fn complete(status: impl Into<String>) -> Self {
        Self::Result(MockResult::complete(status))
    }

    /// Successive responses; the last one repeats.
    pub fn sequence(responses: Vec<MockResponse>) -> Self {
        Self::Sequence(Arc::new(Sequence {
            responses,
            cursor: AtomicUsize::new(0),
        }))
    }

    /// Delay `inner` by `delay`.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delayed(delay, Box::new(inner))
    }

    /// Compute responses with a closure.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&CommandParams) -> MockResponse + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// The reply to `Parse`, without consuming sequence elements.
    ///
    /// A sequence that starts with errors is described by its first result,
    /// so failures surface at execution time.
    fn describe(&self, params: &CommandParams) -> Reply {
        match self {
            Self::Result(r) => Reply::Result(r.clone()),
            Self::Error(e) => Reply::Error(e.clone()),
            Self::Disconnect => Reply::Disconnect,
            Self::Delayed(_, inner) => inner.describe(params),
            Self::Custom(f) => f(params).describe(params),
            Self::Sequence(seq) => {
                let start = seq.current_index();
                let mut first = None;
                for response in seq.responses.iter().skip(start) {
                    match response.describe(params) {
                        Reply::Result(r) => return Reply::Result(r),
                        other => {
                            first.get_or_insert(other);
                        }
                    }
                }
                first.unwrap_or_else(|| {
                    Reply::Error(ErrorResponse::new(error_code::INTERNAL_SERVER, "empty sequence"))
                })
            }
        }
    }

    /// The reply to `Execute`, consuming one sequence element.
    fn take(&self, params: &CommandParams) -> (Option<Duration>, Reply) {
        match self {
            Self::Delayed(delay, inner) => (Some(*delay), inner.take(params).1),
            Self::Custom(f) => f(params).take(params),
            Self::Sequence(seq) => {
                let index = seq.cursor.fetch_add(1, Ordering::SeqCst);
                let index = index.min(seq.responses.len().saturating_sub(1));
                match seq.responses.get(index) {
                    Some(response) => response.take(params),
                    None => (
                        None,
                        Reply::Error(ErrorResponse::new(error_code::INTERNAL_SERVER, "empty sequence")),
                    ),
                }
            }
            other => (None, other.describe(params)),
        }
    }
}

/// Authentication the server requires.
#[derive(Debug, Clone, Default)]
pub enum MockAuth {
    /// Accept every client.
    #[default]
    Trust,
    /// Require SCRAM-SHA-256 with this user and password.
    Password {
        /// Expected user.
        user: String,
        /// Expected password.
        password: String,
    },
    /// Require this secret key (handshake parameter or bearer token).
    SecretKey(String),
}

/// Kind of a recorded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// `Parse`.
    Parse,
    /// `Execute`.
    Execute,
}

/// A command received by the server.
#[derive(Debug, Clone)]
pub struct RecordedCommand {
    /// Message kind.
    pub kind: CommandKind,
    /// Command text.
    pub text: String,
    /// Requested output format.
    pub output_format: OutputFormat,
    /// Encoded arguments (`Execute` only).
    pub arguments: Bytes,
    /// Whether the command arrived over HTTP.
    pub over_http: bool,
}

/// Configuration for the mock server.
#[derive(Debug)]
pub struct MockServerConfig {
    responses: HashMap<String, MockResponse>,
    default_response: Option<MockResponse>,
    pub(crate) auth: MockAuth,
    pub(crate) database: String,
    protocol_version: ProtocolVersion,
    handshake_delay: Option<Duration>,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            responses: HashMap::new(),
            default_response: None,
            auth: MockAuth::Trust,
            database: "edgedb".into(),
            protocol_version: ProtocolVersion::V1_0,
            handshake_delay: None,
        }
    }
}

/// Builder for [`MockServer`].
#[derive(Debug, Default)]
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response for a command text (matched after trimming).
    #[must_use]
    pub fn with_response(mut self, query: impl Into<String>, response: MockResponse) -> Self {
        self.config
            .responses
            .insert(query.into().trim().to_owned(), response);
        self
    }

    /// Response for commands without a script; by default they fail with
    /// a syntax error.
    #[must_use]
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = Some(response);
        self
    }

    /// Require SCRAM authentication.
    #[must_use]
    pub fn with_password(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.auth = MockAuth::Password {
            user: user.into(),
            password: password.into(),
        };
        self
    }

    /// Require a secret key.
    #[must_use]
    pub fn with_secret_key(mut self, key: impl Into<String>) -> Self {
        self.config.auth = MockAuth::SecretKey(key.into());
        self
    }

    /// Database (branch) name the server accepts.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.config.database = database.into();
        self
    }

    /// Protocol version the server answers with.
    #[must_use]
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.config.protocol_version = version;
        self
    }

    /// Delay before answering the client handshake.
    #[must_use]
    pub fn with_handshake_delay(mut self, delay: Duration) -> Self {
        self.config.handshake_delay = Some(delay);
        self
    }

    /// Build and start the server.
    pub async fn build(self) -> Result<MockServer> {
        MockServer::start(self.config).await
    }
}

/// State shared by all connections of one server.
pub(crate) struct Shared {
    pub(crate) config: MockServerConfig,
    active: AtomicUsize,
    accepted: AtomicUsize,
    commands: Mutex<Vec<RecordedCommand>>,
    pub(crate) tokens: Mutex<HashSet<String>>,
    pub(crate) scram_sessions: Mutex<HashMap<String, ScramServer>>,
    pub(crate) next_sid: AtomicUsize,
}

impl Shared {
    fn lookup(&self, text: &str) -> MockResponse {
        let text = text.trim();
        if let Some(response) = self.config.responses.get(text) {
            return response.clone();
        }
        if let Some(status) = transaction_status(text) {
            return MockResponse::complete(status);
        }
        self.config.default_response.clone().unwrap_or_else(|| {
            MockResponse::error(
                error_code::INVALID_SYNTAX,
                format!("no mock response for {text:?}"),
            )
        })
    }

    fn record(&self, kind: CommandKind, params: &CommandParams, arguments: Bytes, over_http: bool) {
        self.commands.lock().push(RecordedCommand {
            kind,
            text: params.command_text.clone(),
            output_format: params.output_format,
            arguments,
            over_http,
        });
    }

    /// Whether a bearer token or secret key grants access over HTTP.
    pub(crate) fn accepts_token(&self, token: Option<&str>) -> bool {
        match &self.config.auth {
            MockAuth::Trust => true,
            MockAuth::SecretKey(key) => token == Some(key.as_str()),
            MockAuth::Password { .. } => token.is_some_and(|t| self.tokens.lock().contains(t)),
        }
    }
}

fn transaction_status(text: &str) -> Option<&'static str> {
    let lower = text.to_ascii_lowercase();
    if lower.starts_with("start transaction") {
        Some("START TRANSACTION")
    } else if lower.starts_with("commit") {
        Some("COMMIT")
    } else if lower.starts_with("rollback") {
        Some("ROLLBACK")
    } else {
        None
    }
}

/// A mock EdgeDB server.
///
/// Listens on an ephemeral localhost port until dropped or stopped.
pub struct MockServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    shared: Arc<Shared>,
}

impl MockServer {
    /// Create a builder for the mock server.
    #[must_use]
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the server on an available port.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let shared = Arc::new(Shared {
            config,
            active: AtomicUsize::new(0),
            accepted: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            tokens: Mutex::new(HashSet::new()),
            scram_sessions: Mutex::new(HashMap::new()),
            next_sid: AtomicUsize::new(1),
        });

        let mut shutdown_rx = shutdown_tx.subscribe();
        let accept_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                let shared = Arc::clone(&accept_shared);
                                shared.accepted.fetch_add(1, Ordering::SeqCst);
                                tokio::spawn(async move {
                                    shared.active.fetch_add(1, Ordering::SeqCst);
                                    if let Err(e) = handle_connection(stream, Arc::clone(&shared)).await {
                                        tracing::debug!(%peer, error = %e, "mock connection ended with error");
                                    }
                                    shared.active.fetch_sub(1, Ordering::SeqCst);
                                });
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "mock server accept failed");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Ok(Self {
            addr,
            shutdown_tx,
            shared,
        })
    }

    /// Listening address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Host string for connection configuration.
    #[must_use]
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Port number.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Database name the server accepts.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.shared.config.database
    }

    /// Connections currently open.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Connections accepted since start.
    #[must_use]
    pub fn total_connections(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Commands received so far, in arrival order.
    #[must_use]
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.shared.commands.lock().clone()
    }

    /// Texts of the executed commands, in arrival order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.shared
            .commands
            .lock()
            .iter()
            .filter(|c| c.kind == CommandKind::Execute)
            .map(|c| c.text.clone())
            .collect()
    }

    /// Number of `Parse` messages received for `text`.
    #[must_use]
    pub fn parse_count(&self, text: &str) -> usize {
        self.shared
            .commands
            .lock()
            .iter()
            .filter(|c| c.kind == CommandKind::Parse && c.text.trim() == text.trim())
            .count()
    }

    /// Stop accepting connections.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for MockServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockServer")
            .field("addr", &self.addr)
            .field("active", &self.connection_count())
            .finish_non_exhaustive()
    }
}

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>) -> Result<()> {
    let mut first = [0u8; 1];
    if stream.peek(&mut first).await? == 0 {
        return Ok(());
    }
    if first[0] == edb_protocol::message::client_tag::HANDSHAKE {
        handle_binary(stream, shared).await
    } else {
        crate::http::handle_http(stream, shared).await
    }
}

async fn handle_binary(stream: TcpStream, shared: Arc<Shared>) -> Result<()> {
    let mut conn = FramedConnection::new(stream);
    let handshake = match conn.read_client_message().await? {
        Some(ClientMessage::Handshake(hs)) => hs,
        Some(other) => {
            return Err(MockServerError::Unexpected(format!(
                "expected ClientHandshake, got {other:?}"
            )));
        }
        None => return Ok(()),
    };
    tracing::debug!(?handshake, "mock server handshake");

    if let Some(delay) = shared.config.handshake_delay {
        tokio::time::sleep(delay).await;
    }
    if !authenticate(&mut conn, &shared, &handshake).await? {
        return Ok(());
    }

    let mut session = Session::new(Arc::clone(&shared), false);
    let mut out = Vec::new();
    while let Some(message) = conn.read_client_message().await? {
        let sync = matches!(message, ClientMessage::Sync);
        if let Flow::Close = session.handle(message, &mut out).await {
            return Ok(());
        }
        if sync {
            conn.send_all(out.drain(..)).await?;
        }
    }
    Ok(())
}

async fn authenticate(
    conn: &mut FramedConnection<TcpStream>,
    shared: &Shared,
    handshake: &ClientHandshake,
) -> Result<bool> {
    let config = &shared.config;
    if config.protocol_version != handshake.version {
        conn.send(ServerMessage::Handshake {
            version: config.protocol_version,
            extensions: Vec::new(),
        })
        .await?;
    }

    let database = handshake
        .param("branch")
        .or_else(|| handshake.param("database"))
        .unwrap_or_default();
    if database != config.database {
        reject(conn, format!("database {database:?} does not exist")).await?;
        return Ok(false);
    }

    let accepted = match &config.auth {
        MockAuth::Trust => true,
        MockAuth::SecretKey(key) => handshake.param("secret_key") == Some(key.as_str()),
        MockAuth::Password { user, password } => {
            handshake.param("user") == Some(user.as_str()) && scram_exchange(conn, password).await?
        }
    };
    if !accepted {
        reject(conn, "authentication failed".into()).await?;
        return Ok(false);
    }

    conn.send_all([
        ServerMessage::Authentication(Authentication::Ok),
        ServerMessage::ServerKeyData([0u8; 32]),
        ServerMessage::StateDataDescription {
            typedesc_id: TypeId::NULL,
            typedesc: Bytes::new(),
        },
        ServerMessage::ReadyForCommand {
            annotations: Vec::new(),
            transaction_state: TransactionState::NotInTransaction,
        },
    ])
    .await?;
    Ok(true)
}

async fn scram_exchange(conn: &mut FramedConnection<TcpStream>, password: &str) -> Result<bool> {
    conn.send_all([ServerMessage::Authentication(Authentication::Sasl {
        methods: vec![SCRAM_MECHANISM.to_owned()],
    })])
    .await?;

    let Some(ClientMessage::SaslInitialResponse { method, data }) = conn.read_client_message().await?
    else {
        return Err(MockServerError::Unexpected("expected SASL initial response".into()));
    };
    if method != SCRAM_MECHANISM {
        return Ok(false);
    }
    let mut scram = ScramServer::new(password, SCRAM_SALT, SCRAM_ITERATIONS)
        .map_err(|e| MockServerError::Fixture(e.to_string()))?;
    let Ok(server_first) = scram.handle_client_first(&String::from_utf8_lossy(&data)) else {
        return Ok(false);
    };
    conn.send_all([ServerMessage::Authentication(Authentication::SaslContinue {
        data: Bytes::from(server_first),
    })])
    .await?;

    let Some(ClientMessage::SaslResponse { data }) = conn.read_client_message().await? else {
        return Err(MockServerError::Unexpected("expected SASL response".into()));
    };
    match scram.handle_client_final(&String::from_utf8_lossy(&data)) {
        Ok(server_final) => {
            conn.send(ServerMessage::Authentication(Authentication::SaslFinal {
                data: Bytes::from(server_final),
            }))
            .await?;
            Ok(true)
        }
        Err(e) => {
            tracing::debug!(error = %e, "mock SCRAM proof rejected");
            Ok(false)
        }
    }
}

async fn reject(conn: &mut FramedConnection<TcpStream>, message: String) -> Result<()> {
    let mut error = ErrorResponse::new(error_code::AUTHENTICATION, message);
    error.severity = ErrorResponse::SEVERITY_FATAL;
    conn.send_all([ServerMessage::ErrorResponse(error)]).await?;
    Ok(())
}

/// Whether the connection stays open after a message.
pub(crate) enum Flow {
    Continue,
    Close,
}

/// Per-connection command processing, shared by both transports.
pub(crate) struct Session {
    shared: Arc<Shared>,
    transaction: TransactionState,
    skip_until_sync: bool,
    over_http: bool,
}

impl Session {
    pub(crate) fn new(shared: Arc<Shared>, over_http: bool) -> Self {
        Self {
            shared,
            transaction: TransactionState::NotInTransaction,
            skip_until_sync: false,
            over_http,
        }
    }

    /// Process one client message, appending replies to `out`.
    pub(crate) async fn handle(
        &mut self,
        message: ClientMessage,
        out: &mut Vec<ServerMessage>,
    ) -> Flow {
        match message {
            ClientMessage::Sync => {
                self.skip_until_sync = false;
                out.push(ServerMessage::ReadyForCommand {
                    annotations: Vec::new(),
                    transaction_state: self.transaction,
                });
            }
            ClientMessage::Terminate => return Flow::Close,
            _ if self.skip_until_sync => {}
            ClientMessage::Parse(params) => {
                self.shared
                    .record(CommandKind::Parse, &params, Bytes::new(), self.over_http);
                match self.shared.lookup(&params.command_text).describe(&params) {
                    Reply::Result(result) => {
                        out.push(ServerMessage::CommandDataDescription(result.description()));
                    }
                    Reply::Error(error) => self.fail(error, out),
                    Reply::Disconnect => return Flow::Close,
                }
            }
            ClientMessage::Execute(exec) => {
                self.shared.record(
                    CommandKind::Execute,
                    &exec.params,
                    exec.arguments.clone(),
                    self.over_http,
                );
                let (delay, reply) = self.shared.lookup(&exec.params.command_text).take(&exec.params);
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                match reply {
                    Reply::Result(result) => {
                        if exec.input_typedesc_id != result.input_id {
                            self.fail(
                                ErrorResponse::new(
                                    error_code::PARAMETER_TYPE_MISMATCH,
                                    "specified parameter type(s) do not match the parameter types inferred from the query",
                                ),
                                out,
                            );
                            return Flow::Continue;
                        }
                        if exec.output_typedesc_id != result.output_id
                            && exec.params.output_format != OutputFormat::None
                        {
                            out.push(ServerMessage::CommandDataDescription(result.description()));
                        }
                        if exec.params.output_format != OutputFormat::None {
                            out.extend(result.rows.iter().map(|row| ServerMessage::Data(vec![row.clone()])));
                        }
                        self.track_transaction(&exec.params.command_text);
                        out.push(ServerMessage::CommandComplete(CommandComplete {
                            annotations: Vec::new(),
                            capabilities: result.capabilities,
                            status: result.status.clone(),
                            state_typedesc_id: TypeId::NULL,
                            state_data: Bytes::new(),
                        }));
                    }
                    Reply::Error(error) => self.fail(error, out),
                    Reply::Disconnect => return Flow::Close,
                }
            }
            other => {
                tracing::debug!(message = ?other, "mock server ignoring unexpected message");
            }
        }
        Flow::Continue
    }

    fn fail(&mut self, error: ErrorResponse, out: &mut Vec<ServerMessage>) {
        if self.transaction == TransactionState::InTransaction {
            self.transaction = TransactionState::InFailedTransaction;
        }
        self.skip_until_sync = true;
        out.push(ServerMessage::ErrorResponse(error));
    }

    fn track_transaction(&mut self, text: &str) {
        match transaction_status(text.trim()) {
            Some("START TRANSACTION") => self.transaction = TransactionState::InTransaction,
            Some(_) => self.transaction = TransactionState::NotInTransaction,
            None => {}
        }
    }
}
