//! A single server session.
//!
//! [`Connection`] owns one transport, the per-session codec cache and the
//! statement cache. Commands run strictly one at a time: every method takes
//! `&mut self`, so a batch is never pipelined behind another one.

use bytes::BytesMut;
use edb_protocol::{
    Capabilities, Cardinality, ClientMessage, CommandDataDescription, CommandParams, Execute,
    OutputFormat, ProtocolError, ProtocolVersion, ServerMessage, TransactionState, TypeId,
};
use edb_types::{CodecCache, FromValue, QueryArgs, Value};

use crate::binary::BinaryTransport;
use crate::config::{ConnectParams, TransportKind};
use crate::error::{Error, Result};
use crate::http::HttpTransport;
use crate::state::ConnectionState;
use crate::statement_cache::{DescribedStatement, StatementCache, StatementKey};

/// A query together with the result shape the caller expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Query text.
    pub text: String,
    /// Result encoding.
    pub output_format: OutputFormat,
    /// Expected result cardinality.
    pub expected_cardinality: Cardinality,
    /// Capabilities the query may use.
    pub allowed_capabilities: Capabilities,
    /// Implicit `LIMIT`, 0 for none.
    pub implicit_limit: u64,
}

impl Query {
    /// A binary-format query returning any number of rows.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            output_format: OutputFormat::Binary,
            expected_cardinality: Cardinality::Many,
            allowed_capabilities: Capabilities::ALL,
            implicit_limit: 0,
        }
    }

    /// Set the output format.
    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Set the expected cardinality.
    #[must_use]
    pub fn expected_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.expected_cardinality = cardinality;
        self
    }

    /// Restrict the capabilities the query may use.
    #[must_use]
    pub fn allowed_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.allowed_capabilities = capabilities;
        self
    }

    /// Set an implicit `LIMIT`.
    #[must_use]
    pub fn implicit_limit(mut self, limit: u64) -> Self {
        self.implicit_limit = limit;
        self
    }

    fn key(&self) -> StatementKey {
        StatementKey {
            text: self.text.clone(),
            output_format: self.output_format,
            expected_cardinality: self.expected_cardinality,
        }
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Outcome of one executed query.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct QueryResult {
    /// Decoded result rows.
    pub rows: Vec<Value>,
    /// Cardinality the server declared.
    pub cardinality: Cardinality,
    /// Status tag, e.g. `SELECT`.
    pub status: String,
    /// Capabilities the query used.
    pub capabilities: Capabilities,
}

enum Transport {
    Binary(BinaryTransport),
    Http(HttpTransport),
}

impl Transport {
    async fn round_trip(&mut self, batch: Vec<ClientMessage>) -> Result<Vec<ServerMessage>> {
        match self {
            Self::Binary(t) => t.round_trip(batch).await,
            Self::Http(t) => t.round_trip(batch).await,
        }
    }
}

/// A connection to the server.
///
/// Created disconnected; [`Connection::ensure_connected`] opens the
/// transport on demand.
pub struct Connection {
    params: ConnectParams,
    state: ConnectionState,
    transport: Option<Transport>,
    codecs: CodecCache,
    statements: StatementCache,
    transaction_state: TransactionState,
}

impl Connection {
    /// Create a disconnected connection. Performs no I/O.
    #[must_use]
    pub fn new(params: ConnectParams) -> Self {
        let statements = StatementCache::new(params.statement_cache_size);
        Self {
            params,
            state: ConnectionState::Disconnected,
            transport: None,
            codecs: CodecCache::new(),
            statements,
            transaction_state: TransactionState::NotInTransaction,
        }
    }

    /// Create a connection and connect it.
    pub async fn open(params: ConnectParams) -> Result<Self> {
        let mut conn = Self::new(params);
        conn.ensure_connected().await?;
        Ok(conn)
    }

    /// Connect unless already connected.
    ///
    /// Idempotent. A connection left mid-command (its future was dropped)
    /// is torn down and reconnected. The whole handshake runs under the
    /// connect timeout.
    pub async fn ensure_connected(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Idle => return Ok(()),
            ConnectionState::Disconnected => {}
            state => {
                tracing::debug!(%state, "discarding connection abandoned mid-command");
                self.reset();
            }
        }

        let limit = self.params.connect_timeout;
        match tokio::time::timeout(limit, self.connect_transport()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.reset();
                Err(e)
            }
            Err(_) => {
                tracing::warn!(host = %self.params.host, timeout = ?limit, "connect timed out");
                self.reset();
                Err(Error::ConnectionTimeout)
            }
        }
    }

    async fn connect_transport(&mut self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        match self.params.transport {
            TransportKind::Http => {
                let transport = HttpTransport::new(&self.params)?;
                tracing::debug!(address = %transport.address(), "HTTP transport ready");
                self.transport = Some(Transport::Http(transport));
            }
            TransportKind::Binary => {
                let mut transport = BinaryTransport::connect(&self.params).await?;
                self.set_state(ConnectionState::Authenticating);
                transport.authenticate(&self.params.credentials).await?;
                tracing::info!(
                    host = %self.params.host,
                    port = self.params.port,
                    database = %self.params.database,
                    version = %transport.protocol_version(),
                    "connected"
                );
                self.transport = Some(Transport::Binary(transport));
            }
        }
        self.set_state(ConnectionState::Idle);
        Ok(())
    }

    /// Run a query and decode its result.
    ///
    /// The query is described once and the description cached. When the
    /// server reports a stale type cache (see
    /// [`InvalidationPolicy`](crate::InvalidationPolicy)) the codecs are
    /// discarded and the query is described and run once more.
    pub async fn execute(&mut self, query: &Query, args: &QueryArgs) -> Result<QueryResult> {
        self.ensure_connected().await?;

        let result = match self.params.command_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.execute_with_invalidation(query, args)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(query = %query.text, timeout = ?limit, "command timed out, discarding connection");
                    self.reset();
                    return Err(Error::CommandTimeout);
                }
            },
            None => self.execute_with_invalidation(query, args).await,
        };

        match result {
            Err(e) if e.is_fatal() => {
                tracing::debug!(error = %e, "fatal error, discarding connection");
                self.reset();
                Err(e)
            }
            other => other,
        }
    }

    async fn execute_with_invalidation(
        &mut self,
        query: &Query,
        args: &QueryArgs,
    ) -> Result<QueryResult> {
        match self.execute_once(query, args).await {
            Err(Error::Server(e)) if self.params.invalidation.is_stale(&e) => {
                tracing::debug!(
                    code = format_args!("{:#010x}", e.code),
                    query = %query.text,
                    generation = self.codecs.generation(),
                    "type cache is stale, describing again"
                );
                self.codecs.invalidate();
                self.statements.clear();
                self.execute_once(query, args).await
            }
            other => other,
        }
    }

    async fn execute_once(&mut self, query: &Query, args: &QueryArgs) -> Result<QueryResult> {
        let key = query.key();
        let described = match self.statements.get(&key) {
            Some(described) => described,
            None => self.describe(query, &key).await?,
        };

        let input = self.codecs.codec_for(described.input_typedesc_id)?;
        let mut arguments = BytesMut::new();
        input.encode_arguments(&mut arguments, args)?;

        let execute = Execute {
            params: self.command_params(query),
            input_typedesc_id: described.input_typedesc_id,
            output_typedesc_id: described.output_typedesc_id,
            arguments: arguments.freeze(),
        };
        let replies = self
            .round_trip(vec![ClientMessage::Execute(execute), ClientMessage::Sync])
            .await?;

        let mut output = self.codecs.codec_for(described.output_typedesc_id)?;
        let mut result = QueryResult {
            rows: Vec::new(),
            cardinality: described.result_cardinality,
            status: String::new(),
            capabilities: described.capabilities,
        };
        for message in replies {
            match message {
                ServerMessage::CommandDataDescription(description) => {
                    tracing::debug!(query = %query.text, "result type changed during execute");
                    let fresh = self.ingest(description)?;
                    output = self.codecs.codec_for(fresh.output_typedesc_id)?;
                    result.cardinality = fresh.result_cardinality;
                    self.statements.insert(key.clone(), fresh);
                }
                ServerMessage::Data(elements) => {
                    for element in elements {
                        result.rows.push(output.decode(&element)?);
                    }
                }
                ServerMessage::CommandComplete(complete) => {
                    result.status = complete.status;
                    result.capabilities = complete.capabilities;
                }
                ServerMessage::ErrorResponse(error) => return Err(error.into()),
                ServerMessage::ReadyForCommand { .. }
                | ServerMessage::StateDataDescription { .. }
                | ServerMessage::ParameterStatus { .. } => {}
                other => return Err(ProtocolError::UnexpectedMessage(other.name()).into()),
            }
        }
        tracing::trace!(query = %query.text, rows = result.rows.len(), status = %result.status, "query complete");
        Ok(result)
    }

    /// `Parse` round trip; caches and returns the description.
    async fn describe(&mut self, query: &Query, key: &StatementKey) -> Result<DescribedStatement> {
        let parse = ClientMessage::Parse(self.command_params(query));
        let replies = self.round_trip(vec![parse, ClientMessage::Sync]).await?;

        let mut described = None;
        for message in replies {
            match message {
                ServerMessage::CommandDataDescription(description) => {
                    described = Some(self.ingest(description)?);
                }
                ServerMessage::ErrorResponse(error) => return Err(error.into()),
                ServerMessage::ReadyForCommand { .. }
                | ServerMessage::StateDataDescription { .. }
                | ServerMessage::ParameterStatus { .. } => {}
                other => return Err(ProtocolError::UnexpectedMessage(other.name()).into()),
            }
        }
        let described = described.ok_or(ProtocolError::UnexpectedMessage("ReadyForCommand"))?;
        if let Some(evicted) = self.statements.insert(key.clone(), described) {
            tracing::trace!(query = %evicted.text, "evicted statement");
        }
        Ok(described)
    }

    fn ingest(&mut self, description: CommandDataDescription) -> Result<DescribedStatement> {
        for block in [&description.input_typedesc, &description.output_typedesc] {
            if !block.is_empty() {
                self.codecs.ingest(block)?;
            }
        }
        Ok(DescribedStatement {
            input_typedesc_id: description.input_typedesc_id,
            output_typedesc_id: description.output_typedesc_id,
            result_cardinality: description.result_cardinality,
            capabilities: description.capabilities,
        })
    }

    /// Send a batch and wait for `ReadyForCommand`.
    ///
    /// The state is `Executing` until the reply is complete, so a future
    /// dropped in between leaves the connection marked as abandoned.
    async fn round_trip(&mut self, batch: Vec<ClientMessage>) -> Result<Vec<ServerMessage>> {
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        self.state = ConnectionState::Executing;
        match transport.round_trip(batch).await {
            Ok(replies) => {
                for message in &replies {
                    if let ServerMessage::ReadyForCommand {
                        transaction_state, ..
                    } = message
                    {
                        self.transaction_state = *transaction_state;
                    }
                }
                self.state = ConnectionState::Idle;
                Ok(replies)
            }
            Err(e) => {
                self.reset();
                Err(e)
            }
        }
    }

    fn command_params(&self, query: &Query) -> CommandParams {
        let state_typedesc_id = match &self.transport {
            Some(Transport::Binary(t)) => t.state_typedesc_id(),
            _ => TypeId::NULL,
        };
        CommandParams {
            allowed_capabilities: query.allowed_capabilities,
            implicit_limit: query.implicit_limit,
            output_format: query.output_format,
            expected_cardinality: query.expected_cardinality,
            state_typedesc_id,
            ..CommandParams::new(query.text.clone())
        }
    }

    /// Run a query and return all rows.
    pub async fn query(&mut self, text: &str, args: &QueryArgs) -> Result<Vec<Value>> {
        Ok(self.execute(&Query::new(text), args).await?.rows)
    }

    /// Run a query that must return exactly one row.
    pub async fn query_single(&mut self, text: &str, args: &QueryArgs) -> Result<Value> {
        let query = Query::new(text).expected_cardinality(Cardinality::AtMostOne);
        exactly_one(self.execute(&query, args).await?.rows)
    }

    /// Run a query and return the whole result as one JSON array.
    pub async fn query_json(&mut self, text: &str, args: &QueryArgs) -> Result<String> {
        let query = Query::new(text).output_format(OutputFormat::Json);
        let rows = self.execute(&query, args).await?.rows;
        if rows.is_empty() {
            return Ok("[]".to_owned());
        }
        Ok(String::from_value(exactly_one(rows)?)?)
    }

    /// Run a single-result query and return it as JSON.
    pub async fn query_single_json(&mut self, text: &str, args: &QueryArgs) -> Result<String> {
        let query = Query::new(text)
            .output_format(OutputFormat::Json)
            .expected_cardinality(Cardinality::AtMostOne);
        let rows = self.execute(&query, args).await?.rows;
        Ok(String::from_value(exactly_one(rows)?)?)
    }

    /// Run a command without output. Returns the status tag.
    pub async fn execute_command(&mut self, text: &str, args: &QueryArgs) -> Result<String> {
        let query = Query::new(text).output_format(OutputFormat::None);
        Ok(self.execute(&query, args).await?.status)
    }

    /// Send `Terminate` and drop the transport.
    ///
    /// Errors from an already dead transport are ignored.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(Transport::Binary(mut transport)) = self.transport.take() {
            if let Err(e) = transport.terminate().await {
                tracing::debug!(error = %e, "ignoring error while closing connection");
            }
        }
        self.state = ConnectionState::Disconnected;
        self.transaction_state = TransactionState::NotInTransaction;
        Ok(())
    }

    fn reset(&mut self) {
        self.transport = None;
        self.state = ConnectionState::Disconnected;
        self.transaction_state = TransactionState::NotInTransaction;
        self.codecs.invalidate();
        self.statements.clear();
    }

    fn set_state(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {next}",
            self.state
        );
        tracing::debug!(from = %self.state, to = %next, "connection state");
        self.state = next;
    }

    /// Current protocol state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Transaction status reported by the last `ReadyForCommand`.
    #[must_use]
    pub fn transaction_state(&self) -> TransactionState {
        self.transaction_state
    }

    /// Whether a transaction block is open, failed or not.
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        self.transaction_state != TransactionState::NotInTransaction
    }

    /// Negotiated protocol version of a connected binary session.
    #[must_use]
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        match &self.transport {
            Some(Transport::Binary(t)) => Some(t.protocol_version()),
            _ => None,
        }
    }

    /// Parameters this connection was created with.
    #[must_use]
    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    /// The described-statement cache.
    #[must_use]
    pub fn statement_cache(&self) -> &StatementCache {
        &self.statements
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.params.host)
            .field("port", &self.params.port)
            .field("transport", &self.params.transport)
            .field("state", &self.state)
            .field("transaction_state", &self.transaction_state)
            .field("statements", &self.statements)
            .finish_non_exhaustive()
    }
}

fn exactly_one(mut rows: Vec<Value>) -> Result<Value> {
    match rows.len() {
        1 => rows.pop().ok_or(Error::ResultCardinality(0)),
        n => Err(Error::ResultCardinality(n)),
    }
}
