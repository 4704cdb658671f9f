//! Binary protocol transport.
//!
//! One TCP connection, wrapped in TLS unless the security mode is
//! `insecure`, carrying length-prefixed frames in both directions.

use bytes::Bytes;
use edb_auth::{AuthError, Credentials, SCRAM_MECHANISM, ScramClient};
use edb_codec::{CodecError, FramedConnection};
use edb_protocol::{
    Authentication, ClientHandshake, ClientMessage, LogMessage, ProtocolError, ProtocolVersion,
    ServerMessage, TypeId,
};
use edb_tls::{TlsConnector, TlsStream};
use tokio::net::TcpStream;

use crate::config::ConnectParams;
use crate::error::{Error, ErrorCategory, Result, ServerError};

enum Stream {
    Tls(Box<FramedConnection<TlsStream<TcpStream>>>),
    Plain(FramedConnection<TcpStream>),
}

impl Stream {
    async fn send_all(
        &mut self,
        messages: Vec<ClientMessage>,
    ) -> std::result::Result<(), CodecError> {
        match self {
            Self::Tls(conn) => conn.send_all(messages).await,
            Self::Plain(conn) => conn.send_all(messages).await,
        }
    }

    async fn read(&mut self) -> std::result::Result<Option<ServerMessage>, CodecError> {
        match self {
            Self::Tls(conn) => conn.read_server_message().await,
            Self::Plain(conn) => conn.read_server_message().await,
        }
    }

    async fn shutdown(&mut self) -> std::result::Result<(), CodecError> {
        match self {
            Self::Tls(conn) => conn.shutdown().await,
            Self::Plain(conn) => conn.shutdown().await,
        }
    }
}

/// An open binary protocol session.
pub(crate) struct BinaryTransport {
    stream: Stream,
    protocol_version: ProtocolVersion,
    state_typedesc_id: TypeId,
}

impl BinaryTransport {
    /// Open the transport and send the client handshake.
    pub(crate) async fn connect(params: &ConnectParams) -> Result<Self> {
        tracing::debug!(host = %params.host, port = params.port, "establishing TCP connection");
        let tcp = TcpStream::connect((params.host.as_str(), params.port))
            .await
            .map_err(|e| {
                Error::Connection(format!("failed to connect to {}:{}: {e}", params.host, params.port))
            })?;
        tcp.set_nodelay(true)?;

        let stream = if params.security_mode().uses_tls() {
            let connector = TlsConnector::new(params.tls.clone())?;
            let tls = connector.connect(tcp, &params.host).await?;
            Stream::Tls(Box::new(FramedConnection::new(tls)))
        } else {
            tracing::warn!(host = %params.host, "connecting without TLS");
            Stream::Plain(FramedConnection::new(tcp))
        };

        let mut transport = Self {
            stream,
            protocol_version: ProtocolVersion::default(),
            state_typedesc_id: TypeId::NULL,
        };

        let mut handshake = ClientHandshake {
            version: transport.protocol_version,
            params: vec![
                ("user".to_owned(), params.credentials.user().to_owned()),
                ("database".to_owned(), params.database.clone()),
                ("branch".to_owned(), params.database.clone()),
            ],
            extensions: Vec::new(),
        };
        if let Some(key) = params.credentials.secret_key_str() {
            handshake.params.push(("secret_key".to_owned(), key.to_owned()));
        }
        tracing::debug!(?handshake, "sending client handshake");
        transport
            .stream
            .send_all(vec![ClientMessage::Handshake(handshake)])
            .await?;
        Ok(transport)
    }

    /// Run the authentication exchange up to the first `ReadyForCommand`.
    pub(crate) async fn authenticate(&mut self, credentials: &Credentials) -> Result<()> {
        let mut scram: Option<ScramClient> = None;
        loop {
            let message = self.stream.read().await?.ok_or(Error::ConnectionClosed)?;
            match message {
                ServerMessage::Handshake { version, .. } => {
                    if !version.is_supported() {
                        return Err(Error::Connection(format!(
                            "server protocol version {version} is not supported"
                        )));
                    }
                    tracing::debug!(%version, "server negotiated protocol version");
                    self.protocol_version = version;
                }
                ServerMessage::Authentication(Authentication::Ok) => {
                    tracing::debug!(method = credentials.method_name(), "authenticated");
                }
                ServerMessage::Authentication(Authentication::Sasl { methods }) => {
                    if !methods.iter().any(|m| m == SCRAM_MECHANISM) {
                        return Err(AuthError::UnsupportedMethod(methods.join(", ")).into());
                    }
                    let password = credentials.password_str().ok_or_else(|| {
                        AuthError::InvalidCredentials("server requires a password".into())
                    })?;
                    let mut client = ScramClient::new(credentials.user(), password);
                    let first = client.client_first();
                    self.stream
                        .send_all(vec![ClientMessage::SaslInitialResponse {
                            method: SCRAM_MECHANISM.to_owned(),
                            data: Bytes::from(first),
                        }])
                        .await?;
                    scram = Some(client);
                }
                ServerMessage::Authentication(Authentication::SaslContinue { data }) => {
                    let client = scram
                        .as_mut()
                        .ok_or(AuthError::OutOfOrder("SASL continue before SASL start"))?;
                    let reply = client.handle_server_first(sasl_text(&data)?)?;
                    self.stream
                        .send_all(vec![ClientMessage::SaslResponse {
                            data: Bytes::from(reply),
                        }])
                        .await?;
                }
                ServerMessage::Authentication(Authentication::SaslFinal { data }) => {
                    let client = scram
                        .as_mut()
                        .ok_or(AuthError::OutOfOrder("SASL final before SASL start"))?;
                    client.verify_server_final(sasl_text(&data)?)?;
                }
                ServerMessage::ServerKeyData(_) => tracing::trace!("received server key data"),
                ServerMessage::ParameterStatus { name, .. } => {
                    tracing::trace!(name = %String::from_utf8_lossy(&name), "server parameter");
                }
                ServerMessage::StateDataDescription { typedesc_id, .. } => {
                    self.state_typedesc_id = typedesc_id;
                }
                ServerMessage::ReadyForCommand { .. } => return Ok(()),
                ServerMessage::ErrorResponse(error) => {
                    let error = ServerError::from(error);
                    if error.kind.category() == ErrorCategory::Authentication {
                        return Err(AuthError::InvalidCredentials(error.message).into());
                    }
                    return Err(error.into());
                }
                ServerMessage::LogMessage(log) => log_server_message(&log),
                other => {
                    return Err(ProtocolError::UnexpectedMessage(other.name()).into());
                }
            }
        }
    }

    /// Send one batch and collect replies through `ReadyForCommand`.
    ///
    /// The server may close the session right after a fatal error; the
    /// replies collected so far are returned in that case.
    pub(crate) async fn round_trip(
        &mut self,
        batch: Vec<ClientMessage>,
    ) -> Result<Vec<ServerMessage>> {
        self.stream.send_all(batch).await?;
        let mut replies = Vec::new();
        loop {
            match self.stream.read().await? {
                Some(ServerMessage::LogMessage(log)) => log_server_message(&log),
                Some(message @ ServerMessage::ReadyForCommand { .. }) => {
                    replies.push(message);
                    return Ok(replies);
                }
                Some(message) => replies.push(message),
                None if replies
                    .iter()
                    .any(|m| matches!(m, ServerMessage::ErrorResponse(e) if e.is_fatal())) =>
                {
                    return Ok(replies);
                }
                None => return Err(Error::ConnectionClosed),
            }
        }
    }

    /// Send `Terminate` and shut the write half down.
    pub(crate) async fn terminate(&mut self) -> Result<()> {
        self.stream.send_all(vec![ClientMessage::Terminate]).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    pub(crate) fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    pub(crate) fn state_typedesc_id(&self) -> TypeId {
        self.state_typedesc_id
    }
}

fn sasl_text(data: &Bytes) -> std::result::Result<&str, AuthError> {
    std::str::from_utf8(data).map_err(|_| AuthError::MalformedMessage("SASL data is not UTF-8".into()))
}

pub(crate) fn log_server_message(log: &LogMessage) {
    match log.severity {
        0..=20 => tracing::debug!(code = log.code, "server: {}", log.text),
        21..=60 => tracing::info!(code = log.code, "server: {}", log.text),
        _ => tracing::warn!(code = log.code, "server: {}", log.text),
    }
}
