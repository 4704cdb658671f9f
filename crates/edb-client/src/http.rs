//! HTTP transport.
//!
//! Every command batch is one `POST` to `{scheme}://{host}:{port}/db/{database}`
//! whose body is the batch's frames and whose response body is the server's
//! frames. Opening the transport performs no network I/O; password
//! credentials are exchanged for a bearer token on the first round trip.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::BytesMut;
use edb_auth::{AuthError, Credentials, SCRAM_MECHANISM, ScramClient};
use edb_protocol::{
    ClientMessage, DEFAULT_MAX_FRAME_SIZE, Frame, ProtocolError, ServerMessage,
};
use edb_tls::{TlsConfig, TlsConnector};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use url::Url;

use crate::binary::log_server_message;
use crate::config::ConnectParams;
use crate::error::{Error, Result};

/// Content type of binary protocol request and response bodies.
const BINARY_CONTENT_TYPE: &str = "application/x.edgedb.v_1_0.binary";

const AUTHENTICATION_INFO: &str = "authentication-info";
const USER_HEADER: &str = "X-EdgeDB-User";

/// A stateless HTTP session.
pub(crate) struct HttpTransport {
    client: reqwest::Client,
    address: Url,
    token_url: Url,
    credentials: Credentials,
    token: Option<String>,
}

impl HttpTransport {
    /// Build the HTTP client. No request is sent.
    pub(crate) fn new(params: &ConnectParams) -> Result<Self> {
        let address = Url::parse(&params.http_address())
            .map_err(|e| Error::Configuration(format!("invalid HTTP address: {e}")))?;
        let token_url = address
            .join("/auth/token")
            .map_err(|e| Error::Configuration(format!("invalid HTTP address: {e}")))?;

        let mut builder = reqwest::Client::builder().connect_timeout(params.connect_timeout);
        if params.security_mode().uses_tls() {
            let tls: TlsConfig = params
                .tls
                .clone()
                .with_alpn_protocols(vec![b"http/1.1".to_vec()]);
            let connector = TlsConnector::new(tls)?;
            builder = builder.use_preconfigured_tls((**connector.client_config()).clone());
        } else {
            tracing::warn!(address = %address, "using plaintext HTTP");
        }

        Ok(Self {
            client: builder.build()?,
            address,
            token_url,
            credentials: params.credentials.clone(),
            token: None,
        })
    }

    /// The endpoint command batches are posted to.
    pub(crate) fn address(&self) -> &Url {
        &self.address
    }

    /// Post one batch and decode the server's frames.
    pub(crate) async fn round_trip(
        &mut self,
        batch: Vec<ClientMessage>,
    ) -> Result<Vec<ServerMessage>> {
        let mut body = BytesMut::new();
        for message in &batch {
            message.encode(&mut body)?;
        }

        let token = self.bearer_token().await?;
        let mut request = self
            .client
            .post(self.address.clone())
            .header(CONTENT_TYPE, BINARY_CONTENT_TYPE)
            .header(USER_HEADER, self.credentials.user())
            .body(body.freeze());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        tracing::trace!(address = %self.address, messages = batch.len(), "posting command batch");
        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => {
                self.token = None;
                return Err(AuthError::InvalidCredentials("server rejected the bearer token".into()).into());
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                return Err(Error::Connection(format!(
                    "HTTP {status} from {}: {}",
                    self.address,
                    text.trim()
                )));
            }
        }

        let mut buf = BytesMut::from(&response.bytes().await?[..]);
        let mut replies = Vec::new();
        while let Some(frame) = Frame::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE)? {
            match ServerMessage::decode(&frame)? {
                ServerMessage::LogMessage(log) => log_server_message(&log),
                message => replies.push(message),
            }
        }
        if !buf.is_empty() {
            return Err(ProtocolError::TrailingBytes {
                message: "HTTP response body",
                extra: buf.len(),
            }
            .into());
        }
        Ok(replies)
    }

    async fn bearer_token(&mut self) -> Result<Option<String>> {
        if let Some(token) = &self.token {
            return Ok(Some(token.clone()));
        }
        if let Some(key) = self.credentials.secret_key_str() {
            return Ok(Some(key.to_owned()));
        }
        let Some(password) = self.credentials.password_str() else {
            return Ok(None);
        };
        let token = self.scram_token(password).await?;
        self.token = Some(token.clone());
        Ok(Some(token))
    }

    /// SCRAM exchange against the token endpoint.
    async fn scram_token(&self, password: &str) -> Result<String> {
        tracing::debug!(url = %self.token_url, user = self.credentials.user(), "requesting auth token");
        let mut scram = ScramClient::new(self.credentials.user(), password);

        let first = scram.client_first();
        let response = self
            .client
            .get(self.token_url.clone())
            .header(
                AUTHORIZATION,
                format!("{SCRAM_MECHANISM} data={}", BASE64.encode(first)),
            )
            .send()
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Err(AuthError::MalformedMessage(format!(
                "token endpoint answered {} instead of a SCRAM challenge",
                response.status()
            ))
            .into());
        }
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix(SCRAM_MECHANISM))
            .ok_or_else(|| AuthError::MalformedMessage("missing SCRAM challenge".into()))?;
        let params = auth_params(challenge);
        let sid = param(&params, "sid")
            .ok_or_else(|| AuthError::MalformedMessage("SCRAM challenge without sid".into()))?
            .to_owned();
        let server_first = decode_b64(param(&params, "data"))?;

        let client_final = scram.handle_server_first(&server_first)?;
        let response = self
            .client
            .get(self.token_url.clone())
            .header(
                AUTHORIZATION,
                format!("{SCRAM_MECHANISM} sid={sid}, data={}", BASE64.encode(client_final)),
            )
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => {
                return Err(AuthError::InvalidCredentials("token endpoint rejected the proof".into()).into());
            }
            status => {
                return Err(AuthError::MalformedMessage(format!("token endpoint answered {status}")).into());
            }
        }
        let server_final = {
            let info = response
                .headers()
                .get(AUTHENTICATION_INFO)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| AuthError::MalformedMessage("missing Authentication-Info".into()))?;
            decode_b64(param(&auth_params(info), "data"))?
        };
        scram.verify_server_final(&server_final)?;

        let token = response.text().await?;
        tracing::debug!("auth token acquired");
        Ok(token.trim().to_owned())
    }
}

/// Parse `key=value, key=value` authentication parameters.
fn auth_params(value: &str) -> Vec<(&str, &str)> {
    value
        .split(',')
        .filter_map(|part| part.trim().split_once('='))
        .collect()
}

fn param<'a>(params: &[(&str, &'a str)], name: &str) -> Option<&'a str> {
    params.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
}

fn decode_b64(value: Option<&str>) -> std::result::Result<String, AuthError> {
    let value = value.ok_or_else(|| AuthError::MalformedMessage("missing SCRAM data".into()))?;
    let bytes = BASE64
        .decode(value)
        .map_err(|e| AuthError::MalformedMessage(format!("invalid base64 in SCRAM data: {e}")))?;
    String::from_utf8(bytes).map_err(|_| AuthError::MalformedMessage("SCRAM data is not UTF-8".into()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_params() {
        let params = auth_params(" sid=3, data=cj1hYmM=");
        assert_eq!(param(&params, "sid"), Some("3"));
        assert_eq!(decode_b64(param(&params, "data")).unwrap(), "r=abc");
        assert!(decode_b64(None).is_err());
        assert!(decode_b64(Some("not base64!")).is_err());
    }

    #[test]
    fn test_token_endpoint_is_server_relative() {
        let address = Url::parse("https://db.example.com:5656/db/main").unwrap();
        assert_eq!(
            address.join("/auth/token").unwrap().as_str(),
            "https://db.example.com:5656/auth/token"
        );
    }
}
