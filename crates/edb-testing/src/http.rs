//! HTTP transport of the mock server.
//!
//! One request per connection. Supports the SCRAM token exchange on
//! `GET /auth/token` and binary command batches on `POST /db/{database}`.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::{Bytes, BytesMut};
use edb_auth::{SCRAM_MECHANISM, ScramServer};
use edb_protocol::{ClientMessage, DEFAULT_MAX_FRAME_SIZE, Frame};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::mock_server::{
    Flow, MockAuth, MockServerError, Result, SCRAM_ITERATIONS, SCRAM_SALT, Session, Shared,
};

/// Content type of binary protocol bodies.
pub const BINARY_CONTENT_TYPE: &str = "application/x.edgedb.v_1_0.binary";

const MAX_HEADER_LINES: usize = 64;

struct Request {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

struct Response {
    status: u16,
    reason: &'static str,
    headers: Vec<(&'static str, String)>,
    body: Bytes,
}

impl Response {
    fn new(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    fn text(status: u16, reason: &'static str, body: impl Into<String>) -> Self {
        Self::new(status, reason)
            .header("Content-Type", "text/plain".into())
            .body(Bytes::from(body.into()))
    }

    fn header(mut self, name: &'static str, value: String) -> Self {
        self.headers.push((name, value));
        self
    }

    fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    async fn write(self, stream: &mut TcpStream) -> Result<()> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        ));
        stream.write_all(head.as_bytes()).await?;
        stream.write_all(&self.body).await?;
        stream.flush().await?;
        Ok(())
    }
}

pub(crate) async fn handle_http(mut stream: TcpStream, shared: Arc<Shared>) -> Result<()> {
    let Some(request) = read_request(&mut stream).await? else {
        return Ok(());
    };
    tracing::debug!(method = %request.method, path = %request.path, "mock HTTP request");

    let response = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/auth/token") => auth_token(&request, &shared),
        ("POST", path) if path.starts_with("/db/") => {
            match execute(&request, &path["/db/".len()..], &shared).await? {
                Some(response) => response,
                None => return Ok(()),
            }
        }
        _ => Response::text(404, "Not Found", "unknown endpoint"),
    };
    response.write(&mut stream).await
}

async fn read_request(stream: &mut TcpStream) -> Result<Option<Request>> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Err(MockServerError::Unexpected(format!("bad request line {line:?}")));
    };
    let (method, path) = (method.to_owned(), path.to_owned());

    let mut headers = Vec::new();
    loop {
        line.clear();
        reader.read_line(&mut line).await?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        if headers.len() == MAX_HEADER_LINES {
            return Err(MockServerError::Unexpected("too many headers".into()));
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            headers.push((name.trim().to_owned(), value.trim().to_owned()));
        }
    }

    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    Ok(Some(Request {
        method,
        path,
        headers,
        body: Bytes::from(body),
    }))
}

/// Parse `key=value, key=value` authorization parameters.
fn auth_params(value: &str) -> Vec<(&str, &str)> {
    value
        .split(',')
        .filter_map(|part| part.trim().split_once('='))
        .collect()
}

fn param<'a>(params: &[(&str, &'a str)], name: &str) -> Option<&'a str> {
    params.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
}

fn decode_b64(value: Option<&str>) -> Option<String> {
    let bytes = BASE64.decode(value?).ok()?;
    String::from_utf8(bytes).ok()
}

fn auth_token(request: &Request, shared: &Shared) -> Response {
    let MockAuth::Password { user, password } = &shared.config.auth else {
        return Response::text(400, "Bad Request", "password authentication is not enabled");
    };
    let Some(rest) = request
        .header("Authorization")
        .and_then(|v| v.strip_prefix(SCRAM_MECHANISM))
    else {
        return Response::text(401, "Unauthorized", "expected SCRAM authorization");
    };
    let params = auth_params(rest);

    match param(&params, "sid") {
        None => {
            let Some(client_first) = decode_b64(param(&params, "data")) else {
                return Response::text(400, "Bad Request", "malformed SCRAM data");
            };
            let mut scram = match ScramServer::new(password, SCRAM_SALT, SCRAM_ITERATIONS) {
                Ok(scram) => scram,
                Err(e) => return Response::text(500, "Internal Server Error", e.to_string()),
            };
            let server_first = match scram.handle_client_first(&client_first) {
                Ok(message) => message,
                Err(e) => return Response::text(400, "Bad Request", e.to_string()),
            };
            if scram.user() != Some(user.as_str()) {
                return Response::text(401, "Unauthorized", "authentication failed");
            }
            let sid = shared.next_sid.fetch_add(1, Ordering::SeqCst).to_string();
            shared.scram_sessions.lock().insert(sid.clone(), scram);
            Response::new(401, "Unauthorized").header(
                "WWW-Authenticate",
                format!(
                    "{SCRAM_MECHANISM} sid={sid}, data={}",
                    BASE64.encode(server_first)
                ),
            )
        }
        Some(sid) => {
            let Some(mut scram) = shared.scram_sessions.lock().remove(sid) else {
                return Response::text(401, "Unauthorized", "unknown SCRAM session");
            };
            let Some(client_final) = decode_b64(param(&params, "data")) else {
                return Response::text(400, "Bad Request", "malformed SCRAM data");
            };
            match scram.handle_client_final(&client_final) {
                Ok(server_final) => {
                    let token = format!("mock-token-{sid}");
                    shared.tokens.lock().insert(token.clone());
                    Response::new(200, "OK")
                        .header(
                            "Authentication-Info",
                            format!("sid={sid}, data={}", BASE64.encode(server_final)),
                        )
                        .body(Bytes::from(token))
                }
                Err(_) => Response::text(401, "Unauthorized", "authentication failed"),
            }
        }
    }
}

/// Run a binary batch. `None` means the connection is dropped unanswered.
async fn execute(
    request: &Request,
    database: &str,
    shared: &Arc<Shared>,
) -> Result<Option<Response>> {
    if database != shared.config.database {
        return Ok(Some(Response::text(404, "Not Found", "database does not exist")));
    }
    let token = request
        .header("Authorization")
        .and_then(|v| v.strip_prefix("Bearer "));
    if !shared.accepts_token(token) {
        return Ok(Some(Response::text(401, "Unauthorized", "invalid token")));
    }
    if request.header("Content-Type") != Some(BINARY_CONTENT_TYPE) {
        return Ok(Some(Response::text(
            415,
            "Unsupported Media Type",
            "expected binary protocol body",
        )));
    }

    let mut buf = BytesMut::from(&request.body[..]);
    let mut session = Session::new(Arc::clone(shared), true);
    let mut out = Vec::new();
    while let Some(frame) = Frame::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE)? {
        let message = ClientMessage::decode(&frame)?;
        if let Flow::Close = session.handle(message, &mut out).await {
            return Ok(None);
        }
    }
    if !buf.is_empty() {
        return Ok(Some(Response::text(400, "Bad Request", "truncated frame")));
    }

    let mut body = BytesMut::new();
    for message in &out {
        message.encode(&mut body)?;
    }
    Ok(Some(
        Response::new(200, "OK")
            .header("Content-Type", BINARY_CONTENT_TYPE.into())
            .body(body.freeze()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_params_keep_base64_padding() {
        let params = auth_params(" sid=7, data=cj1hYmM=");
        assert_eq!(param(&params, "sid"), Some("7"));
        assert_eq!(param(&params, "data"), Some("cj1hYmM="));
        assert_eq!(decode_b64(param(&params, "data")).as_deref(), Some("r=abc"));
    }
}
