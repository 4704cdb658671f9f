//! SCRAM-SHA-256 (RFC 5802, RFC 7677) without channel binding.
//!
//! [`ScramClient`] drives the client side of the exchange. The same
//! messages are carried inside protocol SASL messages on the binary
//! transport and inside `Authorization` headers on the HTTP transport.
//! [`ScramServer`] implements the verifying side and is used by test
//! servers.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::AuthError;

/// SASL mechanism name.
pub const MECHANISM: &str = "SCRAM-SHA-256";

/// GS2 header for "no channel binding"; `biws` is its base64 form.
const GS2_HEADER: &str = "n,,";
const CHANNEL_BINDING: &str = "biws";

const NONCE_LEN: usize = 24;

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], AuthError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AuthError::MalformedMessage(format!("hmac key: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// PBKDF2-HMAC-SHA256 with a single output block.
fn salted_password(password: &str, salt: &[u8], iterations: u32) -> Result<[u8; 32], AuthError> {
    let mut block = salt.to_vec();
    block.extend_from_slice(&1u32.to_be_bytes());
    let mut u = hmac_sha256(password.as_bytes(), &block)?;
    let mut result = u;
    for _ in 1..iterations {
        u = hmac_sha256(password.as_bytes(), &u)?;
        for (r, b) in result.iter_mut().zip(u) {
            *r ^= b;
        }
    }
    Ok(result)
}

fn random_nonce() -> String {
    STANDARD.encode(rand::random::<[u8; NONCE_LEN]>())
}

/// RFC 5802 `saslname` escaping.
fn escape_name(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

fn unescape_name(name: &str) -> String {
    name.replace("=2C", ",").replace("=3D", "=")
}

/// Split `k=v,k=v` into pairs; values may contain `=`.
fn attributes(message: &str) -> Result<Vec<(char, &str)>, AuthError> {
    message
        .split(',')
        .map(|part| {
            let mut chars = part.chars();
            match (chars.next(), chars.next()) {
                (Some(key), Some('=')) => Ok((key, &part[key.len_utf8() + 1..])),
                _ => Err(AuthError::MalformedMessage(format!("bad attribute {part:?}"))),
            }
        })
        .collect()
}

fn required<'a>(attrs: &[(char, &'a str)], key: char) -> Result<&'a str, AuthError> {
    attrs
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .ok_or_else(|| AuthError::MalformedMessage(format!("missing attribute {key}")))
}

fn decode_b64(value: &str, what: &str) -> Result<Vec<u8>, AuthError> {
    STANDARD
        .decode(value)
        .map_err(|e| AuthError::MalformedMessage(format!("invalid {what}: {e}")))
}

enum ClientState {
    Initial,
    AwaitingServerFirst,
    AwaitingServerFinal { server_signature: [u8; 32] },
    Complete,
}

/// Client side of a SCRAM-SHA-256 exchange.
pub struct ScramClient {
    password: String,
    client_nonce: String,
    client_first_bare: String,
    state: ClientState,
}

impl ScramClient {
    /// Start an exchange with a random nonce.
    #[must_use]
    pub fn new(user: &str, password: &str) -> Self {
        Self::with_nonce(user, password, &random_nonce())
    }

    /// Start an exchange with a fixed nonce.
    #[must_use]
    pub fn with_nonce(user: &str, password: &str, nonce: &str) -> Self {
        Self {
            password: password.to_string(),
            client_nonce: nonce.to_string(),
            client_first_bare: format!("n={},r={nonce}", escape_name(user)),
            state: ClientState::Initial,
        }
    }

    /// The client-first message.
    pub fn client_first(&mut self) -> String {
        self.state = ClientState::AwaitingServerFirst;
        format!("{GS2_HEADER}{}", self.client_first_bare)
    }

    /// Process the server-first message and produce the client-final message.
    pub fn handle_server_first(&mut self, server_first: &str) -> Result<String, AuthError> {
        if !matches!(self.state, ClientState::AwaitingServerFirst) {
            return Err(AuthError::OutOfOrder("server-first"));
        }
        let attrs = attributes(server_first)?;
        let nonce = required(&attrs, 'r')?;
        let salt = decode_b64(required(&attrs, 's')?, "salt")?;
        let iterations: u32 = required(&attrs, 'i')?
            .parse()
            .map_err(|e| AuthError::MalformedMessage(format!("invalid iteration count: {e}")))?;
        if iterations == 0 {
            return Err(AuthError::MalformedMessage("zero iteration count".into()));
        }
        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(AuthError::NonceMismatch);
        }

        let salted = salted_password(&self.password, &salt, iterations)?;
        let client_key = hmac_sha256(&salted, b"Client Key")?;
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();
        let server_key = hmac_sha256(&salted, b"Server Key")?;

        let without_proof = format!("c={CHANNEL_BINDING},r={nonce}");
        let auth_message = format!("{},{server_first},{without_proof}", self.client_first_bare);
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature)
            .map(|(k, s)| k ^ s)
            .collect();

        self.state = ClientState::AwaitingServerFinal {
            server_signature: hmac_sha256(&server_key, auth_message.as_bytes())?,
        };
        tracing::trace!(iterations, "SCRAM server-first processed");
        Ok(format!("{without_proof},p={}", STANDARD.encode(proof)))
    }

    /// Verify the server-final message.
    pub fn verify_server_final(&mut self, server_final: &str) -> Result<(), AuthError> {
        let ClientState::AwaitingServerFinal { server_signature } = &self.state else {
            return Err(AuthError::OutOfOrder("server-final"));
        };
        let attrs = attributes(server_final)?;
        if let Ok(error) = required(&attrs, 'e') {
            return Err(AuthError::MalformedMessage(format!("server error: {error}")));
        }
        let signature = decode_b64(required(&attrs, 'v')?, "server signature")?;
        if signature != server_signature {
            return Err(AuthError::ServerSignatureMismatch);
        }
        self.state = ClientState::Complete;
        Ok(())
    }

    /// Whether the server has been verified.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self.state, ClientState::Complete)
    }
}

impl std::fmt::Debug for ScramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramClient")
            .field("client_first_bare", &self.client_first_bare)
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

/// Server side of a SCRAM-SHA-256 exchange for one stored password.
pub struct ScramServer {
    salt: Vec<u8>,
    iterations: u32,
    stored_key: [u8; 32],
    server_key: [u8; 32],
    user: Option<String>,
    nonce: Option<String>,
    first_messages: Option<String>,
}

impl ScramServer {
    /// Verifier for `password`, salted with `salt`.
    pub fn new(password: &str, salt: &[u8], iterations: u32) -> Result<Self, AuthError> {
        let salted = salted_password(password, salt, iterations)?;
        let client_key = hmac_sha256(&salted, b"Client Key")?;
        Ok(Self {
            salt: salt.to_vec(),
            iterations,
            stored_key: Sha256::digest(client_key).into(),
            server_key: hmac_sha256(&salted, b"Server Key")?,
            user: None,
            nonce: None,
            first_messages: None,
        })
    }

    /// User name sent by the client.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Process client-first and produce server-first.
    pub fn handle_client_first(&mut self, client_first: &str) -> Result<String, AuthError> {
        let bare = client_first
            .strip_prefix(GS2_HEADER)
            .ok_or_else(|| AuthError::MalformedMessage("channel binding not supported".into()))?;
        let attrs = attributes(bare)?;
        self.user = Some(unescape_name(required(&attrs, 'n')?));
        let nonce = format!("{}{}", required(&attrs, 'r')?, random_nonce());
        let server_first = format!(
            "r={nonce},s={},i={}",
            STANDARD.encode(&self.salt),
            self.iterations
        );
        self.first_messages = Some(format!("{bare},{server_first}"));
        self.nonce = Some(nonce);
        Ok(server_first)
    }

    /// Verify client-final and produce server-final.
    pub fn handle_client_final(&mut self, client_final: &str) -> Result<String, AuthError> {
        let (Some(nonce), Some(first)) = (&self.nonce, &self.first_messages) else {
            return Err(AuthError::OutOfOrder("client-final"));
        };
        let (without_proof, proof) = client_final
            .rsplit_once(",p=")
            .ok_or_else(|| AuthError::MalformedMessage("missing proof".into()))?;
        let attrs = attributes(without_proof)?;
        if required(&attrs, 'r')? != nonce {
            return Err(AuthError::NonceMismatch);
        }
        let proof = decode_b64(proof, "client proof")?;

        let auth_message = format!("{first},{without_proof}");
        let signature = hmac_sha256(&self.stored_key, auth_message.as_bytes())?;
        if proof.len() != signature.len() {
            return Err(AuthError::ClientProofMismatch);
        }
        let client_key: Vec<u8> = proof.iter().zip(signature).map(|(p, s)| p ^ s).collect();
        if Sha256::digest(&client_key).as_slice() != self.stored_key {
            return Err(AuthError::ClientProofMismatch);
        }
        let server_signature = hmac_sha256(&self.server_key, auth_message.as_bytes())?;
        Ok(format!("v={}", STANDARD.encode(server_signature)))
    }
}

impl std::fmt::Debug for ScramServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramServer")
            .field("iterations", &self.iterations)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}
