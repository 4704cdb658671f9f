//! Authentication error types.

use thiserror::Error;

/// Errors that can occur during authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The server asked for a method the client does not implement.
    #[error("unsupported authentication method: {0}")]
    UnsupportedMethod(String),

    /// A SCRAM message could not be parsed.
    #[error("malformed SCRAM message: {0}")]
    MalformedMessage(String),

    /// The server nonce does not extend the client nonce.
    #[error("server nonce does not match client nonce")]
    NonceMismatch,

    /// The server signature did not verify; the server does not know the password.
    #[error("server signature mismatch")]
    ServerSignatureMismatch,

    /// The client proof did not verify.
    #[error("client proof mismatch")]
    ClientProofMismatch,

    /// A step was called out of order.
    #[error("SCRAM exchange out of order: {0}")]
    OutOfOrder(&'static str),

    /// Credentials are missing a required part.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}
