//! Client error types.
//!
//! Every failure surfaces as an [`Error`]. [`Error::category`] sorts errors
//! into the classes callers usually branch on: configuration, connection,
//! authentication, protocol desync, query errors, transient contention and
//! pool exhaustion.

use std::fmt;
use std::io;

use edb_pool::PoolError;
use edb_protocol::{ErrorResponse, error_attr, error_code};
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No usable connection parameters.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Connecting and authenticating did not finish in time.
    #[error("connection timed out")]
    ConnectionTimeout,

    /// Command execution did not finish in time.
    #[error("command timed out")]
    CommandTimeout,

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Authentication(#[from] edb_auth::AuthError),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] edb_tls::TlsError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] edb_protocol::ProtocolError),

    /// Framing error.
    #[error("codec error: {0}")]
    Codec(#[from] edb_codec::CodecError),

    /// A result could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] edb_types::DecodeError),

    /// Arguments could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] edb_types::EncodeError),

    /// A value could not be converted to the requested Rust type.
    #[error("type error: {0}")]
    Type(#[from] edb_types::TypeError),

    /// The server reported an error.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A single-result query returned zero or several rows.
    #[error("expected exactly one result, got {0}")]
    ResultCardinality(usize),

    /// Transaction misuse.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// No pooled connection became available in time.
    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,

    /// The client was closed.
    #[error("client is closed")]
    PoolClosed,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse error classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Missing or invalid connection parameters.
    Configuration,
    /// Transport connect or handshake failure.
    Connection,
    /// Credentials rejected.
    Authentication,
    /// Client and server disagree about the wire format.
    Protocol,
    /// The query failed; a programmer or data error.
    Query,
    /// Contention or a dropped network link; safe to retry.
    Transient,
    /// Pool acquisition timed out.
    PoolTimeout,
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Connection(_) | Self::Tls(_) | Self::CommandTimeout | Self::PoolClosed => {
                ErrorCategory::Connection
            }
            Self::ConnectionClosed | Self::ConnectionTimeout => ErrorCategory::Transient,
            Self::Io(e) if is_transient_io(e) => ErrorCategory::Transient,
            Self::Io(_) => ErrorCategory::Connection,
            Self::Codec(e) if e.is_io() => ErrorCategory::Transient,
            Self::Http(e) if e.is_connect() || e.is_timeout() => ErrorCategory::Transient,
            Self::Http(_) => ErrorCategory::Connection,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::Protocol(_) | Self::Codec(_) | Self::Decode(_) => ErrorCategory::Protocol,
            Self::Encode(_) | Self::Type(_) | Self::ResultCardinality(_) | Self::Transaction(_) => {
                ErrorCategory::Query
            }
            Self::Server(e) => e.kind.category(),
            Self::PoolTimeout => ErrorCategory::PoolTimeout,
        }
    }

    /// Check if this error is transient and the operation may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Check if this error indicates a protocol desync.
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        self.category() == ErrorCategory::Protocol
    }

    /// Whether the connection that produced this error must be discarded.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Server(e) => e.is_fatal(),
            Self::ConnectionClosed
            | Self::ConnectionTimeout
            | Self::CommandTimeout
            | Self::Protocol(_)
            | Self::Codec(_)
            | Self::Decode(_)
            | Self::Tls(_)
            | Self::Http(_)
            | Self::Io(_) => true,
            _ => false,
        }
    }

    /// The server error code, if the server reported this error.
    #[must_use]
    pub fn server_code(&self) -> Option<u32> {
        match self {
            Self::Server(e) => Some(e.code),
            _ => None,
        }
    }

    /// The server error, if the server reported this error.
    #[must_use]
    pub fn as_server_error(&self) -> Option<&ServerError> {
        match self {
            Self::Server(e) => Some(e),
            _ => None,
        }
    }
}

fn is_transient_io(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

impl From<PoolError<Error>> for Error {
    fn from(e: PoolError<Error>) -> Self {
        match e {
            PoolError::AcquisitionTimeout(_) => Self::PoolTimeout,
            PoolError::PoolClosed => Self::PoolClosed,
            PoolError::Connection(e) => e,
            PoolError::Configuration(msg) => Self::Configuration(msg),
            other => Self::Connection(other.to_string()),
        }
    }
}

/// Server error classes, derived from the error code.
///
/// Codes are hierarchical: the leading byte names the family and the
/// following bytes refine it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ServerErrorKind {
    /// Internal server error.
    InternalServer,
    /// Unsupported feature.
    UnsupportedFeature,
    /// Arguments did not match the described input type.
    ParameterTypeMismatch,
    /// Session state type is stale.
    StateMismatch,
    /// Result cardinality did not match the expectation.
    ResultCardinalityMismatch,
    /// Other protocol errors.
    Protocol,
    /// Query syntax error.
    InvalidSyntax,
    /// Other query compilation errors.
    Query,
    /// Constraint or cardinality violation.
    Integrity,
    /// Concurrent transaction conflict.
    TransactionConflict,
    /// Serialization failure.
    TransactionSerialization,
    /// Deadlock detected.
    TransactionDeadlock,
    /// Other transaction errors.
    Transaction,
    /// Other execution errors.
    Execution,
    /// Server configuration error.
    Configuration,
    /// Authentication failed.
    Authentication,
    /// Access denied.
    Access,
    /// Server temporarily unavailable.
    Availability,
    /// Backend failure.
    Backend,
    /// Unknown code.
    Unknown,
}

impl ServerErrorKind {
    /// Map an error code to its kind.
    #[must_use]
    pub fn from_code(code: u32) -> Self {
        let family = code & 0xFF00_0000;
        let group = code & 0xFFFF_0000;
        let subgroup = code & 0xFFFF_FF00;
        match code {
            error_code::TRANSACTION_SERIALIZATION => return Self::TransactionSerialization,
            error_code::TRANSACTION_DEADLOCK => return Self::TransactionDeadlock,
            _ => {}
        }
        match subgroup {
            error_code::PARAMETER_TYPE_MISMATCH => return Self::ParameterTypeMismatch,
            error_code::STATE_MISMATCH => return Self::StateMismatch,
            error_code::TRANSACTION_CONFLICT => return Self::TransactionConflict,
            _ => {}
        }
        match group {
            error_code::RESULT_CARDINALITY_MISMATCH => return Self::ResultCardinalityMismatch,
            error_code::INVALID_SYNTAX => return Self::InvalidSyntax,
            error_code::INTEGRITY => return Self::Integrity,
            error_code::TRANSACTION => return Self::Transaction,
            error_code::AUTHENTICATION => return Self::Authentication,
            _ => {}
        }
        match family {
            error_code::INTERNAL_SERVER => Self::InternalServer,
            error_code::UNSUPPORTED_FEATURE => Self::UnsupportedFeature,
            error_code::PROTOCOL => Self::Protocol,
            error_code::QUERY => Self::Query,
            error_code::EXECUTION => Self::Execution,
            error_code::CONFIGURATION => Self::Configuration,
            error_code::ACCESS => Self::Access,
            error_code::AVAILABILITY => Self::Availability,
            error_code::BACKEND => Self::Backend,
            _ => Self::Unknown,
        }
    }

    /// The error class of this kind.
    #[must_use]
    pub fn category(self) -> ErrorCategory {
        match self {
            Self::TransactionConflict
            | Self::TransactionSerialization
            | Self::TransactionDeadlock
            | Self::Availability => ErrorCategory::Transient,
            Self::ParameterTypeMismatch
            | Self::StateMismatch
            | Self::ResultCardinalityMismatch
            | Self::Protocol => ErrorCategory::Protocol,
            Self::Authentication | Self::Access => ErrorCategory::Authentication,
            Self::InternalServer | Self::Backend => ErrorCategory::Connection,
            _ => ErrorCategory::Query,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::InternalServer => "InternalServerError",
            Self::UnsupportedFeature => "UnsupportedFeatureError",
            Self::ParameterTypeMismatch => "ParameterTypeMismatchError",
            Self::StateMismatch => "StateMismatchError",
            Self::ResultCardinalityMismatch => "ResultCardinalityMismatchError",
            Self::Protocol => "ProtocolError",
            Self::InvalidSyntax => "InvalidSyntaxError",
            Self::Query => "QueryError",
            Self::Integrity => "IntegrityError",
            Self::TransactionConflict => "TransactionConflictError",
            Self::TransactionSerialization => "TransactionSerializationError",
            Self::TransactionDeadlock => "TransactionDeadlockError",
            Self::Transaction => "TransactionError",
            Self::Execution => "ExecutionError",
            Self::Configuration => "ConfigurationError",
            Self::Authentication => "AuthenticationError",
            Self::Access => "AccessError",
            Self::Availability => "AvailabilityError",
            Self::Backend => "BackendError",
            Self::Unknown => "UnknownServerError",
        }
    }
}

impl fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An error reported by the server in an `ErrorResponse`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ServerError {
    /// Error class.
    pub kind: ServerErrorKind,
    /// Raw error code.
    pub code: u32,
    /// Severity byte.
    pub severity: u8,
    /// Error message.
    pub message: String,
    /// Suggested fix.
    pub hint: Option<String>,
    /// Additional details.
    pub details: Option<String>,
    /// Character offset of the offending query fragment.
    pub position: Option<u32>,
}

impl ServerError {
    /// Whether the server is closing the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity >= ErrorResponse::SEVERITY_FATAL
    }
}

impl From<ErrorResponse> for ServerError {
    fn from(e: ErrorResponse) -> Self {
        let text = |key| e.attribute(key).map(str::to_owned);
        let hint = text(error_attr::HINT);
        let details = text(error_attr::DETAILS);
        let position = e
            .attribute(error_attr::POSITION_START)
            .and_then(|p| p.parse().ok());
        Self {
            kind: ServerErrorKind::from_code(e.code),
            code: e.code,
            severity: e.severity,
            message: e.message,
            hint,
            details,
            position,
        }
    }
}

impl From<ErrorResponse> for Error {
    fn from(e: ErrorResponse) -> Self {
        Self::Server(e.into())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
