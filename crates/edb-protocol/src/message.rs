//! Protocol messages.
//!
//! Messages travel as [`Frame`]s. [`ClientMessage`] covers everything the
//! client sends and [`ServerMessage`] everything it can receive. Both sides
//! implement encoding and decoding so that test servers can reuse them.
//!
//! A query runs as `Parse` (optional, to obtain type descriptors), then
//! `Execute`, then `Sync`. The server answers with an optional
//! `CommandDataDescription`, any number of `Data` messages, a
//! `CommandComplete` or `ErrorResponse`, and finally `ReadyForCommand`.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{
    Annotations, expect_end, read_annotations, read_bytes, read_string, read_u8, read_u16,
    read_u32, read_u64, read_uuid, write_annotations, write_bytes, write_string, write_uuid,
};
use crate::descriptors::{Cardinality, TypeId};
use crate::error::ProtocolError;
use crate::frame::{FRAME_HEADER_SIZE, Frame};
use crate::version::ProtocolVersion;

/// Message tags sent by the client.
pub mod client_tag {
    /// ClientHandshake.
    pub const HANDSHAKE: u8 = b'V';
    /// AuthenticationSASLInitialResponse.
    pub const SASL_INITIAL_RESPONSE: u8 = b'p';
    /// AuthenticationSASLResponse.
    pub const SASL_RESPONSE: u8 = b'r';
    /// Parse.
    pub const PARSE: u8 = b'P';
    /// Execute.
    pub const EXECUTE: u8 = b'O';
    /// Sync.
    pub const SYNC: u8 = b'S';
    /// Terminate.
    pub const TERMINATE: u8 = b'X';
}

/// Message tags sent by the server.
pub mod server_tag {
    /// ServerHandshake.
    pub const HANDSHAKE: u8 = b'v';
    /// Authentication.
    pub const AUTHENTICATION: u8 = b'R';
    /// ServerKeyData.
    pub const SERVER_KEY_DATA: u8 = b'K';
    /// ParameterStatus.
    pub const PARAMETER_STATUS: u8 = b'S';
    /// StateDataDescription.
    pub const STATE_DATA_DESCRIPTION: u8 = b's';
    /// ReadyForCommand.
    pub const READY_FOR_COMMAND: u8 = b'Z';
    /// CommandDataDescription.
    pub const COMMAND_DATA_DESCRIPTION: u8 = b'T';
    /// Data.
    pub const DATA: u8 = b'D';
    /// CommandComplete.
    pub const COMMAND_COMPLETE: u8 = b'C';
    /// ErrorResponse.
    pub const ERROR_RESPONSE: u8 = b'E';
    /// LogMessage.
    pub const LOG_MESSAGE: u8 = b'L';
}

/// Keys of the attributes carried by an [`ErrorResponse`].
pub mod error_attr {
    /// Hint for the user.
    pub const HINT: u16 = 0x0001;
    /// Extra details.
    pub const DETAILS: u16 = 0x0002;
    /// Server-side traceback.
    pub const SERVER_TRACEBACK: u16 = 0x0101;
    /// Start offset of the error in the query text.
    pub const POSITION_START: u16 = 0xFFF1;
    /// End offset of the error in the query text.
    pub const POSITION_END: u16 = 0xFFF2;
    /// One-based line of the error start.
    pub const LINE_START: u16 = 0xFFF3;
    /// One-based column of the error start.
    pub const COLUMN_START: u16 = 0xFFF4;
}

/// Server error codes.
///
/// Codes are hierarchical: each byte narrows the class of the one before,
/// so `0x05_03_01_01` is a transaction serialization error inside the
/// transaction conflict class.
pub mod error_code {
    /// Internal server error.
    pub const INTERNAL_SERVER: u32 = 0x01_00_00_00;
    /// Unsupported feature.
    pub const UNSUPPORTED_FEATURE: u32 = 0x02_00_00_00;
    /// Protocol error class.
    pub const PROTOCOL: u32 = 0x03_00_00_00;
    /// Arguments do not match the declared input type.
    pub const PARAMETER_TYPE_MISMATCH: u32 = 0x03_02_01_00;
    /// Session state does not match the declared state type.
    pub const STATE_MISMATCH: u32 = 0x03_02_02_00;
    /// Result cardinality differs from the expected one.
    pub const RESULT_CARDINALITY_MISMATCH: u32 = 0x03_03_00_00;
    /// Query error class.
    pub const QUERY: u32 = 0x04_00_00_00;
    /// Syntax error.
    pub const INVALID_SYNTAX: u32 = 0x04_01_00_00;
    /// Execution error class.
    pub const EXECUTION: u32 = 0x05_00_00_00;
    /// Integrity constraint violation.
    pub const INTEGRITY: u32 = 0x05_02_00_00;
    /// Transaction error class.
    pub const TRANSACTION: u32 = 0x05_03_00_00;
    /// Transaction conflict.
    pub const TRANSACTION_CONFLICT: u32 = 0x05_03_01_00;
    /// Transaction serialization failure.
    pub const TRANSACTION_SERIALIZATION: u32 = 0x05_03_01_01;
    /// Transaction deadlock.
    pub const TRANSACTION_DEADLOCK: u32 = 0x05_03_01_02;
    /// Configuration error class.
    pub const CONFIGURATION: u32 = 0x06_00_00_00;
    /// Access error class.
    pub const ACCESS: u32 = 0x07_00_00_00;
    /// Authentication failed.
    pub const AUTHENTICATION: u32 = 0x07_01_00_00;
    /// Availability error class.
    pub const AVAILABILITY: u32 = 0x08_00_00_00;
    /// Backend temporarily unavailable.
    pub const BACKEND_UNAVAILABLE: u32 = 0x08_00_00_01;
    /// Server going offline.
    pub const SERVER_OFFLINE: u32 = 0x08_00_00_02;
    /// Backend error class.
    pub const BACKEND: u32 = 0x09_00_00_00;
}

bitflags! {
    /// Capabilities a command may use or that a command was found to use.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u64 {
        /// Data modification.
        const MODIFICATIONS = 0x01;
        /// Session configuration changes.
        const SESSION_CONFIG = 0x02;
        /// Transaction control.
        const TRANSACTION = 0x04;
        /// Schema changes.
        const DDL = 0x08;
        /// Persistent configuration changes.
        const PERSISTENT_CONFIG = 0x10;
        /// Everything.
        const ALL = 0xffff_ffff_ffff_ffff;
    }
}

bitflags! {
    /// Compilation flags sent with `Parse` and `Execute`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CompilationFlags: u64 {
        /// Inject type ids into object output.
        const INJECT_OUTPUT_TYPE_IDS = 0x01;
        /// Inject type names into object output.
        const INJECT_OUTPUT_TYPE_NAMES = 0x02;
        /// Inject object ids into object output.
        const INJECT_OUTPUT_OBJECT_IDS = 0x04;
    }
}

/// Result encoding requested from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum OutputFormat {
    /// Binary values described by type descriptors.
    #[default]
    Binary = b'b',
    /// One JSON document holding the whole result.
    Json = b'j',
    /// One JSON document per result element.
    JsonElements = b'J',
    /// No output.
    None = b'n',
}

impl OutputFormat {
    /// Parse the wire byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            b'b' => Ok(Self::Binary),
            b'j' => Ok(Self::Json),
            b'J' => Ok(Self::JsonElements),
            b'n' => Ok(Self::None),
            _ => Err(ProtocolError::InvalidValue {
                field: "output format",
                value: u64::from(value),
            }),
        }
    }
}

/// Transaction status reported by `ReadyForCommand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransactionState {
    /// Not in a transaction block.
    NotInTransaction = b'I',
    /// In a transaction block.
    InTransaction = b'T',
    /// In a failed transaction block; only rollback is accepted.
    InFailedTransaction = b'E',
}

impl TransactionState {
    /// Parse the wire byte.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            b'I' => Ok(Self::NotInTransaction),
            b'T' => Ok(Self::InTransaction),
            b'E' => Ok(Self::InFailedTransaction),
            _ => Err(ProtocolError::InvalidValue {
                field: "transaction state",
                value: u64::from(value),
            }),
        }
    }
}

/// A named protocol extension offered in a handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolExtension {
    /// Extension name.
    pub name: String,
    /// Extension annotations.
    pub annotations: Annotations,
}

/// `ClientHandshake` message.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientHandshake {
    /// Requested protocol version.
    pub version: ProtocolVersion,
    /// Connection parameters (`user`, `database`, `branch`, `secret_key`).
    pub params: Vec<(String, String)>,
    /// Requested extensions.
    pub extensions: Vec<ProtocolExtension>,
}

impl ClientHandshake {
    /// Value of a connection parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Debug for ClientHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let params: Vec<(&str, &str)> = self
            .params
            .iter()
            .map(|(k, v)| {
                if k == "secret_key" {
                    (k.as_str(), "[REDACTED]")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("ClientHandshake")
            .field("version", &self.version)
            .field("params", &params)
            .field("extensions", &self.extensions)
            .finish()
    }
}

/// Fields shared by `Parse` and `Execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParams {
    /// Message annotations.
    pub annotations: Annotations,
    /// Capabilities the command is allowed to use.
    pub allowed_capabilities: Capabilities,
    /// Compilation flags.
    pub compilation_flags: CompilationFlags,
    /// Implicit `LIMIT` (0 for none).
    pub implicit_limit: u64,
    /// Result encoding.
    pub output_format: OutputFormat,
    /// Expected result cardinality.
    pub expected_cardinality: Cardinality,
    /// Command text.
    pub command_text: String,
    /// Session state type id.
    pub state_typedesc_id: TypeId,
    /// Encoded session state.
    pub state_data: Bytes,
}

impl CommandParams {
    /// Parameters for running `command_text` with default settings.
    #[must_use]
    pub fn new(command_text: impl Into<String>) -> Self {
        Self {
            annotations: Vec::new(),
            allowed_capabilities: Capabilities::ALL,
            compilation_flags: CompilationFlags::empty(),
            implicit_limit: 0,
            output_format: OutputFormat::Binary,
            expected_cardinality: Cardinality::Many,
            command_text: command_text.into(),
            state_typedesc_id: TypeId::NULL,
            state_data: Bytes::new(),
        }
    }

    fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        write_annotations(dst, &self.annotations)?;
        dst.put_u64(self.allowed_capabilities.bits());
        dst.put_u64(self.compilation_flags.bits());
        dst.put_u64(self.implicit_limit);
        dst.put_u8(self.output_format as u8);
        dst.put_u8(self.expected_cardinality as u8);
        write_string(dst, &self.command_text)?;
        write_uuid(dst, &self.state_typedesc_id.0);
        write_bytes(dst, &self.state_data)
    }

    fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            annotations: read_annotations(src)?,
            allowed_capabilities: Capabilities::from_bits_retain(read_u64(src)?),
            compilation_flags: CompilationFlags::from_bits_retain(read_u64(src)?),
            implicit_limit: read_u64(src)?,
            output_format: OutputFormat::from_u8(read_u8(src)?)?,
            expected_cardinality: Cardinality::from_u8(read_u8(src)?)?,
            command_text: read_string(src, "command text")?,
            state_typedesc_id: TypeId(read_uuid(src)?),
            state_data: read_bytes(src)?,
        })
    }
}

/// `Execute` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execute {
    /// Command parameters, identical to the preceding `Parse`.
    pub params: CommandParams,
    /// Input (argument) type id.
    pub input_typedesc_id: TypeId,
    /// Output type id.
    pub output_typedesc_id: TypeId,
    /// Arguments encoded with the input codec.
    pub arguments: Bytes,
}

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Open the session.
    Handshake(ClientHandshake),
    /// First SASL message.
    SaslInitialResponse {
        /// Chosen mechanism.
        method: String,
        /// Client-first message.
        data: Bytes,
    },
    /// Subsequent SASL message.
    SaslResponse {
        /// Client-final message.
        data: Bytes,
    },
    /// Compile a command and describe its types.
    Parse(CommandParams),
    /// Run a command.
    Execute(Execute),
    /// End of a command batch.
    Sync,
    /// Close the session.
    Terminate,
}

impl ClientMessage {
    /// Frame tag of this message.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Self::Handshake(_) => client_tag::HANDSHAKE,
            Self::SaslInitialResponse { .. } => client_tag::SASL_INITIAL_RESPONSE,
            Self::SaslResponse { .. } => client_tag::SASL_RESPONSE,
            Self::Parse(_) => client_tag::PARSE,
            Self::Execute(_) => client_tag::EXECUTE,
            Self::Sync => client_tag::SYNC,
            Self::Terminate => client_tag::TERMINATE,
        }
    }

    /// Append this message as a complete frame to `dst`.
    ///
    /// On error nothing is appended.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        encode_framed(self.tag(), dst, |buf| match self {
            Self::Handshake(hs) => {
                buf.put_u16(hs.version.major);
                buf.put_u16(hs.version.minor);
                buf.put_u16(count_u16(hs.params.len(), "handshake params")?);
                for (name, value) in &hs.params {
                    write_string(buf, name)?;
                    write_string(buf, value)?;
                }
                write_extensions(buf, &hs.extensions)
            }
            Self::SaslInitialResponse { method, data } => {
                write_string(buf, method)?;
                write_bytes(buf, data)
            }
            Self::SaslResponse { data } => write_bytes(buf, data),
            Self::Parse(params) => params.encode(buf),
            Self::Execute(exec) => {
                exec.params.encode(buf)?;
                write_uuid(buf, &exec.input_typedesc_id.0);
                write_uuid(buf, &exec.output_typedesc_id.0);
                write_bytes(buf, &exec.arguments)
            }
            Self::Sync | Self::Terminate => Ok(()),
        })
    }

    /// Decode a client message from a frame.
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        let mut src = frame.payload.clone();
        let (message, name) = match frame.tag {
            client_tag::HANDSHAKE => {
                let version = ProtocolVersion::new(read_u16(&mut src)?, read_u16(&mut src)?);
                let count = read_u16(&mut src)?;
                let mut params = Vec::new();
                for _ in 0..count {
                    let name = read_string(&mut src, "handshake param name")?;
                    let value = read_string(&mut src, "handshake param value")?;
                    params.push((name, value));
                }
                let extensions = read_extensions(&mut src)?;
                (
                    Self::Handshake(ClientHandshake {
                        version,
                        params,
                        extensions,
                    }),
                    "ClientHandshake",
                )
            }
            client_tag::SASL_INITIAL_RESPONSE => (
                Self::SaslInitialResponse {
                    method: read_string(&mut src, "SASL method")?,
                    data: read_bytes(&mut src)?,
                },
                "AuthenticationSASLInitialResponse",
            ),
            client_tag::SASL_RESPONSE => (
                Self::SaslResponse {
                    data: read_bytes(&mut src)?,
                },
                "AuthenticationSASLResponse",
            ),
            client_tag::PARSE => (Self::Parse(CommandParams::decode(&mut src)?), "Parse"),
            client_tag::EXECUTE => {
                let params = CommandParams::decode(&mut src)?;
                let input_typedesc_id = TypeId(read_uuid(&mut src)?);
                let output_typedesc_id = TypeId(read_uuid(&mut src)?);
                let arguments = read_bytes(&mut src)?;
                (
                    Self::Execute(Execute {
                        params,
                        input_typedesc_id,
                        output_typedesc_id,
                        arguments,
                    }),
                    "Execute",
                )
            }
            client_tag::SYNC => (Self::Sync, "Sync"),
            client_tag::TERMINATE => (Self::Terminate, "Terminate"),
            other => return Err(ProtocolError::UnknownMessage(other)),
        };
        expect_end(&src, name)?;
        Ok(message)
    }
}

/// `Authentication` message variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// Authentication succeeded.
    Ok,
    /// SASL is required; lists the acceptable mechanisms.
    Sasl {
        /// Mechanism names.
        methods: Vec<String>,
    },
    /// Server-first SASL message.
    SaslContinue {
        /// Mechanism data.
        data: Bytes,
    },
    /// Server-final SASL message.
    SaslFinal {
        /// Mechanism data.
        data: Bytes,
    },
}

impl Authentication {
    const OK: u32 = 0;
    const SASL: u32 = 10;
    const SASL_CONTINUE: u32 = 11;
    const SASL_FINAL: u32 = 12;
}

/// `CommandDataDescription` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDataDescription {
    /// Message annotations.
    pub annotations: Annotations,
    /// Capabilities the command uses.
    pub capabilities: Capabilities,
    /// Actual result cardinality.
    pub result_cardinality: Cardinality,
    /// Argument type id.
    pub input_typedesc_id: TypeId,
    /// Descriptor block for the arguments.
    pub input_typedesc: Bytes,
    /// Result type id.
    pub output_typedesc_id: TypeId,
    /// Descriptor block for the result.
    pub output_typedesc: Bytes,
}

/// `CommandComplete` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComplete {
    /// Message annotations.
    pub annotations: Annotations,
    /// Capabilities the command used.
    pub capabilities: Capabilities,
    /// Status tag, e.g. `SELECT` or `START TRANSACTION`.
    pub status: String,
    /// Session state type id after the command.
    pub state_typedesc_id: TypeId,
    /// Encoded session state after the command.
    pub state_data: Bytes,
}

/// `ErrorResponse` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Severity (120 error, 200 fatal, 255 panic).
    pub severity: u8,
    /// Error code.
    pub code: u32,
    /// Message text.
    pub message: String,
    /// Additional attributes keyed by [`error_attr`] constants.
    pub attributes: Vec<(u16, Bytes)>,
}

impl ErrorResponse {
    /// Severity of a regular error.
    pub const SEVERITY_ERROR: u8 = 120;
    /// Severity of an error that terminates the session.
    pub const SEVERITY_FATAL: u8 = 200;

    /// Create an error with severity "error" and no attributes.
    #[must_use]
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            severity: Self::SEVERITY_ERROR,
            code,
            message: message.into(),
            attributes: Vec::new(),
        }
    }

    /// Attach an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: u16, value: impl Into<Bytes>) -> Self {
        self.attributes.push((key, value.into()));
        self
    }

    /// Attribute value as UTF-8 text.
    #[must_use]
    pub fn attribute(&self, key: u16) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| std::str::from_utf8(v).ok())
    }

    /// Whether the server is going to close the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity >= Self::SEVERITY_FATAL
    }
}

/// `LogMessage` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    /// Severity (20 debug, 40 info, 60 notice, 80 warning).
    pub severity: u8,
    /// Message code.
    pub code: u32,
    /// Message text.
    pub text: String,
    /// Message annotations.
    pub annotations: Annotations,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Version negotiation result.
    Handshake {
        /// Version chosen by the server.
        version: ProtocolVersion,
        /// Accepted extensions.
        extensions: Vec<ProtocolExtension>,
    },
    /// Authentication step.
    Authentication(Authentication),
    /// Opaque key for out-of-band requests.
    ServerKeyData([u8; 32]),
    /// Server parameter.
    ParameterStatus {
        /// Parameter name.
        name: Bytes,
        /// Parameter value.
        value: Bytes,
    },
    /// Session state type description.
    StateDataDescription {
        /// State type id.
        typedesc_id: TypeId,
        /// Descriptor block.
        typedesc: Bytes,
    },
    /// Server is ready for the next command.
    ReadyForCommand {
        /// Message annotations.
        annotations: Annotations,
        /// Transaction status.
        transaction_state: TransactionState,
    },
    /// Type description of a command.
    CommandDataDescription(CommandDataDescription),
    /// Result data; one element per result row.
    Data(Vec<Bytes>),
    /// Command finished successfully.
    CommandComplete(CommandComplete),
    /// Command or session failed.
    ErrorResponse(ErrorResponse),
    /// Informational server log.
    LogMessage(LogMessage),
}

impl ServerMessage {
    /// Frame tag of this message.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Self::Handshake { .. } => server_tag::HANDSHAKE,
            Self::Authentication(_) => server_tag::AUTHENTICATION,
            Self::ServerKeyData(_) => server_tag::SERVER_KEY_DATA,
            Self::ParameterStatus { .. } => server_tag::PARAMETER_STATUS,
            Self::StateDataDescription { .. } => server_tag::STATE_DATA_DESCRIPTION,
            Self::ReadyForCommand { .. } => server_tag::READY_FOR_COMMAND,
            Self::CommandDataDescription(_) => server_tag::COMMAND_DATA_DESCRIPTION,
            Self::Data(_) => server_tag::DATA,
            Self::CommandComplete(_) => server_tag::COMMAND_COMPLETE,
            Self::ErrorResponse(_) => server_tag::ERROR_RESPONSE,
            Self::LogMessage(_) => server_tag::LOG_MESSAGE,
        }
    }

    /// Short name of the message, for logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        name_of(self.tag())
    }

    /// Decode a server message from a frame.
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        let mut src = frame.payload.clone();
        let src = &mut src;
        let message = match frame.tag {
            server_tag::HANDSHAKE => Self::Handshake {
                version: ProtocolVersion::new(read_u16(src)?, read_u16(src)?),
                extensions: read_extensions(src)?,
            },
            server_tag::AUTHENTICATION => {
                let auth = match read_u32(src)? {
                    Authentication::OK => Authentication::Ok,
                    Authentication::SASL => {
                        let count = read_u32(src)?;
                        let mut methods = Vec::new();
                        for _ in 0..count {
                            methods.push(read_string(src, "SASL method")?);
                        }
                        Authentication::Sasl { methods }
                    }
                    Authentication::SASL_CONTINUE => Authentication::SaslContinue {
                        data: read_bytes(src)?,
                    },
                    Authentication::SASL_FINAL => Authentication::SaslFinal {
                        data: read_bytes(src)?,
                    },
                    other => {
                        return Err(ProtocolError::InvalidValue {
                            field: "authentication status",
                            value: u64::from(other),
                        });
                    }
                };
                Self::Authentication(auth)
            }
            server_tag::SERVER_KEY_DATA => {
                crate::codec::ensure(src, 32)?;
                let mut key = [0u8; 32];
                src.copy_to_slice(&mut key);
                Self::ServerKeyData(key)
            }
            server_tag::PARAMETER_STATUS => Self::ParameterStatus {
                name: read_bytes(src)?,
                value: read_bytes(src)?,
            },
            server_tag::STATE_DATA_DESCRIPTION => Self::StateDataDescription {
                typedesc_id: TypeId(read_uuid(src)?),
                typedesc: read_bytes(src)?,
            },
            server_tag::READY_FOR_COMMAND => Self::ReadyForCommand {
                annotations: read_annotations(src)?,
                transaction_state: TransactionState::from_u8(read_u8(src)?)?,
            },
            server_tag::COMMAND_DATA_DESCRIPTION => {
                Self::CommandDataDescription(CommandDataDescription {
                    annotations: read_annotations(src)?,
                    capabilities: Capabilities::from_bits_retain(read_u64(src)?),
                    result_cardinality: Cardinality::from_u8(read_u8(src)?)?,
                    input_typedesc_id: TypeId(read_uuid(src)?),
                    input_typedesc: read_bytes(src)?,
                    output_typedesc_id: TypeId(read_uuid(src)?),
                    output_typedesc: read_bytes(src)?,
                })
            }
            server_tag::DATA => {
                let count = read_u16(src)?;
                let mut elements = Vec::with_capacity(usize::from(count).min(src.remaining() / 4));
                for _ in 0..count {
                    elements.push(read_bytes(src)?);
                }
                Self::Data(elements)
            }
            server_tag::COMMAND_COMPLETE => Self::CommandComplete(CommandComplete {
                annotations: read_annotations(src)?,
                capabilities: Capabilities::from_bits_retain(read_u64(src)?),
                status: read_string(src, "command status")?,
                state_typedesc_id: TypeId(read_uuid(src)?),
                state_data: read_bytes(src)?,
            }),
            server_tag::ERROR_RESPONSE => {
                let severity = read_u8(src)?;
                let code = read_u32(src)?;
                let message = read_string(src, "error message")?;
                let count = read_u16(src)?;
                let mut attributes = Vec::new();
                for _ in 0..count {
                    let key = read_u16(src)?;
                    attributes.push((key, read_bytes(src)?));
                }
                Self::ErrorResponse(ErrorResponse {
                    severity,
                    code,
                    message,
                    attributes,
                })
            }
            server_tag::LOG_MESSAGE => Self::LogMessage(LogMessage {
                severity: read_u8(src)?,
                code: read_u32(src)?,
                text: read_string(src, "log text")?,
                annotations: read_annotations(src)?,
            }),
            other => return Err(ProtocolError::UnknownMessage(other)),
        };
        expect_end(src, name_of(frame.tag))?;
        Ok(message)
    }

    /// Append this message as a complete frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        encode_framed(self.tag(), dst, |buf| {
            match self {
                Self::Handshake {
                    version,
                    extensions,
                } => {
                    buf.put_u16(version.major);
                    buf.put_u16(version.minor);
                    write_extensions(buf, extensions)?;
                }
                Self::Authentication(auth) => match auth {
                    Authentication::Ok => buf.put_u32(Authentication::OK),
                    Authentication::Sasl { methods } => {
                        buf.put_u32(Authentication::SASL);
                        buf.put_u32(count_u32(methods.len(), "SASL methods")?);
                        for method in methods {
                            write_string(buf, method)?;
                        }
                    }
                    Authentication::SaslContinue { data } => {
                        buf.put_u32(Authentication::SASL_CONTINUE);
                        write_bytes(buf, data)?;
                    }
                    Authentication::SaslFinal { data } => {
                        buf.put_u32(Authentication::SASL_FINAL);
                        write_bytes(buf, data)?;
                    }
                },
                Self::ServerKeyData(key) => buf.put_slice(key),
                Self::ParameterStatus { name, value } => {
                    write_bytes(buf, name)?;
                    write_bytes(buf, value)?;
                }
                Self::StateDataDescription {
                    typedesc_id,
                    typedesc,
                } => {
                    write_uuid(buf, &typedesc_id.0);
                    write_bytes(buf, typedesc)?;
                }
                Self::ReadyForCommand {
                    annotations,
                    transaction_state,
                } => {
                    write_annotations(buf, annotations)?;
                    buf.put_u8(*transaction_state as u8);
                }
                Self::CommandDataDescription(desc) => {
                    write_annotations(buf, &desc.annotations)?;
                    buf.put_u64(desc.capabilities.bits());
                    buf.put_u8(desc.result_cardinality as u8);
                    write_uuid(buf, &desc.input_typedesc_id.0);
                    write_bytes(buf, &desc.input_typedesc)?;
                    write_uuid(buf, &desc.output_typedesc_id.0);
                    write_bytes(buf, &desc.output_typedesc)?;
                }
                Self::Data(elements) => {
                    buf.put_u16(count_u16(elements.len(), "data elements")?);
                    for element in elements {
                        write_bytes(buf, element)?;
                    }
                }
                Self::CommandComplete(done) => {
                    write_annotations(buf, &done.annotations)?;
                    buf.put_u64(done.capabilities.bits());
                    write_string(buf, &done.status)?;
                    write_uuid(buf, &done.state_typedesc_id.0);
                    write_bytes(buf, &done.state_data)?;
                }
                Self::ErrorResponse(err) => {
                    buf.put_u8(err.severity);
                    buf.put_u32(err.code);
                    write_string(buf, &err.message)?;
                    buf.put_u16(count_u16(err.attributes.len(), "error attributes")?);
                    for (key, value) in &err.attributes {
                        buf.put_u16(*key);
                        write_bytes(buf, value)?;
                    }
                }
                Self::LogMessage(log) => {
                    buf.put_u8(log.severity);
                    buf.put_u32(log.code);
                    write_string(buf, &log.text)?;
                    write_annotations(buf, &log.annotations)?;
                }
            }
            Ok(())
        })
    }
}

fn name_of(tag: u8) -> &'static str {
    match tag {
        server_tag::HANDSHAKE => "ServerHandshake",
        server_tag::AUTHENTICATION => "Authentication",
        server_tag::SERVER_KEY_DATA => "ServerKeyData",
        server_tag::PARAMETER_STATUS => "ParameterStatus",
        server_tag::STATE_DATA_DESCRIPTION => "StateDataDescription",
        server_tag::READY_FOR_COMMAND => "ReadyForCommand",
        server_tag::COMMAND_DATA_DESCRIPTION => "CommandDataDescription",
        server_tag::DATA => "Data",
        server_tag::COMMAND_COMPLETE => "CommandComplete",
        server_tag::ERROR_RESPONSE => "ErrorResponse",
        server_tag::LOG_MESSAGE => "LogMessage",
        _ => "unknown message",
    }
}

fn count_u16(len: usize, field: &'static str) -> Result<u16, ProtocolError> {
    u16::try_from(len).map_err(|_| ProtocolError::TooLong { field, len })
}

fn count_u32(len: usize, field: &'static str) -> Result<u32, ProtocolError> {
    u32::try_from(len).map_err(|_| ProtocolError::TooLong { field, len })
}

fn write_extensions(
    dst: &mut BytesMut,
    extensions: &[ProtocolExtension],
) -> Result<(), ProtocolError> {
    dst.put_u16(count_u16(extensions.len(), "protocol extensions")?);
    for ext in extensions {
        write_string(dst, &ext.name)?;
        write_annotations(dst, &ext.annotations)?;
    }
    Ok(())
}

fn read_extensions(src: &mut Bytes) -> Result<Vec<ProtocolExtension>, ProtocolError> {
    let count = read_u16(src)?;
    let mut out = Vec::new();
    for _ in 0..count {
        out.push(ProtocolExtension {
            name: read_string(src, "extension name")?,
            annotations: read_annotations(src)?,
        });
    }
    Ok(out)
}

/// Write a frame header, let `body` fill in the payload, then patch the
/// length. Rolls `dst` back if `body` fails.
fn encode_framed<F>(tag: u8, dst: &mut BytesMut, body: F) -> Result<(), ProtocolError>
where
    F: FnOnce(&mut BytesMut) -> Result<(), ProtocolError>,
{
    let start = dst.len();
    dst.put_u8(tag);
    dst.put_u32(0);
    if let Err(e) = body(dst) {
        dst.truncate(start);
        return Err(e);
    }
    let payload_len = dst.len() - start - FRAME_HEADER_SIZE;
    let Ok(length) = u32::try_from(payload_len) else {
        dst.truncate(start);
        return Err(ProtocolError::TooLong {
            field: "frame payload",
            len: payload_len,
        });
    };
    dst[start + 1..start + FRAME_HEADER_SIZE].copy_from_slice(&length.to_be_bytes());
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::descriptors::scalars;
    use crate::frame::DEFAULT_MAX_FRAME_SIZE;

    fn roundtrip_server(msg: &ServerMessage) -> ServerMessage {
        let mut buf = BytesMut::new();
        msg.encode(&mut buf).unwrap();
        let frame = Frame::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert!(buf.is_empty());
        ServerMessage::decode(&frame).unwrap()
    }

    #[test]
    fn test_sync_is_empty_frame() {
        let mut buf = BytesMut::new();
        ClientMessage::Sync.encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[b'S', 0, 0, 0, 0]);
    }

    #[test]
    fn test_execute_roundtrip() {
        let msg = ClientMessage::Execute(Execute {
            params: CommandParams::new("select <int64>$0"),
            input_typedesc_id: TypeId::from_u128(0x1234),
            output_typedesc_id: scalars::INT64,
            arguments: Bytes::from_static(&[0, 0, 0, 0]),
        });
        let mut buf = BytesMut::new();
        msg.encode(&mut buf).unwrap();
        let frame = Frame::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(frame.tag, b'O');
        assert_eq!(ClientMessage::decode(&frame).unwrap(), msg);
    }

    #[test]
    fn test_handshake_debug_redacts_secret_key() {
        let hs = ClientHandshake {
            version: ProtocolVersion::V1_0,
            params: vec![
                ("user".into(), "admin".into()),
                ("secret_key".into(), "nbwt1_very_secret".into()),
            ],
            extensions: Vec::new(),
        };
        let rendered = format!("{hs:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("very_secret"));
        assert_eq!(hs.param("user"), Some("admin"));
    }

    #[test]
    fn test_server_messages_roundtrip() {
        let messages = vec![
            ServerMessage::Handshake {
                version: ProtocolVersion::new(1, 0),
                extensions: Vec::new(),
            },
            ServerMessage::Authentication(Authentication::Sasl {
                methods: vec!["SCRAM-SHA-256".into()],
            }),
            ServerMessage::Authentication(Authentication::Ok),
            ServerMessage::ServerKeyData([7; 32]),
            ServerMessage::ReadyForCommand {
                annotations: Vec::new(),
                transaction_state: TransactionState::InTransaction,
            },
            ServerMessage::Data(vec![Bytes::from_static(b"\x00\x00\x00\x01")]),
            ServerMessage::ErrorResponse(
                ErrorResponse::new(0x0401_0000, "syntax error")
                    .with_attribute(error_attr::HINT, "missing semicolon"),
            ),
            ServerMessage::LogMessage(LogMessage {
                severity: 40,
                code: 0,
                text: "hello".into(),
                annotations: Vec::new(),
            }),
        ];
        for msg in &messages {
            assert_eq!(&roundtrip_server(msg), msg);
        }
    }

    #[test]
    fn test_error_response_attributes() {
        let err = ErrorResponse::new(0x0401_0000, "bad")
            .with_attribute(error_attr::HINT, "try again")
            .with_attribute(error_attr::POSITION_START, "7");
        assert_eq!(err.attribute(error_attr::HINT), Some("try again"));
        assert_eq!(err.attribute(error_attr::POSITION_START), Some("7"));
        assert_eq!(err.attribute(error_attr::DETAILS), None);
        assert!(!err.is_fatal());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_counts_beyond_u32_rejected() {
        let len = usize::try_from(u64::from(u32::MAX) + 1).unwrap();
        assert!(matches!(
            count_u32(len, "SASL methods"),
            Err(ProtocolError::TooLong { field: "SASL methods", .. })
        ));
        assert_eq!(count_u32(3, "SASL methods").unwrap(), 3);
    }

    #[test]
    fn test_unknown_server_tag() {
        let frame = Frame::new(b'?', Bytes::new());
        assert_eq!(
            ServerMessage::decode(&frame).unwrap_err(),
            ProtocolError::UnknownMessage(b'?')
        );
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let frame = Frame::new(b'Z', Bytes::from_static(&[0, 0, b'I', 0xAA]));
        assert_eq!(
            ServerMessage::decode(&frame).unwrap_err(),
            ProtocolError::TrailingBytes {
                message: "ReadyForCommand",
                extra: 1
            }
        );
    }

    #[test]
    fn test_invalid_transaction_state() {
        let frame = Frame::new(b'Z', Bytes::from_static(&[0, 0, b'Q']));
        assert!(matches!(
            ServerMessage::decode(&frame),
            Err(ProtocolError::InvalidValue {
                field: "transaction state",
                ..
            })
        ));
    }
}
