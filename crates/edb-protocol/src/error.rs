//! Protocol error types.

use thiserror::Error;

use crate::descriptors::TypeId;

/// Errors raised while parsing or producing wire protocol data.
///
/// Every variant indicates that the peer and the client disagree about the
/// byte stream, so the connection that produced it cannot be trusted anymore.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Input ended before a complete value could be read.
    #[error("truncated input: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// A frame declared a payload larger than the configured maximum.
    #[error("frame of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Declared payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Unknown message tag for the current direction.
    #[error("unknown message type 0x{0:02x}")]
    UnknownMessage(u8),

    /// Unknown type descriptor tag.
    #[error("unknown type descriptor tag 0x{tag:02x} at offset {offset}")]
    UnknownDescriptor {
        /// The offending tag.
        tag: u8,
        /// Offset of the record inside the descriptor block.
        offset: usize,
    },

    /// A descriptor references a type id that is not defined.
    #[error("descriptor {from} references unknown type {missing}")]
    UnresolvedReference {
        /// Descriptor holding the reference.
        from: TypeId,
        /// The id that could not be resolved.
        missing: TypeId,
    },

    /// The same type id was declared twice with different bodies.
    #[error("conflicting descriptors for type {0}")]
    ConflictingDescriptor(TypeId),

    /// The descriptor graph loops back on itself.
    #[error("descriptor cycle through type {0}")]
    DescriptorCycle(TypeId),

    /// Types nest deeper than the codec builder allows.
    #[error("type {id} nests deeper than {max} levels")]
    NestingTooDeep {
        /// Type at which the limit was hit.
        id: TypeId,
        /// Maximum depth.
        max: usize,
    },

    /// A base scalar id that the client does not know how to decode.
    #[error("unsupported base scalar type {0}")]
    UnsupportedScalar(TypeId),

    /// String data that is not valid UTF-8.
    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// An enumerated byte field carried an unexpected value.
    #[error("invalid {field} value 0x{value:02x}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Raw value received.
        value: u64,
    },

    /// A message had bytes left over after all fields were read.
    #[error("{extra} trailing bytes after {message}")]
    TrailingBytes {
        /// Name of the message.
        message: &'static str,
        /// Number of unread bytes.
        extra: usize,
    },

    /// A field was too long to encode with its length prefix.
    #[error("{field} too long to encode ({len} bytes)")]
    TooLong {
        /// Name of the field.
        field: &'static str,
        /// Length in bytes.
        len: usize,
    },

    /// A message arrived that is not valid in the current exchange.
    #[error("unexpected message {0} in this state")]
    UnexpectedMessage(&'static str),
}
