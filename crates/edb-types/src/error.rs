//! Value conversion error types.

use thiserror::Error;

/// Errors raised while decoding a value from its wire form.
///
/// A decode error means the payload does not match the type descriptor it
/// was announced with, so the connection is out of sync with the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// Payload ended early.
    #[error("truncated value: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes needed.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// Bytes were left after the value was decoded.
    #[error("{extra} trailing bytes after {kind} value")]
    TrailingBytes {
        /// Value kind.
        kind: &'static str,
        /// Unread byte count.
        extra: usize,
    },

    /// Element count differs from the descriptor arity.
    #[error("{kind} arity mismatch: descriptor declares {expected} elements, payload has {actual}")]
    ArityMismatch {
        /// Composite kind.
        kind: &'static str,
        /// Declared arity.
        expected: usize,
        /// Count found in the payload.
        actual: i64,
    },

    /// A fixed-width scalar had the wrong length.
    #[error("{kind} must be {expected} bytes, got {actual}")]
    InvalidLength {
        /// Scalar kind.
        kind: &'static str,
        /// Expected width.
        expected: usize,
        /// Actual width.
        actual: usize,
    },

    /// A negative length other than the "absent" marker.
    #[error("invalid element length {0}")]
    NegativeLength(i32),

    /// Boolean byte other than 0 or 1.
    #[error("invalid bool byte 0x{0:02x}")]
    InvalidBool(u8),

    /// Text that is not UTF-8.
    #[error("invalid UTF-8 in {0} value")]
    InvalidUtf8(&'static str),

    /// JSON payload with an unknown format byte.
    #[error("unsupported json format {0}")]
    InvalidJsonFormat(u8),

    /// Value outside the representable range.
    #[error("{0} value out of range")]
    OutOfRange(&'static str),

    /// Enum label not declared by the type.
    #[error("unknown enum member {0:?}")]
    UnknownEnumMember(String),

    /// Array with an unsupported number of dimensions.
    #[error("unsupported array dimensions {0}")]
    InvalidDimensions(i32),

    /// Range flags with unknown bits.
    #[error("invalid range flags 0x{0:02x}")]
    InvalidRangeFlags(u8),

    /// A tuple element was absent.
    #[error("tuple element {0} is missing")]
    MissingElement(usize),

    /// An object field with required cardinality was absent.
    #[error("required field {0:?} is missing")]
    MissingRequired(String),
}

/// Errors raised while encoding a value or arguments.
///
/// Encoding is atomic: when it fails, nothing has been appended to the
/// output buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum EncodeError {
    /// Value kind does not fit the codec.
    #[error("cannot encode {actual} as {expected}")]
    TypeMismatch {
        /// Kind the codec expects.
        expected: &'static str,
        /// Kind of the value given.
        actual: &'static str,
    },

    /// Composite value has the wrong number of elements.
    #[error("{kind} arity mismatch: expected {expected} elements, got {actual}")]
    ArityMismatch {
        /// Composite kind.
        kind: &'static str,
        /// Declared arity.
        expected: usize,
        /// Elements supplied.
        actual: usize,
    },

    /// A numeric value does not fit the target type.
    #[error("value out of range for {0}")]
    OutOfRange(&'static str),

    /// Enum label not declared by the type.
    #[error("unknown enum member {0:?}")]
    UnknownEnumMember(String),

    /// Required argument was not supplied.
    #[error("missing argument {0:?}")]
    MissingArgument(String),

    /// Argument not declared by the query.
    #[error("unexpected argument {0:?}")]
    UnexpectedArgument(String),

    /// Named arguments given where positional were expected, or vice versa.
    #[error("query expects {expected} arguments")]
    ArgumentStyle {
        /// `"positional"` or `"named"`.
        expected: &'static str,
    },

    /// Range flags contradict its bounds.
    #[error("invalid range: {0}")]
    InvalidRange(&'static str),

    /// Encoded element exceeds the length prefix.
    #[error("value too long to encode ({0} bytes)")]
    TooLong(usize),
}

/// Errors converting a decoded [`Value`](crate::Value) into a Rust type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TypeError {
    /// The value was the empty set.
    #[error("unexpected empty value")]
    UnexpectedNothing,

    /// The value has a different kind.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Rust type requested.
        expected: &'static str,
        /// Kind of the value.
        actual: &'static str,
    },

    /// Numeric value does not fit the target type.
    #[error("value out of range for {target_type}")]
    OutOfRange {
        /// Target type name.
        target_type: &'static str,
    },

    /// Tuple length differs from the target tuple.
    #[error("expected a tuple of {expected} elements, got {actual}")]
    TupleLength {
        /// Target tuple arity.
        expected: usize,
        /// Actual tuple length.
        actual: usize,
    },

    /// Embedded JSON could not be parsed.
    #[error("invalid json: {0}")]
    InvalidJson(String),
}
