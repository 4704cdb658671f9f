//! # edb-protocol
//!
//! IO-agnostic implementation of the EdgeDB binary wire protocol.
//!
//! This crate contains frame layout, wire primitives, message structures and
//! the type descriptor parser. It performs no networking; `edb-codec` wraps
//! it for tokio and `edb-client` drives the session.
//!
//! ## Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use edb_protocol::{ClientMessage, Frame, DEFAULT_MAX_FRAME_SIZE};
//!
//! let mut buf = BytesMut::new();
//! ClientMessage::Sync.encode(&mut buf).unwrap();
//!
//! let frame = Frame::decode(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
//! assert_eq!(frame.tag, b'S');
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod descriptors;
pub mod error;
pub mod frame;
pub mod message;
pub mod version;

pub use descriptors::{
    Cardinality, DescriptorBlockBuilder, DescriptorBody, DescriptorKind, DescriptorSet,
    ShapeElement, ShapeElementFlags, TupleElement, TypeDescriptor, TypeId, ingest, parse_block,
    scalars,
};
pub use error::ProtocolError;
pub use frame::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, Frame, FrameHeader, write_frame};
pub use message::{
    Authentication, Capabilities, ClientHandshake, ClientMessage, CommandComplete,
    CommandDataDescription, CommandParams, CompilationFlags, ErrorResponse, Execute, LogMessage,
    OutputFormat, ProtocolExtension, ServerMessage, TransactionState, error_attr, error_code,
};
pub use version::ProtocolVersion;
