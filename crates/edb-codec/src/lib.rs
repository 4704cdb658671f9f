//! # edb-codec
//!
//! Async framing layer for the EdgeDB binary protocol.
//!
//! This crate turns a raw byte stream into [`Frame`](edb_protocol::Frame)s
//! and protocol messages, handling frames that span several reads.
//!
//! ## Architecture
//!
//! ```text
//! TCP/TLS stream → FrameCodec (framing) → FramedConnection → Client
//! ```
//!
//! `FramedConnection` splits the transport into read and write halves with
//! independent buffers.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod frame_codec;
pub mod framed;

pub use connection::FramedConnection;
pub use error::CodecError;
pub use frame_codec::FrameCodec;
pub use framed::{FrameReader, FrameWriter};
