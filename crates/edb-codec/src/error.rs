//! Codec error types.

use edb_protocol::ProtocolError;
use thiserror::Error;

/// Errors from the framing layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// The byte stream violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the transport in the middle of a frame.
    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    ConnectionClosed {
        /// Bytes of the incomplete frame.
        buffered: usize,
    },
}

impl CodecError {
    /// Whether the error came from the transport rather than the peer's data.
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ConnectionClosed { .. })
    }
}
