//! Frame layout shared by both directions of the protocol.
//!
//! A frame is a one byte message tag, a four byte big-endian payload length
//! and the payload itself. The length covers the payload only.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Frame header size in bytes (tag plus length).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Default upper bound on a single frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame header: message tag and payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Message type tag.
    pub tag: u8,
    /// Payload length, excluding the header.
    pub length: u32,
}

impl FrameHeader {
    /// Peek a header from the front of `src` without consuming it.
    ///
    /// Returns `None` when fewer than [`FRAME_HEADER_SIZE`] bytes are buffered.
    #[must_use]
    pub fn peek(src: &[u8]) -> Option<Self> {
        if src.len() < FRAME_HEADER_SIZE {
            return None;
        }
        Some(Self {
            tag: src[0],
            length: u32::from_be_bytes([src[1], src[2], src[3], src[4]]),
        })
    }

    /// Encode the header.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.tag);
        dst.put_u32(self.length);
    }

    /// Total frame size including the header.
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.length as usize
    }
}

/// A complete frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type tag.
    pub tag: u8,
    /// Raw payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame from a tag and payload.
    pub fn new(tag: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    /// Write this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        write_frame(self.tag, &self.payload, dst)
    }

    /// Try to split one frame off the front of `src`.
    ///
    /// Returns `Ok(None)` when the buffer holds less than a full frame; the
    /// buffered bytes are left untouched so the caller can append more data
    /// and try again. Frames declaring more than `max_size` payload bytes are
    /// rejected before any of the payload is buffered.
    pub fn decode(src: &mut BytesMut, max_size: usize) -> Result<Option<Self>, ProtocolError> {
        let Some(header) = FrameHeader::peek(src) else {
            return Ok(None);
        };

        let length = header.length as usize;
        if length > max_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: max_size,
            });
        }

        if src.len() < header.frame_len() {
            src.reserve(header.frame_len() - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_SIZE);
        let payload = src.split_to(length).freeze();
        Ok(Some(Self {
            tag: header.tag,
            payload,
        }))
    }

    /// Total encoded size.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}

/// Write one frame with the given tag and payload.
pub fn write_frame(tag: u8, payload: &[u8], dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let length = u32::try_from(payload.len()).map_err(|_| ProtocolError::TooLong {
        field: "frame payload",
        len: payload.len(),
    })?;
    dst.reserve(FRAME_HEADER_SIZE + payload.len());
    FrameHeader { tag, length }.encode(dst);
    dst.put_slice(payload);
    Ok(())
}
