//! Frame codec for tokio-util framing.

use bytes::BytesMut;
use edb_protocol::{ClientMessage, DEFAULT_MAX_FRAME_SIZE, Frame, ServerMessage};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Splits a byte stream into [`Frame`]s and writes frames and messages back.
///
/// Decoding rejects frames whose declared payload exceeds the configured
/// maximum before buffering the payload.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Create a codec with the default maximum frame size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the maximum accepted payload size.
    #[must_use]
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Maximum accepted payload size.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = Frame::decode(src, self.max_frame_size)? else {
            return Ok(None);
        };

        tracing::trace!(
            tag = %char::from(frame.tag),
            length = frame.payload.len(),
            "decoded frame"
        );

        Ok(Some(frame))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(CodecError::ConnectionClosed {
                buffered: buf.len(),
            }),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst)?;
        tracing::trace!(
            tag = %char::from(item.tag),
            length = item.payload.len(),
            "encoded frame"
        );
        Ok(())
    }
}

impl Encoder<ClientMessage> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ClientMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        item.encode(dst)?;
        tracing::trace!(
            tag = %char::from(item.tag()),
            length = dst.len() - start,
            "encoded client message"
        );
        Ok(())
    }
}

impl Encoder<ServerMessage> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: ServerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        item.encode(dst)?;
        tracing::trace!(
            message = item.name(),
            length = dst.len() - start,
            "encoded server message"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use edb_protocol::ProtocolError;

    #[test]
    fn test_decode_frame() {
        let mut codec = FrameCodec::new();
        let mut data = BytesMut::new();
        data.put_u8(b'D');
        data.put_u32(4);
        data.put_slice(b"test");

        let frame = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(frame.tag, b'D');
        assert_eq!(&frame.payload[..], b"test");
    }

    #[test]
    fn test_encode_message() {
        let mut codec = FrameCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(ClientMessage::Terminate, &mut dst).unwrap();
        assert_eq!(&dst[..], &[b'X', 0, 0, 0, 0]);
    }

    #[test]
    fn test_incomplete_frame() {
        let mut codec = FrameCodec::new();
        let mut data = BytesMut::new();
        data.put_u8(b'D');
        data.put_u32(12);
        data.put_slice(b"part");

        assert!(codec.decode(&mut data).unwrap().is_none());
    }

    #[test]
    fn test_eof_mid_frame() {
        let mut codec = FrameCodec::new();
        let mut data = BytesMut::from(&[b'D', 0, 0][..]);
        let err = codec.decode_eof(&mut data).unwrap_err();
        assert!(matches!(err, CodecError::ConnectionClosed { buffered: 3 }));
        assert!(err.is_io());
    }

    #[test]
    fn test_max_frame_size() {
        let mut codec = FrameCodec::new().with_max_frame_size(8);
        let mut data = BytesMut::new();
        data.put_u8(b'D');
        data.put_u32(9);
        assert!(matches!(
            codec.decode(&mut data),
            Err(CodecError::Protocol(ProtocolError::FrameTooLarge { size: 9, max: 8 }))
        ));
    }
}
