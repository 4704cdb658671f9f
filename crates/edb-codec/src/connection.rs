//! Split I/O connection.
//!
//! The transport is split into read and write halves, each with its own
//! frame buffer, so a command batch can be queued on the writer while the
//! reader still holds a partially received frame.

use edb_protocol::{ClientMessage, Frame, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::Encoder;

use crate::error::CodecError;
use crate::frame_codec::FrameCodec;
use crate::framed::{FrameReader, FrameWriter};

/// A framed protocol connection over any async transport.
///
/// Used by the client (reading [`ServerMessage`]s) and by test servers
/// (reading [`ClientMessage`]s).
pub struct FramedConnection<T>
where
    T: AsyncRead + AsyncWrite,
{
    reader: FrameReader<ReadHalf<T>>,
    writer: FrameWriter<WriteHalf<T>>,
}

impl<T> FramedConnection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a connection with the default maximum frame size.
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, FrameCodec::new())
    }

    /// Create a connection with a custom read codec.
    pub fn with_codec(transport: T, codec: FrameCodec) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        Self {
            reader: FrameReader::with_codec(read_half, codec),
            writer: FrameWriter::new(write_half),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the peer closed the transport between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        match self.reader.next().await {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }

    /// Read and decode the next server message.
    pub async fn read_server_message(&mut self) -> Result<Option<ServerMessage>, CodecError> {
        let Some(frame) = self.read_frame().await? else {
            return Ok(None);
        };
        let message = ServerMessage::decode(&frame)?;
        tracing::trace!(message = message.name(), "received server message");
        Ok(Some(message))
    }

    /// Read and decode the next client message.
    pub async fn read_client_message(&mut self) -> Result<Option<ClientMessage>, CodecError> {
        let Some(frame) = self.read_frame().await? else {
            return Ok(None);
        };
        Ok(Some(ClientMessage::decode(&frame)?))
    }

    /// Queue one message or frame without flushing.
    pub async fn send<M>(&mut self, item: M) -> Result<(), CodecError>
    where
        FrameCodec: Encoder<M, Error = CodecError>,
    {
        self.writer.feed(item).await
    }

    /// Queue every item and flush once.
    pub async fn send_all<M, I>(&mut self, items: I) -> Result<(), CodecError>
    where
        I: IntoIterator<Item = M>,
        FrameCodec: Encoder<M, Error = CodecError>,
    {
        for item in items {
            self.writer.feed(item).await?;
        }
        self.flush().await
    }

    /// Flush queued frames to the transport.
    pub async fn flush(&mut self) -> Result<(), CodecError> {
        SinkExt::<Frame>::flush(&mut self.writer).await
    }

    /// Flush and shut down the write half.
    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        SinkExt::<Frame>::close(&mut self.writer).await
    }

    /// Bytes of a partially received frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.reader.read_buffer().len()
    }
}

impl<T> std::fmt::Debug for FramedConnection<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedConnection")
            .field("buffered", &self.buffered())
            .finish_non_exhaustive()
    }
}
