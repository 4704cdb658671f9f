//! Split frame streams.
//!
//! - `FrameReader<T>` reads [`Frame`]s from the read half of a transport
//! - `FrameWriter<T>` accepts frames or protocol messages on the write half

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use edb_protocol::Frame;
use futures_core::Stream;
use futures_util::Sink;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Encoder, FramedRead, FramedWrite};

use crate::error::CodecError;
use crate::frame_codec::FrameCodec;

pin_project! {
    /// A read-only frame stream.
    pub struct FrameReader<T> {
        #[pin]
        inner: FramedRead<T, FrameCodec>,
    }
}

impl<T> FrameReader<T>
where
    T: AsyncRead,
{
    /// Create a reader with the default codec.
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, FrameCodec::new())
    }

    /// Create a reader with a custom codec.
    pub fn with_codec(transport: T, codec: FrameCodec) -> Self {
        Self {
            inner: FramedRead::new(transport, codec),
        }
    }

    /// Get a reference to the underlying transport.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Get a reference to the codec.
    pub fn codec(&self) -> &FrameCodec {
        self.inner.decoder()
    }

    /// Bytes buffered but not yet decoded.
    pub fn read_buffer(&self) -> &BytesMut {
        self.inner.read_buffer()
    }
}

impl<T> Stream for FrameReader<T>
where
    T: AsyncRead + Unpin,
{
    type Item = Result<Frame, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<T> std::fmt::Debug for FrameReader<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("transport", self.inner.get_ref())
            .field("buffered", &self.inner.read_buffer().len())
            .finish()
    }
}

pin_project! {
    /// A write-only frame sink.
    pub struct FrameWriter<T> {
        #[pin]
        inner: FramedWrite<T, FrameCodec>,
    }
}

impl<T> FrameWriter<T>
where
    T: AsyncWrite,
{
    /// Create a writer with the default codec.
    pub fn new(transport: T) -> Self {
        Self {
            inner: FramedWrite::new(transport, FrameCodec::new()),
        }
    }

    /// Get a reference to the underlying transport.
    pub fn get_ref(&self) -> &T {
        self.inner.get_ref()
    }

    /// Get a mutable reference to the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T, I> Sink<I> for FrameWriter<T>
where
    T: AsyncWrite + Unpin,
    FrameCodec: Encoder<I, Error = CodecError>,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Sink::<I>::poll_ready(self.project().inner, cx)
    }

    fn start_send(self: Pin<&mut Self>, item: I) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Sink::<I>::poll_flush(self.project().inner, cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Sink::<I>::poll_close(self.project().inner, cx)
    }
}

impl<T> std::fmt::Debug for FrameWriter<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("transport", self.inner.get_ref())
            .finish()
    }
}
