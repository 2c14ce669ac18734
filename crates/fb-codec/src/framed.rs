//! Framed message stream for async I/O.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures_core::Stream;
use futures_util::Sink;
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::error::CodecError;
use crate::packet_codec::ClientCodec;

pin_project! {
    /// A framed message stream over an async I/O transport.
    ///
    /// Wraps a tokio-util `Framed` and yields whole protocol messages. The
    /// codec decides the direction: [`ClientCodec`] for drivers,
    /// [`ServerCodec`](crate::ServerCodec) for test servers.
    pub struct PacketStream<T, C = ClientCodec> {
        #[pin]
        inner: Framed<T, C>,
    }
}

impl<T> PacketStream<T, ClientCodec>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a client stream over the given transport.
    pub fn new(transport: T) -> Self {
        Self {
            inner: Framed::new(transport, ClientCodec::new()),
        }
    }
}

impl<T, C> PacketStream<T, C>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a stream with a custom codec.
    pub fn with_codec(transport: T, codec: C) -> Self {
        Self {
            inner: Framed::new(transport, codec),
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

    /// Get a reference to the codec.
    pub fn codec(&self) -> &C {
        self.inner.codec()
    }

    /// Consume the stream and return the underlying transport.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    /// Bytes received but not yet decoded.
    pub fn read_buffer(&self) -> &BytesMut {
        self.inner.read_buffer()
    }
}

impl<T, C> Stream for PacketStream<T, C>
where
    T: AsyncRead + Unpin,
    C: Decoder<Error = CodecError>,
{
    type Item = Result<C::Item, CodecError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

impl<T, C, I> Sink<I> for PacketStream<T, C>
where
    T: AsyncWrite + Unpin,
    C: Encoder<I, Error = CodecError>,
{
    type Error = CodecError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: I) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}

impl<T, C> std::fmt::Debug for PacketStream<T, C>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketStream")
            .field("transport", self.inner.get_ref())
            .finish()
    }
}
