//! Replay of bytes that were read ahead of a protocol decision.
//!
//! The upgrade listener has to read the whole HTTP request head before it
//! knows whether the connection is a valid WebSocket upgrade. The WebSocket
//! handshake then needs to see those same bytes again, so they are handed
//! back through [`PrefixedStream`] before the socket itself is read.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Stream that yields `head` first, then reads from `inner`.
///
/// Writes always go straight to `inner`.
#[derive(Debug)]
pub struct PrefixedStream<S> {
    head: Bytes,
    inner: S,
}

impl<S> PrefixedStream<S> {
    pub fn new(head: Bytes, inner: S) -> Self {
        Self { head, inner }
    }

    /// Number of replayed bytes not yet consumed by a reader.
    pub fn pending(&self) -> usize {
        self.head.len()
    }

    /// Returns the inner stream. Unread replay bytes are dropped.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.head.has_remaining() {
            let n = this.head.len().min(buf.remaining());
            buf.put_slice(&this.head[..n]);
            this.head.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, data)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
