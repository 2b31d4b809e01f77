//! Stream wrapper that replays peeked bytes.
//!
//! The handler framework detects a connection's wire protocol by reading a
//! single byte off the socket. The byte still belongs to the protocol
//! stream, so the dispatched handler receives the connection wrapped in a
//! `PeekedStream` whose read side yields the consumed bytes first.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A stream that yields previously consumed bytes before the inner stream.
///
/// Reads drain `replay` first; once it is empty every call goes straight to
/// the inner stream. Writes always pass through.
pub struct PeekedStream<S> {
    replay: Bytes,
    inner: S,
}

impl<S> PeekedStream<S> {
    /// Wrap `inner`, scheduling `replay` to be read back first.
    pub fn new(replay: Bytes, inner: S) -> Self {
        Self { replay, inner }
    }

    /// Bytes of the replay buffer not yet handed to a reader.
    pub fn replay_remaining(&self) -> usize {
        self.replay.len()
    }

    /// Unwrap the inner stream, discarding any unread replay bytes.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.replay.is_empty() {
            let n = self.replay.len().min(buf.remaining());
            buf.put_slice(&self.replay[..n]);
            self.replay.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[tokio::test]
    async fn replays_peeked_bytes_before_socket_bytes() {
        let (mut client, server) = duplex(256);
        client.write_all(b"rest-of-stream").await.unwrap();
        drop(client);

        let mut stream = PeekedStream::new(Bytes::from_static(b"\x05"), server);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"\x05rest-of-stream");
    }

    #[tokio::test]
    async fn short_reads_drain_replay_incrementally() {
        let (_client, server) = duplex(256);
        let mut stream = PeekedStream::new(Bytes::from_static(b"abcde"), server);
        assert_eq!(stream.replay_remaining(), 5);

        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ab");
        assert_eq!(stream.replay_remaining(), 3);

        let mut buf = [0u8; 3];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"cde");
        assert_eq!(stream.replay_remaining(), 0);
    }

    #[tokio::test]
    async fn writes_bypass_the_replay_buffer() {
        let (mut client, server) = duplex(256);
        let mut stream = PeekedStream::new(Bytes::from_static(b"unread"), server);

        stream.write_all(b"hello").await.unwrap();
        stream.flush().await.unwrap();

        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(stream.replay_remaining(), 6);
    }
}
