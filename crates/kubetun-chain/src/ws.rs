//! WebSocket carrier adapter.
//!
//! `WsStream` exposes a `WebSocketStream` as plain `AsyncRead + AsyncWrite`
//! over binary frames so the SOCKS5 handshake and relay code stay
//! transport-agnostic. Pings are answered inline; a close frame reads as
//! EOF.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

pub struct WsStream<S> {
    ws: WebSocketStream<S>,
    pending: Bytes,
}

impl<S> WsStream<S> {
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self {
            ws,
            pending: Bytes::new(),
        }
    }

    fn fill(&mut self, data: Bytes, buf: &mut ReadBuf<'_>) {
        let n = data.len().min(buf.remaining());
        buf.put_slice(&data[..n]);
        self.pending = data.slice(n..);
    }
}

fn io_err(e: WsError) -> std::io::Error {
    match e {
        WsError::Io(io) => io,
        other => std::io::Error::other(other),
    }
}

impl<S> AsyncRead for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.pending.is_empty() {
            let data = std::mem::take(&mut self.pending);
            self.fill(data, buf);
            return Poll::Ready(Ok(()));
        }

        loop {
            match Pin::new(&mut self.ws).poll_next(cx) {
                Poll::Ready(Some(Ok(Message::Binary(frame)))) => {
                    self.fill(Bytes::from(frame), buf);
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Ok(Message::Text(text)))) => {
                    self.fill(Bytes::from(text.into_bytes()), buf);
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Ok(Message::Ping(payload)))) => {
                    let mut ws = Pin::new(&mut self.ws);
                    match ws.as_mut().poll_ready(cx) {
                        Poll::Ready(Ok(())) => {
                            if let Err(e) = ws.start_send(Message::Pong(payload)) {
                                return Poll::Ready(Err(io_err(e)));
                            }
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(io_err(e))),
                        Poll::Pending => return Poll::Pending,
                    }
                }
                Poll::Ready(Some(Ok(Message::Pong(_) | Message::Frame(_)))) => {}
                Poll::Ready(Some(Ok(Message::Close(_)))) | Poll::Ready(None) => {
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(io_err(e))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> AsyncWrite for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut ws = Pin::new(&mut self.ws);
        match ws.as_mut().poll_ready(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => return Poll::Ready(Err(io_err(e))),
            Poll::Pending => return Poll::Pending,
        }
        match ws.start_send(Message::Binary(data.to_vec())) {
            Ok(()) => Poll::Ready(Ok(data.len())),
            Err(e) => Poll::Ready(Err(io_err(e))),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.ws).poll_flush(cx).map_err(io_err)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.ws).poll_close(cx).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair() -> (
        WsStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (a, b) = duplex(4096);
        let client = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(b, Role::Server, None).await;
        (WsStream::new(client), server)
    }

    #[tokio::test]
    async fn binary_frames_read_as_bytes() {
        let (mut io, mut server) = pair().await;
        server
            .send(Message::Binary(b"packet".to_vec()))
            .await
            .unwrap();

        let mut buf = [0u8; 6];
        io.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"packet");
    }

    #[tokio::test]
    async fn writes_become_binary_frames() {
        let (mut io, mut server) = pair().await;
        io.write_all(b"hello").await.unwrap();
        io.flush().await.unwrap();

        match server.next().await.unwrap().unwrap() {
            Message::Binary(frame) => assert_eq!(frame, b"hello"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn partial_reads_keep_frame_remainder() {
        let (mut io, mut server) = pair().await;
        server
            .send(Message::Binary(b"abcdef".to_vec()))
            .await
            .unwrap();

        let mut buf = [0u8; 4];
        io.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abcd");
        let mut buf = [0u8; 2];
        io.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ef");
    }

    #[tokio::test]
    async fn close_frame_is_eof() {
        let (mut io, mut server) = pair().await;
        server.close(None).await.unwrap();

        let mut buf = [0u8; 8];
        let n = io.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
