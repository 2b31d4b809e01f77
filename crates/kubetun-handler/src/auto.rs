//! Protocol auto-detection on accepted connections.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use kubetun_chain::socks5::VERSION as SOCKS5_VERSION;
use kubetun_core::AsyncStream;
use kubetun_core::defaults::DEFAULT_RELAY_BUFFER_SIZE;
use kubetun_core::io::{PeekedStream, relay_bidirectional};

use crate::error::HandlerError;
use crate::options::HandlerOptions;
use crate::socks5::Socks5Handler;

/// Dispatches an accepted connection to the handler matching its first
/// byte. The byte is replayed to the chosen handler, so detection never
/// consumes protocol data.
pub struct AutoHandler {
    options: Arc<HandlerOptions>,
}

impl AutoHandler {
    pub fn new(options: Arc<HandlerOptions>) -> Self {
        Self { options }
    }

    /// Own `stream` for the duration of its protocol session.
    ///
    /// Unknown protocols are closed — or, when a knocking host is
    /// configured, transparently proxied to it so the port never reveals
    /// what it speaks. Errors are logged here; the caller's accept loop
    /// keeps running regardless.
    pub async fn handle<S: AsyncStream>(&self, mut stream: S, peer: SocketAddr) {
        let mut first = [0u8; 1];
        if let Err(e) = stream.read_exact(&mut first).await {
            debug!(peer = %peer, laddr = %self.options.addr, error = %e, "peek failed");
            return;
        }

        let result = match first[0] {
            SOCKS5_VERSION => {
                let replayed = PeekedStream::new(Bytes::copy_from_slice(&first), stream);
                Socks5Handler::new(Arc::clone(&self.options))
                    .handle(replayed, peer)
                    .await
            }
            other => match &self.options.knock_host {
                Some(decoy) => self.knock(stream, first[0], decoy, peer).await,
                // Unknown traffic is closed, never dispatched.
                None => Err(HandlerError::UnknownProtocol(other)),
            },
        };

        match result {
            Ok(()) => {}
            Err(HandlerError::UnknownProtocol(byte)) => {
                debug!(peer = %peer, byte = format_args!("0x{byte:02x}"), "unknown protocol, closed");
            }
            Err(e) => {
                warn!(
                    peer = %peer,
                    laddr = %self.options.addr,
                    kind = e.error_type(),
                    error = %e,
                    "handler finished with error"
                );
            }
        }
    }

    /// Proxy unrecognized traffic to the decoy host, replaying the peeked
    /// byte first.
    async fn knock<S: AsyncStream>(
        &self,
        stream: S,
        first: u8,
        decoy: &str,
        peer: SocketAddr,
    ) -> Result<(), HandlerError> {
        debug!(peer = %peer, decoy = %decoy, "knocking unknown traffic");

        let outbound = self.options.chain.dial("tcp", decoy).await?;
        let mut remote = outbound.into_stream()?;
        remote.write_all(&[first]).await?;

        relay_bidirectional(
            stream,
            remote,
            self.options.timeout,
            DEFAULT_RELAY_BUFFER_SIZE,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn peer() -> SocketAddr {
        "192.0.2.10:4242".parse().unwrap()
    }

    #[tokio::test]
    async fn unknown_byte_closes_connection() {
        let options = Arc::new(HandlerOptions::builder().build().unwrap());
        let (mut client, server) = duplex(256);

        let handler = AutoHandler::new(options);
        let session = tokio::spawn(async move { handler.handle(server, peer()).await });

        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        session.await.unwrap();

        // The server side dropped without answering.
        let mut buf = [0u8; 8];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn peek_error_is_swallowed() {
        let options = Arc::new(HandlerOptions::builder().build().unwrap());
        let (client, server) = duplex(256);
        drop(client);

        // EOF before the first byte must not panic or error out.
        AutoHandler::new(options).handle(server, peer()).await;
    }
}
