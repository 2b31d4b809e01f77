//! Per-node protocol client: transport dialing and the proxy handshake.

use std::fmt;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use kubetun_core::BoxedStream;
use kubetun_core::defaults::{DIAL_TIMEOUT, HANDSHAKE_TIMEOUT};

use crate::error::ChainError;
use crate::node::{Credentials, NodeTlsSettings, Transport};
use crate::socks5;
use crate::tls::{build_client_tls, server_name_for};
use crate::ws::WsStream;

/// Client capabilities of one node: `dial` opens the transport to the hop,
/// `connect` performs the hop's proxy handshake toward a target.
pub struct NodeClient {
    addr: String,
    transport: Transport,
    creds: Option<Credentials>,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl NodeClient {
    pub(crate) fn new(
        addr: &str,
        transport: Transport,
        creds: Option<Credentials>,
        settings: &NodeTlsSettings,
    ) -> Result<Self, ChainError> {
        let tls = match transport {
            Transport::Tls | Transport::Wss => {
                let config = build_client_tls(settings)?;
                let name = server_name_for(settings, addr)?;
                Some((TlsConnector::from(std::sync::Arc::new(config)), name))
            }
            _ => None,
        };
        Ok(Self {
            addr: addr.to_string(),
            transport,
            creds,
            tls,
        })
    }

    /// Open the transport to this hop: TCP connect, then the TLS handshake
    /// and/or WebSocket upgrade the carrier calls for. Each stage is bounded
    /// by its own deadline.
    pub async fn dial(&self) -> Result<BoxedStream, ChainError> {
        let tcp = self.dial_tcp().await?;

        match self.transport {
            Transport::Tcp => Ok(Box::new(tcp)),
            Transport::Tls => {
                let tls = self.handshake_tls(tcp).await?;
                Ok(Box::new(tls))
            }
            Transport::Ws => {
                let url = format!("ws://{}/", self.addr);
                let ws = self
                    .bounded(tokio_tungstenite::client_async(url, tcp))
                    .await??;
                Ok(Box::new(WsStream::new(ws.0)))
            }
            Transport::Wss => {
                let tls = self.handshake_tls(tcp).await?;
                let url = format!("wss://{}/", self.addr);
                let ws = self
                    .bounded(tokio_tungstenite::client_async(url, tls))
                    .await??;
                Ok(Box::new(WsStream::new(ws.0)))
            }
            Transport::Kcp => Err(ChainError::Unsupported("kcp transport")),
            Transport::Quic => Err(ChainError::Unsupported("quic transport")),
        }
    }

    /// Perform the SOCKS5 handshake on an open hop connection so that the
    /// returned stream is proxied to `target` (`host:port`).
    ///
    /// Only stream networks can be tunneled through a hop; datagram relay
    /// over a proxy node is not supported.
    pub async fn connect(
        &self,
        mut stream: BoxedStream,
        network: &str,
        target: &str,
    ) -> Result<BoxedStream, ChainError> {
        if !network.starts_with("tcp") {
            return Err(ChainError::Unsupported("datagram tunneling"));
        }

        debug!(node = %self.addr, target = %target, "proxy handshake");
        tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            socks5::client_handshake(
                &mut stream,
                socks5::CMD_CONNECT,
                target,
                self.creds.as_ref(),
            ),
        )
        .await
        .map_err(|_| ChainError::DialTimeout {
            addr: self.addr.clone(),
        })??;

        Ok(stream)
    }

    async fn dial_tcp(&self) -> Result<TcpStream, ChainError> {
        let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| ChainError::DialTimeout {
                addr: self.addr.clone(),
            })?
            .map_err(|source| ChainError::Dial {
                addr: self.addr.clone(),
                source,
            })?;
        apply_tcp_options(&stream)?;
        Ok(stream)
    }

    async fn handshake_tls(
        &self,
        tcp: TcpStream,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, ChainError> {
        let (connector, name) = self
            .tls
            .as_ref()
            .ok_or(ChainError::Unsupported("tls carrier"))?;
        self.bounded(connector.connect(name.clone(), tcp))
            .await?
            .map_err(|source| ChainError::Dial {
                addr: self.addr.clone(),
                source,
            })
    }

    async fn bounded<F: Future>(&self, fut: F) -> Result<F::Output, ChainError> {
        tokio::time::timeout(HANDSHAKE_TIMEOUT, fut)
            .await
            .map_err(|_| ChainError::DialTimeout {
                addr: self.addr.clone(),
            })
    }
}

impl fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeClient")
            .field("addr", &self.addr)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

fn apply_tcp_options(stream: &TcpStream) -> Result<(), ChainError> {
    stream.set_nodelay(true).map_err(ChainError::Io)?;
    let sock = socket2::SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(300));
    sock.set_tcp_keepalive(&keepalive).map_err(ChainError::Io)?;
    Ok(())
}
