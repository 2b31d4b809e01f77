//! Proxy chains and route selection.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace};

use kubetun_core::BoxedStream;
use kubetun_core::defaults::DIAL_TIMEOUT;

use crate::error::ChainError;
use crate::node::{Node, split_host_port};
use crate::socks5::format_target;

/// Result of a chain dial.
///
/// Stream networks produce a tunneled byte stream; a datagram network with
/// an empty address produces a bound socket instead.
pub enum Outbound {
    Stream(BoxedStream),
    Datagram(UdpSocket),
}

impl Outbound {
    /// Unwrap the stream variant.
    pub fn into_stream(self) -> Result<BoxedStream, ChainError> {
        match self {
            Self::Stream(s) => Ok(s),
            Self::Datagram(_) => Err(ChainError::Unsupported("datagram outbound")),
        }
    }

    /// Unwrap the datagram variant.
    pub fn into_datagram(self) -> Result<UdpSocket, ChainError> {
        match self {
            Self::Datagram(s) => Ok(s),
            Self::Stream(_) => Err(ChainError::Unsupported("stream outbound")),
        }
    }
}

impl fmt::Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Outbound::Stream"),
            Self::Datagram(s) => write!(f, "Outbound::Datagram({:?})", s.local_addr()),
        }
    }
}

/// An ordered route of proxy nodes plus a retry policy.
///
/// An empty chain dials directly. A populated chain tunnels the target
/// through its terminal node. Chains marked as routes are the output of
/// selection and are not selectable again.
#[derive(Debug, Clone, Default)]
pub struct Chain {
    nodes: Vec<Arc<Node>>,
    retries: usize,
    is_route: bool,
}

impl Chain {
    /// An empty chain: every dial goes directly to the target.
    pub fn new() -> Self {
        Self::default()
    }

    /// A chain over the given nodes, terminal node last.
    pub fn with_nodes(nodes: Vec<Arc<Node>>) -> Self {
        Self {
            nodes,
            ..Self::default()
        }
    }

    fn route() -> Self {
        Self {
            is_route: true,
            ..Self::default()
        }
    }

    pub fn push(&mut self, node: Arc<Node>) {
        self.nodes.push(node);
    }

    /// Number of whole-dial attempts; values below 1 behave as 1.
    pub fn set_retries(&mut self, retries: usize) {
        self.retries = retries;
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_route(&self) -> bool {
        self.is_route
    }

    /// The node a selected route tunnels through.
    pub fn terminal(&self) -> Option<&Arc<Node>> {
        self.nodes.last()
    }

    /// Dial `address` on `network` through the chain.
    ///
    /// The host part is resolved up front and the first answer substituted,
    /// with the port preserved; on resolution failure the literal address is
    /// used. Every error is retryable within the retry budget; the last one
    /// is returned on exhaustion. Dropping the returned future aborts the
    /// attempt in flight.
    pub async fn dial(&self, network: &str, address: &str) -> Result<Outbound, ChainError> {
        let retries = self.retries.max(1);
        let mut last_err = None;
        for attempt in 1..=retries {
            match self.dial_once(network, address).await {
                Ok(outbound) => return Ok(outbound),
                Err(e) => {
                    debug!(
                        network,
                        address,
                        attempt,
                        retries,
                        error = %e,
                        kind = e.error_type(),
                        "dial attempt failed"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(ChainError::EmptyChain))
    }

    async fn dial_once(&self, network: &str, address: &str) -> Result<Outbound, ChainError> {
        let route = self.select_route();

        let resolved = if address.is_empty() {
            String::new()
        } else {
            resolve(address).await
        };

        if route.is_empty() {
            return direct_dial(network, address, &resolved).await;
        }

        let node = route.terminal().ok_or(ChainError::EmptyChain)?.clone();
        let hop = route.get_conn().await?;
        match node.client().connect(hop, network, &resolved).await {
            Ok(stream) => {
                node.marker().record_success();
                Ok(Outbound::Stream(stream))
            }
            Err(e) => {
                // `connect` consumed the hop connection; it is closed by now.
                node.marker().record_failure();
                Err(e)
            }
        }
    }

    /// Obtain a handshaken connection to the terminal node, with the same
    /// retry envelope as `dial` but no further destination.
    pub async fn conn(&self) -> Result<BoxedStream, ChainError> {
        let retries = self.retries.max(1);
        let mut last_err = None;
        for _ in 0..retries {
            let route = self.select_route();
            match route.get_conn().await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(ChainError::EmptyChain))
    }

    /// Open the transport to the route's terminal node.
    async fn get_conn(&self) -> Result<BoxedStream, ChainError> {
        let node = self.terminal().ok_or(ChainError::EmptyChain)?;
        match node.client().dial().await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                node.marker().record_failure();
                Err(e)
            }
        }
    }

    /// Materialise the route for one dial. Pure: no I/O, no side effects.
    ///
    /// Empty chain maps to the empty route (direct dial); a chain that is
    /// already a route returns itself; otherwise the route contains the
    /// chain's terminal node. Per-node policies (weighting, bypass lists)
    /// slot in here.
    pub fn select_route(&self) -> Chain {
        if self.is_empty() {
            return Self::route();
        }
        if self.is_route {
            return self.clone();
        }
        let mut route = Self::route();
        if let Some(node) = self.nodes.last() {
            route.nodes.push(node.clone());
        }
        route
    }
}

/// Dial without any proxy hop.
async fn direct_dial(
    network: &str,
    address: &str,
    resolved: &str,
) -> Result<Outbound, ChainError> {
    if network.starts_with("udp") {
        let bind_addr = if network == "udp6" { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind_addr).await?;
        if address.is_empty() {
            trace!(local = ?socket.local_addr(), "bound datagram endpoint");
            return Ok(Outbound::Datagram(socket));
        }
        socket.connect(resolved).await.map_err(|source| {
            ChainError::Dial {
                addr: resolved.to_string(),
                source,
            }
        })?;
        return Ok(Outbound::Datagram(socket));
    }

    if resolved.is_empty() {
        return Err(ChainError::Dial {
            addr: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty address"),
        });
    }

    let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(resolved))
        .await
        .map_err(|_| ChainError::DialTimeout {
            addr: resolved.to_string(),
        })?
        .map_err(|source| ChainError::Dial {
            addr: resolved.to_string(),
            source,
        })?;
    trace!(remote = ?stream.peer_addr(), "direct dial");
    Ok(Outbound::Stream(Box::new(stream)))
}

/// Resolve the host part of `address`, substituting the first answer and
/// preserving the port. Falls back to the literal address when the host is
/// already an IP, the lookup fails, or the lookup outlives the dial
/// deadline.
pub(crate) async fn resolve(address: &str) -> String {
    let Some((host, port)) = split_host_port(address) else {
        return address.to_string();
    };
    if host.parse::<IpAddr>().is_ok() {
        return address.to_string();
    }
    match tokio::time::timeout(DIAL_TIMEOUT, tokio::net::lookup_host(address)).await {
        Ok(Ok(mut answers)) => match answers.next() {
            Some(addr) => format_target(&addr.ip().to_string(), port),
            None => address.to_string(),
        },
        _ => {
            debug!(address, "resolution failed, using literal address");
            address.to_string()
        }
    }
}
