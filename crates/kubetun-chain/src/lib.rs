//! Proxy-chain dialer.
//!
//! A [`Chain`] is an ordered route of proxy [`Node`]s plus a retry policy.
//! Its [`Chain::dial`] primitive produces an end-to-end connection tunneled
//! through the chain: hosts are resolved up front, an empty route falls back
//! to a direct OS dial, and a populated route dials the terminal node's
//! transport and performs its proxy handshake toward the target.

mod chain;
mod client;
mod error;
mod node;
pub mod socks5;
mod tls;
mod ws;

pub use chain::{Chain, Outbound};
pub use client::NodeClient;
pub use error::{ChainError, Socks5Error};
pub use node::{Credentials, FailureMarker, Node, NodeTlsSettings, Transport};
pub use tls::{build_client_tls, server_name_for};
pub use ws::WsStream;
