//! Chain error types.

use std::fmt;

use kubetun_core::errors::{
    ERROR_DIAL, ERROR_EMPTY_CHAIN, ERROR_HANDSHAKE, ERROR_IO, ERROR_TIMEOUT, ERROR_UNSUPPORTED,
};

/// Errors produced while dialing through a chain.
///
/// Every variant is retryable within the chain's retry budget; none are
/// fatal at this layer.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("empty chain")]
    EmptyChain,

    #[error("dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("dial {addr}: timed out")]
    DialTimeout { addr: String },

    #[error("TLS error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),

    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("SOCKS5 handshake: {0}")]
    Handshake(#[from] Socks5Error),

    #[error("{0} not supported")]
    Unsupported(&'static str),

    #[error("invalid node: {0}")]
    InvalidNode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChainError {
    /// Failure kind label for logs.
    pub fn error_type(&self) -> &'static str {
        match self {
            ChainError::EmptyChain => ERROR_EMPTY_CHAIN,
            ChainError::Dial { .. } => ERROR_DIAL,
            ChainError::DialTimeout { .. } => ERROR_TIMEOUT,
            ChainError::Tls(_) | ChainError::Ws(_) | ChainError::Handshake(_) => ERROR_HANDSHAKE,
            ChainError::Unsupported(_) => ERROR_UNSUPPORTED,
            ChainError::InvalidNode(_) | ChainError::Io(_) => ERROR_IO,
        }
    }
}

/// SOCKS5 wire-protocol errors, shared by the client handshake here and the
/// server handler.
#[derive(Debug)]
pub enum Socks5Error {
    InvalidVersion(u8),
    NoAcceptableMethods,
    AuthRejected,
    UnsupportedCommand(u8),
    UnsupportedAddressType(u8),
    /// Server reply code other than success.
    Rejected(u8),
    /// Datagram or request shorter than its header claims.
    Truncated,
    Io(std::io::Error),
}

impl fmt::Display for Socks5Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidVersion(v) => write!(f, "invalid SOCKS version: 0x{v:02x}"),
            Self::NoAcceptableMethods => write!(f, "no acceptable authentication methods"),
            Self::AuthRejected => write!(f, "credentials rejected"),
            Self::UnsupportedCommand(c) => write!(f, "unsupported command: 0x{c:02x}"),
            Self::UnsupportedAddressType(a) => write!(f, "unsupported address type: 0x{a:02x}"),
            Self::Rejected(code) => write!(f, "request rejected with code 0x{code:02x}"),
            Self::Truncated => write!(f, "truncated message"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Socks5Error {}

impl From<std::io::Error> for Socks5Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl Socks5Error {
    /// Failure kind label for logs.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::AuthRejected => kubetun_core::errors::ERROR_AUTH,
            Self::Io(_) => ERROR_IO,
            _ => ERROR_HANDSHAKE,
        }
    }
}
