//! Handler error types.

use kubetun_chain::{ChainError, Socks5Error};
use kubetun_core::errors::{ERROR_AUTH, ERROR_HANDSHAKE, ERROR_IO, ERROR_TIMEOUT};

/// Errors from the handler framework.
///
/// Handler errors are logged at the serving layer and never tear down the
/// server; the offending connection is simply closed.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chain dial: {0}")]
    Chain(#[from] ChainError),

    #[error("SOCKS5: {0}")]
    Socks5(#[from] Socks5Error),

    #[error("authentication failed for {0:?}")]
    Auth(String),

    #[error("unknown protocol byte: 0x{0:02x}")]
    UnknownProtocol(u8),

    #[error("handshake timed out")]
    Timeout,

    #[error("invalid handler options: {0}")]
    Options(String),
}

impl HandlerError {
    /// Failure kind label for logs.
    pub fn error_type(&self) -> &'static str {
        match self {
            HandlerError::Io(_) => ERROR_IO,
            HandlerError::Chain(e) => e.error_type(),
            HandlerError::Socks5(e) => e.error_type(),
            HandlerError::Auth(_) => ERROR_AUTH,
            HandlerError::UnknownProtocol(_) => ERROR_HANDSHAKE,
            HandlerError::Timeout => ERROR_TIMEOUT,
            HandlerError::Options(_) => ERROR_IO,
        }
    }
}
