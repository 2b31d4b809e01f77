//! Core types and constants shared across kubetun crates.
//!
//! This crate provides:
//! - Default timeouts, buffer sizes, and device parameters
//! - Error kind constants for log labels
//! - Stream adapters used by the dialer and the handler framework

pub mod defaults;
pub mod errors;
pub mod io;
pub mod net;

pub use defaults::*;
pub use errors::*;

use tokio::io::{AsyncRead, AsyncWrite};

/// Project name.
pub const PROJECT_NAME: &str = "kubetun";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Byte stream usable on both sides of a relay.
///
/// Chain dials can produce plain TCP, TLS, or WebSocket-backed streams;
/// callers only ever see this trait.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Owned, type-erased stream returned by chain dials.
pub type BoxedStream = Box<dyn AsyncStream>;
