//! Error kind constants for log labels.
//!
//! These constants give a consistent failure classification across all
//! crates; error enums map themselves onto one of these via `error_type()`.

/// Route selection found no usable node.
pub const ERROR_EMPTY_CHAIN: &str = "empty_chain";
/// Underlying transport dial failed.
pub const ERROR_DIAL: &str = "dial";
/// Proxy-protocol negotiation failed on a hop.
pub const ERROR_HANDSHAKE: &str = "handshake";
/// DNS lookup failed.
pub const ERROR_RESOLVE: &str = "resolve";
/// TUN creation or configuration failed.
pub const ERROR_DEVICE: &str = "device";
/// Operation not supported on this platform or transport.
pub const ERROR_UNSUPPORTED: &str = "unsupported";
/// Authenticator rejected credentials.
pub const ERROR_AUTH: &str = "auth";
/// I/O error.
pub const ERROR_IO: &str = "io";
/// Timeout.
pub const ERROR_TIMEOUT: &str = "timeout";
