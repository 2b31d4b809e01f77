//! # kubetun
//!
//! The core networking subsystem of a Kubernetes-aware VPN data-plane: a
//! proxy-chain dialer, a virtual TUN device abstraction, and a pluggable
//! connection-handler framework.
//!
//! ## Crates
//!
//! - [`kubetun_core`] - Shared defaults, error kinds, and stream adapters
//! - [`kubetun_chain`] - Nodes, routes, transports, and the SOCKS5 client
//! - [`kubetun_device`] - Virtual TUN device lifecycle and configuration
//! - [`kubetun_handler`] - Server-side handler framework and SOCKS5 server

pub use kubetun_chain as chain;
pub use kubetun_core as core;
pub use kubetun_device as device;
pub use kubetun_handler as handler;

pub mod serve;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use kubetun_chain::{Chain, Node, Outbound, Transport};
    pub use kubetun_device::{Device, DeviceError, TunBackend};
    pub use kubetun_handler::{AutoHandler, HandlerOptions, LocalAuthenticator, Server};
    pub use crate::serve::{Route, start};
}
