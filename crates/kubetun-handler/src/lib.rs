//! Server-side connection handler framework.
//!
//! Accepted connections enter the [`AutoHandler`], which peeks the first
//! byte to detect the wire protocol and dispatches to the matching handler
//! (currently SOCKS5). Unknown traffic is closed, or transparently proxied
//! to a decoy host when probe resistance is configured. Handlers reach
//! their targets through the options' [`Chain`](kubetun_chain::Chain).

mod auth;
mod auto;
mod error;
mod options;
mod server;
mod socks5;

pub use auth::{Authenticator, LocalAuthenticator};
pub use auto::AutoHandler;
pub use error::HandlerError;
pub use options::{HandlerOptions, HandlerOptionsBuilder, IpRoute};
pub use server::Server;
pub use socks5::Socks5Handler;
