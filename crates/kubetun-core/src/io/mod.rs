//! Stream adapters shared by the dialer and the handler framework.

mod peeked;
mod relay;

pub use peeked::PeekedStream;
pub use relay::{RelayStats, relay_bidirectional};
