//! Platform seam for TUN devices.

use std::net::IpAddr;

use kubetun_core::net::{Cidr, IpFamily};

use crate::error::DeviceError;

/// Operations a platform TUN implementation must provide.
///
/// Read and write are blocking and may be called concurrently with each
/// other; `close` may block until an in-flight `read` returns (the driver
/// holds an internal lock during reads). `wake` must cause a parked `read`
/// to return; the [`Device`](crate::Device) close path calls it with the
/// interface's DNS server so the wakeup datagram is routed into the tunnel.
pub trait TunBackend: Send + Sync + 'static {
    /// Real interface name as reported by the OS.
    fn name(&self) -> &str;

    /// OS interface index.
    fn index(&self) -> u32;

    /// Read one IP packet. Blocks until a packet is available.
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write one IP packet.
    fn write(&self, buf: &[u8]) -> std::io::Result<usize>;

    /// Release the OS handle. May block on an in-flight read.
    fn close(&self) -> std::io::Result<()>;

    /// Unblock a parked read, e.g. by sending a throwaway datagram toward
    /// `dns` so the kernel routes it into the interface.
    fn wake(&self, dns: IpAddr);

    /// Add an address to the interface.
    fn add_address(&self, subnet: &Cidr) -> Result<(), DeviceError>;

    /// Remove an address from the interface.
    fn remove_address(&self, subnet: &Cidr) -> Result<(), DeviceError>;

    /// Set the interface DNS server and search domains.
    fn set_dns(&self, server: IpAddr, search_domains: &[String]) -> Result<(), DeviceError>;

    /// Drop any DNS state previously installed for `family`.
    fn flush_dns(&self, family: IpFamily) -> Result<(), DeviceError>;

    /// Flush the host-wide DNS cache. Best effort; failures are ignored.
    fn flush_host_cache(&self);

    /// Set the interface MTU.
    fn set_mtu(&self, mtu: u32) -> Result<(), DeviceError>;
}
