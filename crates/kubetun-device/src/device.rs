//! Device lifecycle and configuration orchestration.

use std::net::{IpAddr, Ipv4Addr};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use kubetun_core::defaults::{CLOSE_WAIT, DEFAULT_TUN_NAME};
use kubetun_core::net::{Cidr, IpFamily};

use crate::backend::TunBackend;
use crate::error::DeviceError;
use crate::NativeTun;

/// An owned virtual TUN interface.
///
/// Exactly one supervisor owns a device. Packet I/O (`read_packet`,
/// `write_packet`, `close`) takes `&self` and may run from dedicated reader
/// and writer threads; configuration takes `&mut self` and is therefore
/// serialized by ownership.
#[derive(Debug)]
pub struct Device<B: TunBackend = NativeTun> {
    backend: Arc<B>,
    name: String,
    dns: Option<IpAddr>,
    mtu: Option<u32>,
    closed: AtomicBool,
}

impl Device<NativeTun> {
    /// Create and bring up the platform TUN interface under the default
    /// name.
    pub fn open() -> Result<Self, DeviceError> {
        Self::open_named(DEFAULT_TUN_NAME)
    }

    /// Create and bring up the platform TUN interface under `name`.
    pub fn open_named(name: &str) -> Result<Self, DeviceError> {
        Self::from_factory(|| NativeTun::create(name))
    }
}

impl<B: TunBackend> Device<B> {
    /// Build a device from a backend factory.
    ///
    /// A panic inside the factory is converted into [`DeviceError::Fault`]
    /// instead of unwinding out of device construction; a factory error is
    /// returned as-is, after the factory's own cleanup has released any
    /// partially created OS handle.
    pub fn from_factory(
        factory: impl FnOnce() -> Result<B, DeviceError>,
    ) -> Result<Self, DeviceError> {
        let backend = std::panic::catch_unwind(AssertUnwindSafe(factory))
            .map_err(|panic| DeviceError::Fault(panic_message(&panic)))??;
        let name = backend.name().to_string();
        info!(name = %name, index = backend.index(), "TUN device ready");
        Ok(Self {
            backend: Arc::new(backend),
            name,
            dns: None,
            mtu: None,
            closed: AtomicBool::new(false),
        })
    }

    /// Interface name as reported by the OS.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS interface index.
    pub fn index(&self) -> u32 {
        self.backend.index()
    }

    /// Currently configured MTU, if one was set through this device.
    pub fn mtu(&self) -> Option<u32> {
        self.mtu
    }

    /// Read one IP packet into `buf`. No framing is added or stripped.
    pub fn read_packet(&self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::Closed);
        }
        let n = self.backend.read(buf)?;
        // A read parked during close returns once the wake datagram lands;
        // that data is garbage and the caller must see the closed state.
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::Closed);
        }
        Ok(n)
    }

    /// Write one IP packet from `buf`.
    pub fn write_packet(&self, buf: &[u8]) -> Result<usize, DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::Closed);
        }
        Ok(self.backend.write(buf)?)
    }

    /// Add a subnet to the interface's address set.
    pub fn add_subnet(&mut self, subnet: &Cidr) -> Result<(), DeviceError> {
        self.ensure_open()?;
        debug!(name = %self.name, subnet = %subnet, "adding subnet");
        self.backend.add_address(subnet)
    }

    /// Remove a subnet from the interface's address set.
    pub fn remove_subnet(&mut self, subnet: &Cidr) -> Result<(), DeviceError> {
        self.ensure_open()?;
        debug!(name = %self.name, subnet = %subnet, "removing subnet");
        self.backend.remove_address(subnet)
    }

    /// Set the interface DNS server and search domains.
    ///
    /// When the server's address family differs from a previously set one,
    /// the stale family's DNS state is flushed first. The host DNS cache
    /// flush afterwards is best effort.
    pub fn set_dns(
        &mut self,
        server: IpAddr,
        search_domains: &[String],
    ) -> Result<(), DeviceError> {
        self.ensure_open()?;
        let family = IpFamily::of(server);
        if let Some(prev) = self.dns
            && IpFamily::of(prev) != family
        {
            if let Err(e) = self.backend.flush_dns(IpFamily::of(prev)) {
                warn!(name = %self.name, error = %e, "failed to flush stale DNS family");
            }
        }
        self.backend.set_dns(server, search_domains)?;
        self.dns = Some(server);
        self.backend.flush_host_cache();
        Ok(())
    }

    /// Set the interface MTU. Surfaces `Unsupported` verbatim on platforms
    /// without MTU control.
    pub fn set_mtu(&mut self, mtu: u32) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.backend.set_mtu(mtu)?;
        self.mtu = Some(mtu);
        Ok(())
    }

    /// Close the device, unblocking any thread parked in `read_packet`.
    ///
    /// The driver holds an internal lock while a read is in flight, so a
    /// naive close would deadlock against a parked reader. Close therefore
    /// runs on a background worker while a throwaway datagram is sent
    /// toward the interface DNS address; the datagram makes the read
    /// return, which releases the lock and lets the close complete.
    /// Idempotent; bounded by [`CLOSE_WAIT`]. Destroying the interface
    /// clears its addresses, routes, and per-interface DNS.
    pub fn close(&self) -> Result<(), DeviceError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let backend = Arc::clone(&self.backend);
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            // First message only signals that the worker is running and
            // about to park on the driver lock.
            let _ = tx.send(None);
            let _ = tx.send(Some(backend.close()));
        });

        let _ = rx.recv();

        let dns = self.dns.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        self.backend.wake(dns);

        match rx.recv_timeout(CLOSE_WAIT) {
            Ok(Some(Ok(()))) | Ok(None) => {
                info!(name = %self.name, "TUN device closed");
                Ok(())
            }
            Ok(Some(Err(e))) => Err(DeviceError::Io(e)),
            Err(_) => Err(DeviceError::CloseTimeout),
        }
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::Closed);
        }
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
