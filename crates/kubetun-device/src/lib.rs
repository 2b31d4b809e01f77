//! Virtual TUN device abstraction.
//!
//! A [`Device`] owns a platform TUN interface and exposes packet-granular
//! read/write, subnet and DNS configuration, and a close that is guaranteed
//! to unblock a parked reader. Platform specifics live behind the
//! [`TunBackend`] seam; Linux is implemented natively, other platforms get
//! a typed unsupported error rather than a pretend implementation.

mod backend;
mod device;
mod error;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(target_os = "linux"))]
mod stub;

pub use backend::TunBackend;
pub use device::Device;
pub use error::DeviceError;

#[cfg(target_os = "linux")]
pub use linux::LinuxTun as NativeTun;
#[cfg(not(target_os = "linux"))]
pub use stub::UnsupportedTun as NativeTun;
