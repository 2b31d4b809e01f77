//! Linux TUN implementation: `/dev/net/tun` plus ioctl plumbing.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::IpAddr;
use std::os::unix::io::AsRawFd;
use std::process::Command;
use std::sync::RwLock;

use tracing::{debug, trace, warn};

use kubetun_core::net::{Cidr, IpFamily};

use crate::backend::TunBackend;
use crate::error::DeviceError;

const IFNAMSIZ: usize = 16;
const IFF_TUN: i16 = 0x0001;
const IFF_NO_PI: i16 = 0x1000;

const TUNSETIFF: u64 = 0x400454ca;
const SIOCSIFMTU: u64 = 0x8922;
const SIOCGIFFLAGS: u64 = 0x8913;
const SIOCSIFFLAGS: u64 = 0x8914;
const SIOCGIFINDEX: u64 = 0x8933;

const IFF_UP: libc::c_short = 0x1;
const IFF_RUNNING: libc::c_short = 0x40;

#[repr(C)]
struct IfReqFlags {
    ifr_name: [u8; IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
}

#[repr(C)]
struct IfReqMtu {
    ifr_name: [u8; IFNAMSIZ],
    ifr_mtu: libc::c_int,
    _pad: [u8; 20],
}

#[repr(C)]
struct IfReqIndex {
    ifr_name: [u8; IFNAMSIZ],
    ifr_ifindex: libc::c_int,
    _pad: [u8; 20],
}

fn ifname_bytes(name: &str) -> Result<[u8; IFNAMSIZ], DeviceError> {
    if name.is_empty() || name.len() >= IFNAMSIZ {
        return Err(DeviceError::Create(format!("bad interface name: {name:?}")));
    }
    let mut bytes = [0u8; IFNAMSIZ];
    bytes[..name.len()].copy_from_slice(name.as_bytes());
    Ok(bytes)
}

/// TUN device backed by the Linux universal TUN/TAP driver.
///
/// The file handle sits behind an RwLock: packet reads and writes share it,
/// while `close` takes the write half and therefore waits for an in-flight
/// blocking read, exactly the lock the close-then-wake dance exists for.
pub struct LinuxTun {
    file: RwLock<Option<File>>,
    name: String,
    index: u32,
}

impl LinuxTun {
    /// Create the interface, fetch its real name and index, and bring it
    /// up. The file handle is released on any failure past open.
    pub fn create(name: &str) -> Result<Self, DeviceError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/net/tun")
            .map_err(|e| DeviceError::Create(format!("open /dev/net/tun: {e}")))?;

        #[repr(C)]
        struct IfReqTun {
            ifr_name: [u8; IFNAMSIZ],
            ifr_flags: i16,
            _pad: [u8; 22],
        }

        let mut ifr = IfReqTun {
            ifr_name: ifname_bytes(name)?,
            ifr_flags: IFF_TUN | IFF_NO_PI,
            _pad: [0; 22],
        };

        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                TUNSETIFF as libc::Ioctl,
                &mut ifr as *mut _ as *mut libc::c_void,
            )
        };
        if rc < 0 {
            // `file` drops here, releasing the half-created handle.
            return Err(DeviceError::Create(format!(
                "TUNSETIFF: {}",
                std::io::Error::last_os_error()
            )));
        }

        let actual_name: String = ifr
            .ifr_name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as char)
            .collect();

        let index = interface_index(&actual_name)?;
        bring_up(&actual_name)?;
        debug!(name = %actual_name, index, "created TUN interface");

        Ok(Self {
            file: RwLock::new(Some(file)),
            name: actual_name,
            index,
        })
    }
}

impl TunBackend for LinuxTun {
    fn name(&self) -> &str {
        &self.name
    }

    fn index(&self) -> u32 {
        self.index
    }

    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let guard = self.file.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(mut file) => file.read(buf),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "device closed",
            )),
        }
    }

    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        let guard = self.file.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(mut file) => file.write(buf),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "device closed",
            )),
        }
    }

    fn close(&self) -> std::io::Result<()> {
        // Blocks until concurrent packet I/O drains, then drops the handle.
        let mut guard = self.file.write().unwrap_or_else(|e| e.into_inner());
        drop(guard.take());
        Ok(())
    }

    fn wake(&self, dns: IpAddr) {
        let bind_addr = if dns.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        if let Ok(socket) = std::net::UdpSocket::bind(bind_addr) {
            // Routed into the tunnel via the DNS route; the payload is
            // discarded by whoever reads it.
            let _ = socket.send_to(b"wakeup", (dns, 53));
        }
    }

    fn add_address(&self, subnet: &Cidr) -> Result<(), DeviceError> {
        ip_addr_cmd("add", &self.name, subnet)
    }

    fn remove_address(&self, subnet: &Cidr) -> Result<(), DeviceError> {
        ip_addr_cmd("del", &self.name, subnet)
    }

    fn set_dns(&self, server: IpAddr, search_domains: &[String]) -> Result<(), DeviceError> {
        let mut cmd = Command::new("resolvectl");
        cmd.arg("dns").arg(&self.name).arg(server.to_string());
        run_checked(&mut cmd)?;
        if !search_domains.is_empty() {
            let mut cmd = Command::new("resolvectl");
            cmd.arg("domain").arg(&self.name).args(search_domains);
            run_checked(&mut cmd)?;
        }
        Ok(())
    }

    fn flush_dns(&self, family: IpFamily) -> Result<(), DeviceError> {
        trace!(name = %self.name, ?family, "reverting interface DNS");
        let mut cmd = Command::new("resolvectl");
        cmd.arg("revert").arg(&self.name);
        run_checked(&mut cmd)
    }

    fn flush_host_cache(&self) {
        if let Err(e) = Command::new("resolvectl").arg("flush-caches").status() {
            warn!(error = %e, "host DNS cache flush failed");
        }
    }

    fn set_mtu(&self, mtu: u32) -> Result<(), DeviceError> {
        let ifr = IfReqMtu {
            ifr_name: ifname_bytes(&self.name)?,
            ifr_mtu: mtu as libc::c_int,
            _pad: [0; 20],
        };
        ioctl_with_socket(SIOCSIFMTU, &ifr as *const _ as *mut libc::c_void, "SIOCSIFMTU")
    }
}

fn interface_index(name: &str) -> Result<u32, DeviceError> {
    let mut ifr = IfReqIndex {
        ifr_name: ifname_bytes(name)?,
        ifr_ifindex: 0,
        _pad: [0; 20],
    };
    ioctl_with_socket(
        SIOCGIFINDEX,
        &mut ifr as *mut _ as *mut libc::c_void,
        "SIOCGIFINDEX",
    )?;
    Ok(ifr.ifr_ifindex as u32)
}

fn bring_up(name: &str) -> Result<(), DeviceError> {
    let mut ifr = IfReqFlags {
        ifr_name: ifname_bytes(name)?,
        ifr_flags: 0,
        _pad: [0; 22],
    };
    ioctl_with_socket(
        SIOCGIFFLAGS,
        &mut ifr as *mut _ as *mut libc::c_void,
        "SIOCGIFFLAGS",
    )?;
    ifr.ifr_flags |= IFF_UP | IFF_RUNNING;
    ioctl_with_socket(
        SIOCSIFFLAGS,
        &ifr as *const _ as *mut libc::c_void,
        "SIOCSIFFLAGS",
    )
}

fn ioctl_with_socket(
    request: u64,
    arg: *mut libc::c_void,
    what: &str,
) -> Result<(), DeviceError> {
    let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if sock < 0 {
        return Err(DeviceError::Create("socket for ioctl".into()));
    }
    let rc = unsafe { libc::ioctl(sock, request as libc::Ioctl, arg) };
    unsafe { libc::close(sock) };
    if rc < 0 {
        return Err(DeviceError::Command(format!(
            "{what}: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

fn ip_addr_cmd(verb: &str, name: &str, subnet: &Cidr) -> Result<(), DeviceError> {
    let family_flag = if subnet.is_ipv4() { "-4" } else { "-6" };
    let output = Command::new("ip")
        .args([family_flag, "addr", verb])
        .arg(subnet.to_string())
        .args(["dev", name])
        .output()
        .map_err(|e| DeviceError::Command(format!("ip addr {verb}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // Adding an address twice, or removing one already gone, is fine.
        if !stderr.contains("File exists") && !stderr.contains("Cannot assign") {
            return Err(DeviceError::Command(format!(
                "ip addr {verb} {subnet}: {}",
                stderr.trim()
            )));
        }
    }
    Ok(())
}

fn run_checked(cmd: &mut Command) -> Result<(), DeviceError> {
    let output = cmd
        .output()
        .map_err(|e| DeviceError::Command(e.to_string()))?;
    if !output.status.success() {
        return Err(DeviceError::Command(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_names_are_bounded() {
        assert!(ifname_bytes("wg1").is_ok());
        assert!(ifname_bytes("").is_err());
        assert!(ifname_bytes("a-name-well-past-ifnamsiz").is_err());
    }
}
