//! Placeholder backend for platforms without a native implementation.

use std::net::IpAddr;

use kubetun_core::net::{Cidr, IpFamily};

use crate::backend::TunBackend;
use crate::error::DeviceError;

/// Uninhabited backend: `create` always reports unsupported, so no value of
/// this type ever exists.
pub enum UnsupportedTun {}

impl UnsupportedTun {
    pub fn create(_name: &str) -> Result<Self, DeviceError> {
        Err(DeviceError::Unsupported("tun device"))
    }
}

impl TunBackend for UnsupportedTun {
    fn name(&self) -> &str {
        match *self {}
    }

    fn index(&self) -> u32 {
        match *self {}
    }

    fn read(&self, _buf: &mut [u8]) -> std::io::Result<usize> {
        match *self {}
    }

    fn write(&self, _buf: &[u8]) -> std::io::Result<usize> {
        match *self {}
    }

    fn close(&self) -> std::io::Result<()> {
        match *self {}
    }

    fn wake(&self, _dns: IpAddr) {
        match *self {}
    }

    fn add_address(&self, _subnet: &Cidr) -> Result<(), DeviceError> {
        match *self {}
    }

    fn remove_address(&self, _subnet: &Cidr) -> Result<(), DeviceError> {
        match *self {}
    }

    fn set_dns(&self, _server: IpAddr, _search_domains: &[String]) -> Result<(), DeviceError> {
        match *self {}
    }

    fn flush_dns(&self, _family: IpFamily) -> Result<(), DeviceError> {
        match *self {}
    }

    fn flush_host_cache(&self) {
        match *self {}
    }

    fn set_mtu(&self, _mtu: u32) -> Result<(), DeviceError> {
        match *self {}
    }
}
