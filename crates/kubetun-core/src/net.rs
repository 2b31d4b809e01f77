//! Small shared network types.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// A destination network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl Cidr {
    pub fn new(addr: IpAddr, prefix: u8) -> Option<Self> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        (prefix <= max).then_some(Self { addr, prefix })
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s.split_once('/').ok_or_else(|| format!("missing prefix: {s}"))?;
        let addr: IpAddr = addr.parse().map_err(|_| format!("bad address: {s}"))?;
        let prefix: u8 = prefix.parse().map_err(|_| format!("bad prefix: {s}"))?;
        Self::new(addr, prefix).ok_or_else(|| format!("prefix out of range: {s}"))
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Address family of an IP, for family-scoped DNS bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_prints_cidr() {
        let cidr: Cidr = "10.233.0.0/18".parse().unwrap();
        assert_eq!(cidr.prefix, 18);
        assert!(cidr.is_ipv4());
        assert_eq!(cidr.to_string(), "10.233.0.0/18");

        let cidr: Cidr = "fd00::/64".parse().unwrap();
        assert!(!cidr.is_ipv4());
    }

    #[test]
    fn rejects_malformed_cidr() {
        assert!("10.0.0.0".parse::<Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
        assert!("fd00::/129".parse::<Cidr>().is_err());
        assert!("not-an-ip/8".parse::<Cidr>().is_err());
    }

    #[test]
    fn classifies_families() {
        assert_eq!(IpFamily::of("192.0.2.1".parse().unwrap()), IpFamily::V4);
        assert_eq!(IpFamily::of("2001:db8::1".parse().unwrap()), IpFamily::V6);
    }
}
