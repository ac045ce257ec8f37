// Core types used across all hio components
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

// Address of one end of a transport: inet pair or unix-domain path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Address {
    Inet(SocketAddr),
    Path(PathBuf),
}

impl Address {
    pub fn as_inet(&self) -> Option<SocketAddr> {
        match self {
            Address::Inet(addr) => Some(*addr),
            Address::Path(_) => None,
        }
    }

    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Address::Inet(_) => None,
            Address::Path(path) => Some(path),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::Inet(addr) => write!(f, "{}", addr),
            Address::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Inet(addr)
    }
}

impl From<PathBuf> for Address {
    fn from(path: PathBuf) -> Self {
        Address::Path(path)
    }
}

impl From<&Path> for Address {
    fn from(path: &Path) -> Self {
        Address::Path(path.to_path_buf())
    }
}

/// Resolve `host` to a socket address, preferring IPv4.
///
/// An empty host means every interface (`0.0.0.0`).
pub fn resolve_host(host: &str, port: u16) -> Result<SocketAddr> {
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::InvalidAddress(format!("{}:{} ({})", host, port, e)))?
        .collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| Error::InvalidAddress(format!("{}:{} resolved to nothing", host, port)))
}

/// Address a peer on this host uses to reach a listener bound to `ha`.
///
/// Wildcard binds are replaced by the loopback address of the same family.
pub fn external_addr(ha: SocketAddr) -> SocketAddr {
    match ha.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), ha.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), ha.port())
        }
        _ => ha,
    }
}

// Diagnostic verbosity carried by each transport instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Verbosity {
    #[default]
    Mute = 0,
    Terse = 1,
    Concise = 2,
    Verbose = 3,
    Profuse = 4,
}

impl Verbosity {
    /// True when messages tagged `level` should be emitted.
    pub fn allows(self, level: Verbosity) -> bool {
        level != Verbosity::Mute && self >= level
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Verbosity::Mute => write!(f, "mute"),
            Verbosity::Terse => write!(f, "terse"),
            Verbosity::Concise => write!(f, "concise"),
            Verbosity::Verbose => write!(f, "verbose"),
            Verbosity::Profuse => write!(f, "profuse"),
        }
    }
}

impl FromStr for Verbosity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mute" | "0" => Ok(Verbosity::Mute),
            "terse" | "1" => Ok(Verbosity::Terse),
            "concise" | "2" => Ok(Verbosity::Concise),
            "verbose" | "3" => Ok(Verbosity::Verbose),
            "profuse" | "4" => Ok(Verbosity::Profuse),
            other => Err(Error::Config(format!("unknown verbosity '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_maps_to_loopback() {
        let ha: SocketAddr = "0.0.0.0:6101".parse().unwrap();
        assert_eq!(external_addr(ha), "127.0.0.1:6101".parse().unwrap());

        let ha: SocketAddr = "[::]:6101".parse().unwrap();
        assert_eq!(external_addr(ha), "[::1]:6101".parse().unwrap());

        let ha: SocketAddr = "10.0.0.7:6101".parse().unwrap();
        assert_eq!(external_addr(ha), ha);
    }

    #[test]
    fn resolve_prefers_ipv4() {
        let addr = resolve_host("localhost", 7000).unwrap();
        assert!(addr.is_ipv4());
        assert_eq!(addr.port(), 7000);

        let addr = resolve_host("", 0).unwrap();
        assert!(addr.ip().is_unspecified());
    }

    #[test]
    fn verbosity_gates_levels() {
        assert!(Verbosity::Concise.allows(Verbosity::Terse));
        assert!(!Verbosity::Terse.allows(Verbosity::Profuse));
        assert!(!Verbosity::Profuse.allows(Verbosity::Mute));
        assert_eq!("PROFUSE".parse::<Verbosity>().unwrap(), Verbosity::Profuse);
        assert!("chatty".parse::<Verbosity>().is_err());
    }
}
