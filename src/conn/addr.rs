//! Socket address wrapper.
use std::fmt::{self, Display, Formatter};

/// A peer or local socket address.
///
/// The core only ever binds IPv6 listeners, but an accepted peer may
/// still report a `V4`-mapped or bare `V4` address depending on platform
/// dual-stack behavior, so both variants are kept distinct from the start.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub enum SocketAddr {
    /// IPv4 socket address.
    V4(std::net::SocketAddrV4),
    /// IPv6 socket address.
    V6(std::net::SocketAddrV6),
}

impl From<std::net::SocketAddr> for SocketAddr {
    #[inline]
    fn from(addr: std::net::SocketAddr) -> Self {
        match addr {
            std::net::SocketAddr::V4(val) => Self::V4(val),
            std::net::SocketAddr::V6(val) => Self::V6(val),
        }
    }
}
impl From<std::net::SocketAddrV4> for SocketAddr {
    #[inline]
    fn from(addr: std::net::SocketAddrV4) -> Self {
        Self::V4(addr)
    }
}
impl From<std::net::SocketAddrV6> for SocketAddr {
    #[inline]
    fn from(addr: std::net::SocketAddrV6) -> Self {
        Self::V6(addr)
    }
}

impl SocketAddr {
    /// Returns `true` if this is an IPv4 address.
    #[inline]
    #[must_use]
    pub fn is_ipv4(&self) -> bool {
        matches!(self, Self::V4(_))
    }

    /// Returns `true` if this is an IPv6 address.
    #[inline]
    #[must_use]
    pub fn is_ipv6(&self) -> bool {
        matches!(self, Self::V6(_))
    }

    /// Returns the IP address, independent of port.
    #[inline]
    #[must_use]
    pub fn ip(&self) -> std::net::IpAddr {
        match self {
            Self::V4(a) => std::net::IpAddr::V4(*a.ip()),
            Self::V6(a) => std::net::IpAddr::V6(*a.ip()),
        }
    }

    /// Returns the port number.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        match self {
            Self::V4(a) => a.port(),
            Self::V6(a) => a.port(),
        }
    }

    /// Converts to the standard library's [`std::net::SocketAddr`].
    #[inline]
    #[must_use]
    pub fn into_std(self) -> std::net::SocketAddr {
        match self {
            Self::V4(addr) => addr.into(),
            Self::V6(addr) => addr.into(),
        }
    }
}

impl Display for SocketAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4(addr) => write!(f, "{addr}"),
            Self::V6(addr) => write!(f, "{addr}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_ipv4() {
        let std_addr: std::net::SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let addr: SocketAddr = std_addr.into();
        assert!(addr.is_ipv4());
        assert!(!addr.is_ipv6());
        assert_eq!(addr.port(), 8080);
        assert_eq!(addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn wraps_ipv6() {
        let std_addr = std::net::SocketAddr::new(std::net::Ipv6Addr::LOCALHOST.into(), 9443);
        let addr: SocketAddr = std_addr.into();
        assert!(addr.is_ipv6());
        assert!(!addr.is_ipv4());
        assert_eq!(addr.into_std(), std_addr);
    }
}
