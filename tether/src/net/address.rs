use super::kind::AddressFamily;
use crate::error::{ConnectionError, Result};

use std::fmt;
use std::net::{IpAddr, SocketAddr, SocketAddrV6, ToSocketAddrs};
use std::str::FromStr;

/// A host and port to connect to or bind on.
///
/// No resolution happens at construction: the host is looked up each time
/// the address is used, so a hostname may resolve differently over the
/// lifetime of a long-running process.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    host: String,
    port: u16,
}

/// Error returned when parsing an [`Address`] from a string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address {input:?}: {reason}")]
pub struct AddressParseError {
    input: String,
    reason: &'static str,
}

impl Address {
    /// Creates an address from a host name or IP literal and a port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The host part.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port part.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The family a socket should start with to reach this address.
    ///
    /// IPv6 literals need an IPv6 socket; everything else starts as IPv4.
    /// [`TcpStream::open`](crate::net::TcpStream::open) switches family when
    /// a host name resolves to IPv6 candidates.
    pub fn preferred_family(&self) -> AddressFamily {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => AddressFamily::Inet6,
            _ => AddressFamily::Inet,
        }
    }

    /// Resolves this address to every candidate, in resolver order.
    ///
    /// Candidates of both families are returned; callers connecting to a
    /// host name pick the socket family per candidate.
    pub fn resolve_all(&self) -> Result<Vec<SocketAddr>> {
        let unresolved = || ConnectionError::Unresolved {
            host: self.host.clone(),
            port: self.port,
        };

        let candidates: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| unresolved())?
            .collect();

        if candidates.is_empty() {
            return Err(unresolved().into());
        }

        Ok(candidates)
    }

    /// Resolves this address for a socket of the given family.
    ///
    /// IPv6 sockets are dual-stack, so they fall back to an IPv4-mapped
    /// address when the host only resolves to IPv4.
    pub fn resolve(&self, family: AddressFamily) -> Result<SocketAddr> {
        let candidates = self.resolve_all()?;

        let matching = match family {
            AddressFamily::Inet => candidates.iter().find(|a| a.is_ipv4()).copied(),
            AddressFamily::Inet6 => candidates
                .iter()
                .find(|a| a.is_ipv6())
                .copied()
                .or_else(|| {
                    candidates.iter().find_map(|a| match a {
                        SocketAddr::V4(v4) => Some(SocketAddr::V6(SocketAddrV6::new(
                            v4.ip().to_ipv6_mapped(),
                            v4.port(),
                            0,
                            0,
                        ))),
                        SocketAddr::V6(_) => None,
                    })
                }),
        };

        matching.ok_or_else(|| {
            ConnectionError::Unresolved {
                host: self.host.clone(),
                port: self.port,
            }
            .into()
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    /// Parses `host:port` or `[v6-literal]:port`.
    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let fail = |reason| AddressParseError {
            input: input.to_owned(),
            reason,
        };

        let (host, port) = if let Some(rest) = input.strip_prefix('[') {
            let (host, rest) = rest.split_once(']').ok_or_else(|| fail("unclosed '['"))?;
            let port = rest.strip_prefix(':').ok_or_else(|| fail("missing port"))?;
            (host, port)
        } else {
            let (host, port) = input.rsplit_once(':').ok_or_else(|| fail("missing port"))?;
            if host.contains(':') {
                return Err(fail("IPv6 hosts must be bracketed"));
            }
            (host, port)
        };

        if host.is_empty() {
            return Err(fail("missing host"));
        }

        let port = port.parse().map_err(|_| fail("invalid port"))?;

        Ok(Self::new(host, port))
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let address: Address = "localhost:8080".parse().unwrap();
        assert_eq!(address.host(), "localhost");
        assert_eq!(address.port(), 8080);
        assert_eq!(address.to_string(), "localhost:8080");
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let address: Address = "[::1]:9000".parse().unwrap();
        assert_eq!(address.host(), "::1");
        assert_eq!(address.preferred_family(), AddressFamily::Inet6);
        assert_eq!(address.to_string(), "[::1]:9000");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!("localhost".parse::<Address>().is_err());
        assert!(":80".parse::<Address>().is_err());
        assert!("::1:80".parse::<Address>().is_err());
        assert!("host:port".parse::<Address>().is_err());
        assert!("[::1:80".parse::<Address>().is_err());
    }

    #[test]
    fn resolve_all_keeps_every_candidate() {
        let candidates = Address::new("127.0.0.1", 7).resolve_all().unwrap();
        assert_eq!(candidates, ["127.0.0.1:7".parse::<SocketAddr>().unwrap()]);

        let candidates = Address::new("::1", 7).resolve_all().unwrap();
        assert_eq!(candidates, ["[::1]:7".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn ipv4_literal_resolves_without_lookup() {
        let address = Address::new("127.0.0.1", 7);
        let resolved = address.resolve(AddressFamily::Inet).unwrap();
        assert_eq!(resolved, "127.0.0.1:7".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn ipv6_socket_maps_ipv4_hosts() {
        let address = Address::new("127.0.0.1", 7);
        let resolved = address.resolve(AddressFamily::Inet6).unwrap();
        assert_eq!(resolved, "[::ffff:127.0.0.1]:7".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn ipv4_socket_rejects_ipv6_hosts() {
        let err = Address::new("::1", 7)
            .resolve(AddressFamily::Inet)
            .unwrap_err();
        assert!(err.is_connection());
    }
}
