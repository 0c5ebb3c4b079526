//! Network location (`ip` + `port`)

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::error::{Error, Result};

/// Validated IPv4/IPv6 address and port.
///
/// Used both to configure listeners and to identify accepted peers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Loc {
    ip: String,
    port: u16,
}

impl Loc {
    /// Builds a location, rejecting malformed IP literals and port 0.
    pub fn new(ip: impl Into<String>, port: u16) -> Result<Self> {
        let ip = ip.into();
        if ip.parse::<IpAddr>().is_err() {
            return Err(Error::config(format!("invalid ip address: {ip:?}")));
        }
        if port == 0 {
            return Err(Error::config("port must be a positive number"));
        }
        Ok(Self { ip, port })
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self.ip.parse::<IpAddr>(), Ok(IpAddr::V6(_)))
    }

    pub fn to_socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .ip
            .parse()
            .map_err(|_| Error::config(format!("invalid ip address: {:?}", self.ip)))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl From<SocketAddr> for Loc {
    // Peer addresses come from the kernel; port 0 is only possible for
    // unnamed peers, which are still identified by their ip.
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ipv6() {
            write!(f, "[{}]:{}", self.ip, self.port)
        } else {
            write!(f, "{}:{}", self.ip, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_valid_locations() {
        let v4 = Loc::new("127.0.0.1", 8080).unwrap();
        assert_eq!(v4.to_string(), "127.0.0.1:8080");
        assert!(!v4.is_ipv6());

        let v6 = Loc::new("::1", 443).unwrap();
        assert_eq!(v6.to_string(), "[::1]:443");
        assert_eq!(v6.to_socket_addr().unwrap(), "[::1]:443".parse().unwrap());
    }

    #[test]
    fn test_invalid_locations() {
        assert_eq!(
            Loc::new("localhost", 80).unwrap_err().kind(),
            ErrorKind::Config
        );
        assert_eq!(Loc::new("300.1.1.1", 80).unwrap_err().kind(), ErrorKind::Config);
        assert_eq!(Loc::new("10.0.0.1", 0).unwrap_err().kind(), ErrorKind::Config);
    }
}
