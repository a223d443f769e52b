//! PROXY protocol v1 (TCP4) header emission.
//!
//! Only the text form for IPv4 is produced:
//!
//! ```text
//! PROXY TCP4 <src-ip> <dst-ip> <src-port> <dst-port>\r\n
//! ```

use crate::error::ConfigError;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

/// Header announcing the original client and server endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyHeader {
    pub source: SocketAddrV4,
    pub destination: SocketAddrV4,
}

impl ProxyHeader {
    pub fn new(source: SocketAddrV4, destination: SocketAddrV4) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Header for a spoofed client: the source port is the real peer's port,
    /// the destination port comes from the server address when it carries one.
    pub fn spoofed(
        client_ip: Ipv4Addr,
        client_port: u16,
        server: &ServerAddr,
        fallback_server_port: u16,
    ) -> Self {
        Self::new(
            SocketAddrV4::new(client_ip, client_port),
            SocketAddrV4::new(server.ip, server.port.unwrap_or(fallback_server_port)),
        )
    }
}

impl fmt::Display for ProxyHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PROXY TCP4 {} {} {} {}\r\n",
            self.source.ip(),
            self.destination.ip(),
            self.source.port(),
            self.destination.port()
        )
    }
}

/// Server-facing address announced in the header, written `IP[:port]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerAddr {
    pub ip: Ipv4Addr,
    pub port: Option<u16>,
}

impl FromStr for ServerAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            |reason: String| ConfigError::InvalidAddr("vm host addr", s.to_string(), reason);

        let (ip, port) = match s.split_once(':') {
            Some((ip, port)) => {
                let port = port.parse::<u16>().map_err(|e| invalid(e.to_string()))?;
                (ip, Some(port))
            }
            None => (s, None),
        };

        let ip = ip.parse::<Ipv4Addr>().map_err(|e| invalid(e.to_string()))?;
        Ok(Self { ip, port })
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.ip, port),
            None => write!(f, "{}", self.ip),
        }
    }
}
