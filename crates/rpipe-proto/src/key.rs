//! Session identity

use crate::header::SessionHeader;
use crate::ProtoError;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;

/// Remote endpoint of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.socket_addr()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Key identifying one session in the routing table.
///
/// A key without an endpoint is used for conv-only lookup, e.g. on the client
/// side where every session talks to the same peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey {
    endpoint: Option<Endpoint>,
    conv: NonZeroU32,
}

impl SessionKey {
    pub fn new(conv: u32, endpoint: Option<Endpoint>) -> Result<Self, ProtoError> {
        let conv = NonZeroU32::new(conv).ok_or(ProtoError::ZeroConv)?;
        Ok(Self { endpoint, conv })
    }

    /// Derive a key from the header of a raw datagram.
    ///
    /// Returns `None` when the datagram is shorter than the header or carries
    /// conv 0.
    pub fn from_datagram(datagram: &[u8], sender: Option<Endpoint>) -> Option<Self> {
        let head = SessionHeader::peek(datagram).ok()?;
        Self::new(head.conv, sender).ok()
    }

    pub fn conv(&self) -> u32 {
        self.conv.get()
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint
    }

    /// Same conversation, keyed without an endpoint
    pub fn without_endpoint(&self) -> Self {
        Self {
            endpoint: None,
            conv: self.conv,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(f, "{}:{}", endpoint, self.conv),
            None => write!(f, ":{}", self.conv),
        }
    }
}
