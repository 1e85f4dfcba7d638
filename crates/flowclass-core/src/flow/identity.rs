//! Direction-normalized connection identity

use crate::packet::Transport;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// One side of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Endpoint {
    /// IP address
    pub addr: IpAddr,
    /// Transport port (0 for portless transports)
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint
    pub fn new(addr: IpAddr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        SocketAddr::new(self.addr, self.port).fmt(f)
    }
}

/// Transport plus endpoint pair, stored with the smaller endpoint first
///
/// Both directions of a connection build equal identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowIdentity {
    transport: Transport,
    low: Endpoint,
    high: Endpoint,
}

impl FlowIdentity {
    /// Build the canonical identity of a packet's tuple
    pub fn from_tuple(
        transport: Transport,
        src: IpAddr,
        sport: u16,
        dst: IpAddr,
        dport: u16,
    ) -> Self {
        let a = Endpoint::new(src, sport);
        let b = Endpoint::new(dst, dport);
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            transport,
            low,
            high,
        }
    }

    /// Transport of the flow
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Endpoints in canonical order
    pub fn endpoints(&self) -> (Endpoint, Endpoint) {
        (self.low, self.high)
    }

    /// Whether `other` names the same logical flow
    pub fn matches(&self, other: &FlowIdentity) -> bool {
        self == other
    }
}

impl fmt::Display for FlowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} <-> {}", self.transport, self.low, self.high)
    }
}
