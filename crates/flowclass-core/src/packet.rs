//! Packet-level inputs handed to the classifier by the host pipeline
//!
//! The host (a netfilter hook, a capture loop, a replay tool) owns the
//! packet buffers and connection objects. The core only ever sees a borrowed
//! payload plus the handful of scalars below.

use crate::flow::FlowIdentity;
use std::fmt;

/// Transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Transport {
    /// TCP (protocol number 6)
    Tcp,
    /// UDP (protocol number 17)
    Udp,
    /// ICMP (protocol number 1)
    Icmp,
    /// Anything else, by IP protocol number
    Other(u8),
}

impl Transport {
    /// Create from protocol number
    pub fn from_u8(proto: u8) -> Self {
        match proto {
            1 => Transport::Icmp,
            6 => Transport::Tcp,
            17 => Transport::Udp,
            other => Transport::Other(other),
        }
    }

    /// Get protocol number
    pub fn to_u8(self) -> u8 {
        match self {
            Transport::Icmp => 1,
            Transport::Tcp => 6,
            Transport::Udp => 17,
            Transport::Other(n) => n,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => f.write_str("TCP"),
            Transport::Udp => f.write_str("UDP"),
            Transport::Icmp => f.write_str("ICMP"),
            Transport::Other(n) => write!(f, "{n}"),
        }
    }
}

/// Opaque identity of the host's connection object
///
/// Stable for the object's lifetime, but the host may recycle the object
/// for an unrelated connection afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

/// Identity of one physical packet delivery: opaque buffer token + timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketMarker {
    /// Per-packet object token supplied by the host
    pub token: u64,
    /// Monotonic capture timestamp
    pub timestamp: u64,
}

/// One packet offered to the classifier
#[derive(Debug, Clone)]
pub struct Packet<'a> {
    /// Connection object the packet belongs to
    pub conn: ConnId,
    /// Connection tuple as seen by the host
    pub identity: FlowIdentity,
    /// Transport payload (may be empty or shorter than any detector needs)
    pub payload: &'a [u8],
    /// Monotonic timestamp
    pub timestamp: u64,
    /// Opaque per-packet token
    pub token: u64,
}

impl<'a> Packet<'a> {
    /// Duplicate-suppression marker of this delivery
    pub fn marker(&self) -> PacketMarker {
        PacketMarker {
            token: self.token,
            timestamp: self.timestamp,
        }
    }

    /// Transport of the packet's connection
    pub fn transport(&self) -> Transport {
        self.identity.transport()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_numbers() {
        for n in [1u8, 6, 17, 47, 132] {
            assert_eq!(Transport::from_u8(n).to_u8(), n);
        }
        assert_eq!(Transport::from_u8(17), Transport::Udp);
        assert_eq!(Transport::Other(47).to_string(), "47");
        assert_eq!(Transport::Tcp.to_string(), "TCP");
    }
}
