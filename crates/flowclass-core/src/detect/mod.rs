//! Protocol detector framework
//!
//! Every detector is a small per-flow state machine implementing
//! [`Detector`]. The framework keeps one [`DetectorState`] per applicable
//! detector inside the flow's [`FlowScratch`] and feeds each packet to the
//! detectors that are still live, in priority order, until one of them
//! accepts. A rejecting detector excludes its protocol for the rest of the
//! classification cycle.

pub mod guess;
pub mod hash;

mod dns;
mod ftp;
mod http;
mod kugou;
mod scratch;
mod tls;

pub use dns::{Dns, DnsStage};
pub use ftp::FtpControl;
pub use http::Http;
pub use kugou::{KugouMusic, KugouStage};
pub use scratch::{FlowScratch, ScratchPool, Sweep};
pub use tls::Tls;

use crate::error::{Error, Result};
use crate::packet::Transport;
use crate::protocol::ProtocolId;
use bitflags::bitflags;

bitflags! {
    /// Set of transports a detector applies to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Transports: u8 {
        /// TCP streams
        const TCP = 0x01;
        /// UDP datagrams
        const UDP = 0x02;
        /// Anything else
        const OTHER = 0x04;
    }
}

impl Transports {
    /// Whether `transport` is in the set
    pub fn admits(self, transport: Transport) -> bool {
        let bit = match transport {
            Transport::Tcp => Transports::TCP,
            Transport::Udp => Transports::UDP,
            Transport::Icmp | Transport::Other(_) => Transports::OTHER,
        };
        self.contains(bit)
    }
}

/// What a detector sees of one packet
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    /// Transport of the flow
    pub transport: Transport,
    /// Transport payload, possibly shorter than the detector needs
    pub payload: &'a [u8],
}

/// Result of feeding one packet to a detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Needs more packets
    Undecided,
    /// The flow is this detector's protocol
    Accept,
    /// The flow is not this detector's protocol
    Reject,
}

/// Per-flow protocol state machine
///
/// Implementations must never regress their own stage and must treat a
/// payload that is too short for them as "nothing to see", not as a
/// rejection.
pub trait Detector {
    /// Consume one packet and report progress
    fn consume(&mut self, packet: &PacketView<'_>) -> Outcome;
}

/// Kinds of detectors known to the framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    /// KuGou Music (UDP)
    KugouMusic,
    /// HTTP/1.x (TCP)
    Http,
    /// DNS (UDP)
    Dns,
    /// TLS (TCP)
    Tls,
    /// FTP control (TCP)
    FtpControl,
}

impl DetectorKind {
    /// Every detector kind
    pub const ALL: [DetectorKind; 5] = [
        DetectorKind::KugouMusic,
        DetectorKind::Http,
        DetectorKind::Dns,
        DetectorKind::Tls,
        DetectorKind::FtpControl,
    ];

    /// Protocol this detector recognizes
    pub fn protocol(self) -> ProtocolId {
        match self {
            DetectorKind::KugouMusic => ProtocolId::KUGOU_MUSIC,
            DetectorKind::Http => ProtocolId::HTTP,
            DetectorKind::Dns => ProtocolId::DNS,
            DetectorKind::Tls => ProtocolId::TLS,
            DetectorKind::FtpControl => ProtocolId::FTP_CONTROL,
        }
    }

    /// Transports this detector applies to
    pub fn transports(self) -> Transports {
        match self {
            DetectorKind::KugouMusic | DetectorKind::Dns => Transports::UDP,
            DetectorKind::Http | DetectorKind::Tls | DetectorKind::FtpControl => Transports::TCP,
        }
    }

    /// Dispatch priority (lower = runs first)
    ///
    /// Specific binary signatures run before the loose text matchers.
    pub fn priority(self) -> u8 {
        match self {
            DetectorKind::Tls => 10,
            DetectorKind::Dns => 20,
            DetectorKind::KugouMusic => 30,
            DetectorKind::FtpControl => 80,
            DetectorKind::Http => 90,
        }
    }

    /// Configuration key (same as the protocol key)
    pub fn key(self) -> &'static str {
        self.protocol().key().unwrap_or("unknown")
    }

    /// Look up a detector kind by key
    pub fn from_key(key: &str) -> Result<Self> {
        let id = ProtocolId::from_key(key)?;
        Self::ALL
            .into_iter()
            .find(|k| k.protocol() == id)
            .ok_or_else(|| Error::UnknownProtocol {
                name: key.to_string(),
            })
    }

    /// Detector at its initial stage
    pub fn fresh_state(self) -> DetectorState {
        match self {
            DetectorKind::KugouMusic => DetectorState::KugouMusic(KugouMusic::new()),
            DetectorKind::Http => DetectorState::Http(Http::new()),
            DetectorKind::Dns => DetectorState::Dns(Dns::new()),
            DetectorKind::Tls => DetectorState::Tls(Tls::new()),
            DetectorKind::FtpControl => DetectorState::FtpControl(FtpControl::new()),
        }
    }
}

/// Per-flow state of one detector, tagged by kind
#[derive(Debug, Clone)]
pub enum DetectorState {
    /// KuGou Music matcher
    KugouMusic(KugouMusic),
    /// HTTP matcher
    Http(Http),
    /// DNS matcher
    Dns(Dns),
    /// TLS matcher
    Tls(Tls),
    /// FTP control matcher
    FtpControl(FtpControl),
}

impl DetectorState {
    /// Kind of this state
    pub fn kind(&self) -> DetectorKind {
        match self {
            DetectorState::KugouMusic(_) => DetectorKind::KugouMusic,
            DetectorState::Http(_) => DetectorKind::Http,
            DetectorState::Dns(_) => DetectorKind::Dns,
            DetectorState::Tls(_) => DetectorKind::Tls,
            DetectorState::FtpControl(_) => DetectorKind::FtpControl,
        }
    }
}

impl Detector for DetectorState {
    fn consume(&mut self, packet: &PacketView<'_>) -> Outcome {
        match self {
            DetectorState::KugouMusic(d) => d.consume(packet),
            DetectorState::Http(d) => d.consume(packet),
            DetectorState::Dns(d) => d.consume(packet),
            DetectorState::Tls(d) => d.consume(packet),
            DetectorState::FtpControl(d) => d.consume(packet),
        }
    }
}

/// Ordered set of enabled detectors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorRegistry {
    kinds: Vec<DetectorKind>,
}

impl DetectorRegistry {
    /// Registry with the given detectors, sorted by priority
    pub fn new(kinds: impl IntoIterator<Item = DetectorKind>) -> Self {
        let mut kinds: Vec<DetectorKind> = kinds.into_iter().collect();
        kinds.sort_by_key(|k| k.priority());
        kinds.dedup();
        Self { kinds }
    }

    /// Registry with every known detector
    pub fn all() -> Self {
        Self::new(DetectorKind::ALL)
    }

    /// Registry from configuration keys
    pub fn from_keys<S: AsRef<str>>(keys: &[S]) -> Result<Self> {
        let kinds = keys
            .iter()
            .map(|k| DetectorKind::from_key(k.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(kinds))
    }

    /// Detectors in dispatch order
    pub fn kinds(&self) -> &[DetectorKind] {
        &self.kinds
    }

    /// Number of detectors
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// True if no detector is enabled
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Detector names for logging
    pub fn names(&self) -> Vec<&'static str> {
        self.kinds.iter().map(|k| k.key()).collect()
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::all()
    }
}
