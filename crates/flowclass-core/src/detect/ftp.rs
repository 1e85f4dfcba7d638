//! FTP control channel
//!
//! Accepted flows stay under inspection for their whole lifetime (see
//! `always_inspect` in the classification config), since later commands
//! announce the data connections.

use super::{Detector, Outcome, PacketView};

const MARKERS: &[&[u8]] = &[b"220", b"USER ", b"PASS ", b"AUTH "];
const MAX_MISSES: u8 = 3;

/// Per-flow FTP control detector
#[derive(Debug, Clone, Default)]
pub struct FtpControl {
    misses: u8,
}

impl FtpControl {
    /// Fresh detector
    pub fn new() -> Self {
        Self::default()
    }
}

impl Detector for FtpControl {
    fn consume(&mut self, packet: &PacketView<'_>) -> Outcome {
        if packet.payload.is_empty() {
            return Outcome::Undecided;
        }
        if MARKERS.iter().any(|m| packet.payload.starts_with(m)) {
            return Outcome::Accept;
        }
        self.misses += 1;
        if self.misses >= MAX_MISSES {
            Outcome::Reject
        } else {
            Outcome::Undecided
        }
    }
}
