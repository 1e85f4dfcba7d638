//! KuGou Music over UDP
//!
//! Three-stage datagram matcher. A short `0x65` probe arms the detector, a
//! large `0x32` transfer datagram with the `00 04` suffix is fingerprinted,
//! and a second transfer datagram must carry the same fingerprint before the
//! flow is accepted. A structural match with a different fingerprint rejects
//! the flow outright.

use super::hash::fold_hash;
use super::{Detector, Outcome, PacketView};
use tracing::trace;

const HASH_OFFSET: usize = 5;
const SEQ_OFFSET: usize = 26;
const SUFFIX_OFFSET: usize = 30;
const SUFFIX: [u8; 2] = [0x00, 0x04];

const PROBE_MIN_LEN: usize = 30;
const PROBE_LEAD: u8 = 0x65;
const TRANSFER_MIN_LEN: usize = 700;
const TRANSFER_LEAD: u8 = 0x32;

/// Progress of the KuGou matcher for one flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KugouStage {
    /// Waiting for the probe datagram
    #[default]
    Start,
    /// Probe seen, waiting for the first transfer datagram
    Probed,
    /// First transfer datagram fingerprinted
    Fingerprinted {
        /// Fingerprint of the hash region
        hash: u32,
        /// Sequence byte of the fingerprinted datagram
        seq: u8,
    },
}

impl KugouStage {
    /// Numeric stage (0, 1, 2)
    pub fn index(&self) -> u8 {
        match self {
            KugouStage::Start => 0,
            KugouStage::Probed => 1,
            KugouStage::Fingerprinted { .. } => 2,
        }
    }
}

/// Per-flow KuGou Music detector
#[derive(Debug, Clone, Default)]
pub struct KugouMusic {
    stage: KugouStage,
}

impl KugouMusic {
    /// Fresh detector at stage 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stage
    pub fn stage(&self) -> KugouStage {
        self.stage
    }

    fn is_probe(payload: &[u8]) -> bool {
        payload.len() >= PROBE_MIN_LEN && payload[0] == PROBE_LEAD
    }

    fn is_transfer(payload: &[u8]) -> bool {
        payload.len() >= TRANSFER_MIN_LEN
            && payload[0] == TRANSFER_LEAD
            && payload[SUFFIX_OFFSET..SUFFIX_OFFSET + 2] == SUFFIX
    }
}

impl Detector for KugouMusic {
    fn consume(&mut self, packet: &PacketView<'_>) -> Outcome {
        let payload = packet.payload;

        match self.stage {
            KugouStage::Start => {
                if Self::is_probe(payload) {
                    self.stage = KugouStage::Probed;
                }
                Outcome::Undecided
            }
            KugouStage::Probed => {
                if Self::is_transfer(payload) {
                    self.stage = KugouStage::Fingerprinted {
                        hash: fold_hash(&payload[HASH_OFFSET..]),
                        seq: payload[SEQ_OFFSET],
                    };
                }
                Outcome::Undecided
            }
            KugouStage::Fingerprinted { hash, seq } => {
                if !Self::is_transfer(payload) {
                    return Outcome::Undecided;
                }
                let current = fold_hash(&payload[HASH_OFFSET..]);
                trace!(saved = hash, current, seq, next_seq = payload[SEQ_OFFSET], "kugou confirmation");
                if current == hash {
                    Outcome::Accept
                } else {
                    Outcome::Reject
                }
            }
        }
    }
}
