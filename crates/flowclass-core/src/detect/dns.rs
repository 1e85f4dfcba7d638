//! DNS over UDP
//!
//! Header sanity only: a well-formed response, or a query followed by a
//! well-formed response carrying the same transaction id, is enough.

use super::{Detector, Outcome, PacketView};

const HEADER_LEN: usize = 12;
const MAX_OPCODE: u8 = 5;
const MAX_QUESTIONS: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    id: u16,
    response: bool,
}

/// `None` for a header that cannot be DNS; callers check the length first
fn parse_header(payload: &[u8]) -> Option<Header> {
    let id = u16::from_be_bytes([payload[0], payload[1]]);
    let flags = u16::from_be_bytes([payload[2], payload[3]]);
    let questions = u16::from_be_bytes([payload[4], payload[5]]);

    let opcode = ((flags >> 11) & 0x0F) as u8;
    let z_bit = flags & 0x0040 != 0;
    if opcode > MAX_OPCODE || z_bit || questions == 0 || questions > MAX_QUESTIONS {
        return None;
    }

    Some(Header {
        id,
        response: flags & 0x8000 != 0,
    })
}

/// Progress of the DNS matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DnsStage {
    /// Nothing seen yet
    #[default]
    Start,
    /// A query was seen
    Queried {
        /// Transaction id of the last query
        id: u16,
    },
}

/// Per-flow DNS detector
#[derive(Debug, Clone, Default)]
pub struct Dns {
    stage: DnsStage,
}

impl Dns {
    /// Fresh detector
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stage
    pub fn stage(&self) -> DnsStage {
        self.stage
    }
}

impl Detector for Dns {
    fn consume(&mut self, packet: &PacketView<'_>) -> Outcome {
        if packet.payload.len() < HEADER_LEN {
            return Outcome::Undecided;
        }
        let Some(header) = parse_header(packet.payload) else {
            return Outcome::Reject;
        };

        match (self.stage, header.response) {
            (DnsStage::Start, true) => Outcome::Accept,
            (DnsStage::Queried { id }, true) if id == header.id => Outcome::Accept,
            (DnsStage::Queried { .. }, true) => Outcome::Reject,
            (_, false) => {
                self.stage = DnsStage::Queried { id: header.id };
                Outcome::Undecided
            }
        }
    }
}
