//! HTTP/1.x request and status lines
//!
//! HTTP is the classic "weak" protocol: plenty of text protocols look like it
//! for a packet or two, so an acceptance here is provisional and the budget
//! rules keep the flow open a little longer for a stronger match.

use super::{Detector, Outcome, PacketView};

const METHODS: &[&[u8]] = &[
    b"GET ",
    b"POST ",
    b"HEAD ",
    b"PUT ",
    b"DELETE ",
    b"OPTIONS ",
    b"CONNECT ",
    b"PATCH ",
    b"TRACE ",
];

const STATUS_PREFIX: &[u8] = b"HTTP/1.";

/// Payload packets inspected before giving up
const MAX_MISSES: u8 = 4;

/// Per-flow HTTP detector
#[derive(Debug, Clone, Default)]
pub struct Http {
    misses: u8,
}

impl Http {
    /// Fresh detector
    pub fn new() -> Self {
        Self::default()
    }

    fn is_http_line(payload: &[u8]) -> bool {
        payload.starts_with(STATUS_PREFIX) || METHODS.iter().any(|m| payload.starts_with(m))
    }
}

impl Detector for Http {
    fn consume(&mut self, packet: &PacketView<'_>) -> Outcome {
        if packet.payload.is_empty() {
            return Outcome::Undecided;
        }
        if Self::is_http_line(packet.payload) {
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
