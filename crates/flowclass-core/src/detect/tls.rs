//! TLS handshake records over TCP

use super::{Detector, Outcome, PacketView};

const CONTENT_HANDSHAKE: u8 = 0x16;
const CLIENT_HELLO: u8 = 0x01;
const SERVER_HELLO: u8 = 0x02;
const RECORD_PREFIX: usize = 6;

/// Per-flow TLS detector
#[derive(Debug, Clone, Default)]
pub struct Tls;

impl Tls {
    /// Fresh detector
    pub fn new() -> Self {
        Self
    }
}

fn plausible_prefix(payload: &[u8]) -> bool {
    let checks: [fn(u8) -> bool; 3] = [
        |b| b == CONTENT_HANDSHAKE,
        |b| b == 0x03,
        |b| b <= 0x04,
    ];
    payload.iter().zip(checks).all(|(b, check)| check(*b))
}

impl Detector for Tls {
    fn consume(&mut self, packet: &PacketView<'_>) -> Outcome {
        let payload = packet.payload;
        if payload.is_empty() {
            return Outcome::Undecided;
        }
        if !plausible_prefix(payload) {
            return Outcome::Reject;
        }
        if payload.len() < RECORD_PREFIX {
            return Outcome::Undecided;
        }

        match payload[5] {
            CLIENT_HELLO | SERVER_HELLO => Outcome::Accept,
            _ => Outcome::Reject,
        }
    }
}
