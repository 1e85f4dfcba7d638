//! Well-known-port fallback
//!
//! Used only when a flow finalizes without any detector accepting. The
//! result is recorded as a guess, never as a detection.

use crate::packet::Transport;
use crate::protocol::ProtocolId;
use once_cell::sync::Lazy;
use std::collections::HashMap;

static PORTS: Lazy<HashMap<(Transport, u16), ProtocolId>> = Lazy::new(|| {
    [
        (Transport::Tcp, 21, ProtocolId::FTP_CONTROL),
        (Transport::Tcp, 53, ProtocolId::DNS),
        (Transport::Udp, 53, ProtocolId::DNS),
        (Transport::Tcp, 80, ProtocolId::HTTP),
        (Transport::Tcp, 8080, ProtocolId::HTTP),
        (Transport::Tcp, 443, ProtocolId::TLS),
    ]
    .into_iter()
    .map(|(t, port, id)| ((t, port), id))
    .collect()
});

/// Guess a protocol from transport metadata alone
///
/// Either port may be the service side; the lower-numbered one is tried
/// first since ephemeral client ports are high.
pub fn guess(transport: Transport, port_a: u16, port_b: u16) -> Option<ProtocolId> {
    let (first, second) = if port_a <= port_b {
        (port_a, port_b)
    } else {
        (port_b, port_a)
    };
    PORTS
        .get(&(transport, first))
        .or_else(|| PORTS.get(&(transport, second)))
        .copied()
}
