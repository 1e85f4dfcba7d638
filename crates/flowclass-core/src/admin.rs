//! Read-only administrative views

use crate::flow::FlowEntry;
use crate::protocol::ProtocolTable;
use std::fmt::Write;

/// One `id,name` line per protocol id, `NOT_YET` included
pub fn protocol_listing() -> String {
    let mut out = String::new();
    for info in ProtocolTable::iter() {
        // writing into a String cannot fail
        let _ = writeln!(out, "{},{}", info.id.0, info.name);
    }
    out
}

/// One-line summary of a cached flow
pub fn describe_flow(entry: &FlowEntry) -> String {
    format!(
        "{} ({} pkts) [Proto: {}]",
        entry.identity(),
        entry.packets_processed(),
        entry.protocol()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowIdentity, Reason};
    use crate::packet::Transport;
    use crate::protocol::ProtocolId;

    #[test]
    fn test_listing() {
        let listing = protocol_listing();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.first(), Some(&"0,Unknown"));
        assert_eq!(lines.last(), Some(&"6,NotYet"));
        assert!(lines.contains(&"5,KuGouMusic"));
    }

    #[test]
    fn test_describe() {
        let identity = FlowIdentity::from_tuple(
            Transport::Udp,
            "10.1.1.1".parse().unwrap(),
            7000,
            "10.1.1.2".parse().unwrap(),
            8000,
        );
        let entry = FlowEntry::classified(identity, ProtocolId::KUGOU_MUSIC, Reason::Detected);
        assert_eq!(
            describe_flow(&entry),
            "[UDP] 10.1.1.1:7000 <-> 10.1.1.2:8000 (0 pkts) [Proto: KuGouMusic]"
        );
    }
}
