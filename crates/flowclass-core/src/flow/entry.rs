//! Per-flow classification record

use super::FlowIdentity;
use crate::detect::{FlowScratch, PacketView, Sweep};
use crate::packet::PacketMarker;
use crate::protocol::{ProtocolBitmask, ProtocolId};
use std::fmt;

/// Number of independent match-above counters per flow
pub const ABOVE_POOLS: usize = 16;

/// Saturation value of a match-above counter
pub const ABOVE_CEILING: u16 = 32766;

/// How the flow's protocol was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reason {
    /// Still awaiting more data
    #[default]
    Undetermined,
    /// Decided by inspection (possibly as "unknown")
    Detected,
    /// Inferred from ports after inspection gave up
    Guessed,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reason::Undetermined => "undetermined",
            Reason::Detected => "detected",
            Reason::Guessed => "guessed",
        })
    }
}

/// Saturating per-pool packet counter
///
/// Remembers the packet that last charged it so that a packet delivered more
/// than once is only counted once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AboveCounter {
    value: u16,
    charged_by: Option<PacketMarker>,
}

impl AboveCounter {
    /// Current count
    pub fn value(&self) -> u16 {
        self.value
    }

    /// Count one packet unless saturated or already charged by `marker`
    pub(crate) fn charge(&mut self, marker: Option<PacketMarker>) {
        if marker.is_some() && marker == self.charged_by {
            return;
        }
        if self.value < ABOVE_CEILING {
            self.value += 1;
        }
        self.charged_by = marker;
    }
}

/// Cached classification state of one flow
#[derive(Debug, Clone)]
pub struct FlowEntry {
    identity: FlowIdentity,
    scratch: Option<FlowScratch>,
    packets_processed: u32,
    protocol_detected: bool,
    protocol: ProtocolId,
    reason: Reason,
    excluded: ProtocolBitmask,
    above: [AboveCounter; ABOVE_POOLS],
    last_marker: Option<PacketMarker>,
}

impl FlowEntry {
    pub(crate) fn new(identity: FlowIdentity, scratch: FlowScratch) -> Self {
        Self {
            identity,
            scratch: Some(scratch),
            packets_processed: 0,
            protocol_detected: false,
            protocol: ProtocolId::UNKNOWN,
            reason: Reason::Undetermined,
            excluded: ProtocolBitmask::new(),
            above: [AboveCounter::default(); ABOVE_POOLS],
            last_marker: None,
        }
    }

    /// An already-latched entry with no detector state
    pub fn classified(identity: FlowIdentity, protocol: ProtocolId, reason: Reason) -> Self {
        Self {
            identity,
            scratch: None,
            packets_processed: 0,
            protocol_detected: true,
            protocol,
            reason,
            excluded: ProtocolBitmask::new(),
            above: [AboveCounter::default(); ABOVE_POOLS],
            last_marker: None,
        }
    }

    /// Start a new classification cycle in place, handing back the old scratch
    pub(crate) fn reinit(&mut self, identity: FlowIdentity, scratch: FlowScratch) -> Option<FlowScratch> {
        let old = std::mem::replace(self, Self::new(identity, scratch));
        old.scratch
    }

    /// Connection identity this entry was built for
    pub fn identity(&self) -> &FlowIdentity {
        &self.identity
    }

    /// Current protocol (`NOT_YET` while undecided)
    pub fn protocol(&self) -> ProtocolId {
        self.protocol
    }

    /// How the protocol was established
    pub fn reason(&self) -> Reason {
        self.reason
    }

    /// Whether classification has finished for this cycle
    pub fn is_detected(&self) -> bool {
        self.protocol_detected
    }

    /// Packets inspected so far (duplicates excluded)
    pub fn packets_processed(&self) -> u32 {
        self.packets_processed
    }

    /// Protocols ruled out for this cycle
    pub fn excluded(&self) -> &ProtocolBitmask {
        &self.excluded
    }

    /// Whether detector scratch is still attached
    pub fn has_scratch(&self) -> bool {
        self.scratch.is_some()
    }

    /// Detector state, present only while classifying
    pub fn scratch(&self) -> Option<&FlowScratch> {
        self.scratch.as_ref()
    }

    /// Counter of pool `pool`
    pub fn above(&self, pool: usize) -> Option<&AboveCounter> {
        self.above.get(pool)
    }

    pub(crate) fn above_mut(&mut self, pool: usize) -> Option<&mut AboveCounter> {
        self.above.get_mut(pool)
    }

    /// Marker of the last packet inspected
    pub fn last_marker(&self) -> Option<PacketMarker> {
        self.last_marker
    }

    /// Whether `marker` is a redelivery of the last inspected packet
    pub fn is_duplicate(&self, marker: &PacketMarker) -> bool {
        self.last_marker.as_ref() == Some(marker)
    }

    pub(crate) fn record_packet(&mut self, marker: PacketMarker) {
        self.last_marker = Some(marker);
        self.packets_processed = self.packets_processed.saturating_add(1);
    }

    pub(crate) fn sweep(&mut self, view: &PacketView<'_>) -> Sweep {
        match self.scratch.as_mut() {
            Some(scratch) => scratch.sweep(view, &mut self.excluded),
            None => Sweep::Exhausted,
        }
    }

    pub(crate) fn set_pending(&mut self, protocol: ProtocolId) {
        self.protocol = protocol;
        self.reason = Reason::Undetermined;
    }

    /// Set the latch and detach the scratch; a latched entry is left alone
    pub(crate) fn latch(&mut self, protocol: ProtocolId, reason: Reason) -> Option<FlowScratch> {
        if self.protocol_detected {
            return None;
        }
        self.protocol_detected = true;
        self.protocol = protocol;
        self.reason = reason;
        self.scratch.take()
    }

    /// Detach the scratch without latching (flow leaving the cache)
    pub(crate) fn take_scratch(&mut self) -> Option<FlowScratch> {
        self.scratch.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Transport;
    use std::net::{IpAddr, Ipv4Addr};

    fn identity() -> FlowIdentity {
        let a = IpAddr::V4(Ipv4Addr::LOCALHOST);
        FlowIdentity::from_tuple(Transport::Udp, a, 1000, a, 2000)
    }

    fn marker(token: u64) -> PacketMarker {
        PacketMarker {
            token,
            timestamp: 7,
        }
    }

    #[test]
    fn test_counter_saturates() {
        let mut counter = AboveCounter::default();
        for _ in 0..(ABOVE_CEILING as u32 + 10) {
            counter.charge(None);
        }
        assert_eq!(counter.value(), ABOVE_CEILING);
    }

    #[test]
    fn test_counter_charged_once_per_packet() {
        let mut counter = AboveCounter::default();
        counter.charge(Some(marker(1)));
        counter.charge(Some(marker(1)));
        assert_eq!(counter.value(), 1);
        counter.charge(Some(marker(2)));
        assert_eq!(counter.value(), 2);
    }

    #[test]
    fn test_latch_is_one_way() {
        let mut entry = FlowEntry::new(identity(), FlowScratch::default());
        assert!(entry.latch(ProtocolId::DNS, Reason::Detected).is_some());
        assert!(entry.latch(ProtocolId::HTTP, Reason::Guessed).is_none());
        assert_eq!(entry.protocol(), ProtocolId::DNS);
        assert_eq!(entry.reason(), Reason::Detected);
        assert!(!entry.has_scratch());
    }

    #[test]
    fn test_reinit_resets_everything() {
        let mut entry = FlowEntry::new(identity(), FlowScratch::default());
        entry.record_packet(marker(1));
        entry.above_mut(3).unwrap().charge(None);
        entry.latch(ProtocolId::TLS, Reason::Detected);

        let old = entry.reinit(identity(), FlowScratch::default());
        assert!(old.is_none());
        assert!(!entry.is_detected());
        assert_eq!(entry.packets_processed(), 0);
        assert_eq!(entry.above(3).unwrap().value(), 0);
        assert_eq!(entry.last_marker(), None);
        assert!(entry.has_scratch());
    }

    #[test]
    fn test_duplicate_marker() {
        let mut entry = FlowEntry::new(identity(), FlowScratch::default());
        assert!(!entry.is_duplicate(&marker(1)));
        entry.record_packet(marker(1));
        assert!(entry.is_duplicate(&marker(1)));
        assert!(!entry.is_duplicate(&PacketMarker {
            token: 1,
            timestamp: 8
        }));
    }

    #[test]
    fn test_pool_bounds() {
        let entry = FlowEntry::classified(identity(), ProtocolId::DNS, Reason::Detected);
        assert!(entry.above(ABOVE_POOLS - 1).is_some());
        assert!(entry.above(ABOVE_POOLS).is_none());
    }
}
