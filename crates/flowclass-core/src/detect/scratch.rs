//! Per-flow detector scratch and its recycling pool
//!
//! A [`FlowScratch`] holds one [`DetectorState`] per enabled detector for a
//! flow that is still being classified. Scratch regions are handed out by a
//! bounded [`ScratchPool`] and returned to it as soon as the flow latches, so
//! steady-state flows hold no detector memory and regions are reset rather
//! than reallocated between flows.

use super::{Detector, DetectorKind, DetectorRegistry, DetectorState, Outcome, PacketView};
use crate::error::{Error, Result};
use crate::protocol::{ProtocolBitmask, ProtocolId};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct Slot {
    state: DetectorState,
    retired: bool,
}

/// Result of sweeping one packet across a flow's detectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    /// A detector accepted the flow
    Accepted(ProtocolId),
    /// At least one applicable detector is still undecided
    Pending,
    /// Every applicable detector has retired without accepting
    Exhausted,
}

/// Detector states of one flow
#[derive(Debug, Clone, Default)]
pub struct FlowScratch {
    slots: Vec<Slot>,
}

impl FlowScratch {
    fn reset(&mut self, kinds: &[DetectorKind]) {
        self.slots.clear();
        self.slots.extend(kinds.iter().map(|k| Slot {
            state: k.fresh_state(),
            retired: false,
        }));
    }

    /// State of the detector of `kind`, if enabled
    pub fn state(&self, kind: DetectorKind) -> Option<&DetectorState> {
        self.slots
            .iter()
            .find(|s| s.state.kind() == kind)
            .map(|s| &s.state)
    }

    /// Whether the detector of `kind` has stopped receiving packets
    pub fn is_retired(&self, kind: DetectorKind) -> bool {
        self.slots
            .iter()
            .find(|s| s.state.kind() == kind)
            .map_or(true, |s| s.retired)
    }

    /// Feed one packet to every live, applicable detector in priority order
    ///
    /// Rejections are recorded in `excluded`. The sweep stops at the first
    /// acceptance.
    pub fn sweep(&mut self, packet: &PacketView<'_>, excluded: &mut ProtocolBitmask) -> Sweep {
        let mut live = false;

        for slot in &mut self.slots {
            let kind = slot.state.kind();
            if slot.retired || !kind.transports().admits(packet.transport) {
                continue;
            }
            if excluded.contains(kind.protocol()) {
                slot.retired = true;
                continue;
            }

            match slot.state.consume(packet) {
                Outcome::Undecided => live = true,
                Outcome::Accept => {
                    slot.retired = true;
                    trace!(detector = kind.key(), "detector accepted");
                    return Sweep::Accepted(kind.protocol());
                }
                Outcome::Reject => {
                    slot.retired = true;
                    excluded.insert(kind.protocol());
                    trace!(detector = kind.key(), "detector rejected");
                }
            }
        }

        if live {
            Sweep::Pending
        } else {
            Sweep::Exhausted
        }
    }
}

/// Bounded pool of scratch regions
///
/// At most `max_active` regions are handed out at once; asking for more is
/// reported as [`Error::ResourceExhausted`].
#[derive(Debug)]
pub struct ScratchPool {
    registry: DetectorRegistry,
    free: Vec<FlowScratch>,
    active: usize,
    max_active: usize,
}

impl ScratchPool {
    /// Create a pool for the detectors in `registry`
    pub fn new(registry: DetectorRegistry, max_active: usize) -> Self {
        Self {
            registry,
            free: Vec::new(),
            active: 0,
            max_active,
        }
    }

    /// Detectors every region is initialized with
    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    /// Regions currently handed out
    pub fn active(&self) -> usize {
        self.active
    }

    /// Maximum number of regions handed out at once
    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Take a region reset to every detector's initial stage
    pub fn acquire(&mut self) -> Result<FlowScratch> {
        if self.active >= self.max_active {
            debug!(active = self.active, "scratch pool exhausted");
            return Err(Error::exhausted(format!(
                "detector scratch ({} regions in use)",
                self.active
            )));
        }

        let mut scratch = match self.free.pop() {
            Some(scratch) => scratch,
            None => {
                let mut slots = Vec::new();
                slots
                    .try_reserve_exact(self.registry.len())
                    .map_err(|e| Error::exhausted(format!("detector scratch: {e}")))?;
                FlowScratch { slots }
            }
        };
        scratch.reset(self.registry.kinds());
        self.active += 1;
        Ok(scratch)
    }

    /// Give a region back for reuse
    pub fn release(&mut self, scratch: FlowScratch) {
        self.active = self.active.saturating_sub(1);
        if self.free.len() < self.max_active {
            self.free.push(scratch);
        }
    }
}
