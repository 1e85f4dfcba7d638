//! Verdict engine
//!
//! A policy matches a flow when the flow's protocol is in the policy's
//! protocol set. Without a threshold a match blocks. With a `match_above`
//! threshold only the first matching packets block: each one charges the
//! policy's counter pool on the entry, and once the counter exceeds the
//! threshold the flow passes.

use crate::error::{Error, Result};
use crate::flow::{FlowEntry, ABOVE_POOLS};
use crate::packet::PacketMarker;
use crate::protocol::ProtocolBitmask;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pass/block decision for one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Let the packet through (also the fail-open default)
    #[default]
    Pass,
    /// The policy matched
    Block,
}

impl Verdict {
    /// Whether this is [`Verdict::Block`]
    pub fn is_block(self) -> bool {
        self == Verdict::Block
    }

    fn from_match(matched: bool) -> Self {
        if matched {
            Verdict::Block
        } else {
            Verdict::Pass
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Pass => "PASS",
            Verdict::Block => "BLOCK",
        })
    }
}

/// Caller-owned match policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Policy {
    protocols: ProtocolBitmask,
    match_above: Option<u16>,
    pool: usize,
}

impl Policy {
    /// Policy matching `protocols`, no threshold, pool 0
    pub fn new(protocols: ProtocolBitmask) -> Self {
        Self {
            protocols,
            match_above: None,
            pool: 0,
        }
    }

    /// Policy that matches nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set the match-above threshold; negative disables it
    pub fn with_match_above(mut self, threshold: i32) -> Self {
        self.match_above = u16::try_from(threshold)
            .ok()
            .or_else(|| (threshold > 0).then_some(u16::MAX));
        self
    }

    /// Select the counter pool
    pub fn with_pool(mut self, pool: usize) -> Self {
        self.pool = pool;
        self
    }

    /// Protocol set
    pub fn protocols(&self) -> &ProtocolBitmask {
        &self.protocols
    }

    /// Threshold, if enabled
    pub fn match_above(&self) -> Option<u16> {
        self.match_above
    }

    /// Counter pool index
    pub fn pool(&self) -> usize {
        self.pool
    }

    /// Reject a pool index the entry has no counter for
    pub fn validate(&self) -> Result<()> {
        if self.pool >= ABOVE_POOLS {
            return Err(Error::policy_misuse(format!(
                "pool {} out of range (0..{ABOVE_POOLS})",
                self.pool
            )));
        }
        Ok(())
    }
}

/// Evaluate `policy` against `entry`, charging its counter pool
pub fn evaluate(entry: &mut FlowEntry, policy: &Policy) -> Verdict {
    evaluate_marked(entry, policy, None)
}

/// Like [`evaluate`], but a counter already charged by `marker` is not
/// charged again
pub fn evaluate_marked(entry: &mut FlowEntry, policy: &Policy, marker: Option<PacketMarker>) -> Verdict {
    let matched = policy.protocols.contains(entry.protocol());
    let Some(threshold) = policy.match_above.filter(|_| matched) else {
        return Verdict::from_match(matched);
    };
    let Some(counter) = entry.above_mut(policy.pool) else {
        return Verdict::from_match(matched);
    };

    if counter.value() <= threshold {
        counter.charge(marker);
    }
    Verdict::from_match(counter.value() <= threshold)
}

/// The verdict [`evaluate`] would give if the counter had already been
/// charged for this packet
pub fn peek(entry: &FlowEntry, policy: &Policy) -> Verdict {
    let matched = policy.protocols.contains(entry.protocol());
    match (policy.match_above.filter(|_| matched), entry.above(policy.pool)) {
        (Some(threshold), Some(counter)) => Verdict::from_match(counter.value() <= threshold),
        _ => Verdict::from_match(matched),
    }
}
