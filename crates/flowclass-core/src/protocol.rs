//! Protocol identifiers and protocol sets
//!
//! Protocols are small integer ids so that policies can carry them as a
//! fixed-width bitmask. Two ids are reserved: [`ProtocolId::UNKNOWN`] for a
//! flow that was inspected and matched nothing, and [`ProtocolId::NOT_YET`]
//! for a flow that is still awaiting more data.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifier of an application protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolId(pub u16);

impl ProtocolId {
    /// Inspected, nothing matched
    pub const UNKNOWN: ProtocolId = ProtocolId(0);
    /// FTP control channel
    pub const FTP_CONTROL: ProtocolId = ProtocolId(1);
    /// HTTP/1.x
    pub const HTTP: ProtocolId = ProtocolId(2);
    /// DNS
    pub const DNS: ProtocolId = ProtocolId(3);
    /// TLS
    pub const TLS: ProtocolId = ProtocolId(4);
    /// KuGou Music
    pub const KUGOU_MUSIC: ProtocolId = ProtocolId(5);
    /// Awaiting more data; always one past the last real protocol
    pub const NOT_YET: ProtocolId = ProtocolId(6);

    /// Whether this id names an actual protocol (not one of the sentinels)
    pub fn is_real(self) -> bool {
        self != Self::UNKNOWN && self != Self::NOT_YET
    }

    /// Human-readable name, or `None` for ids outside the table
    pub fn name(self) -> Option<&'static str> {
        PROTOCOLS.get(self.0 as usize).map(|p| p.name)
    }

    /// Look up an id by its configuration key (`"http"`, `"kugou_music"`...)
    pub fn from_key(key: &str) -> Result<Self> {
        BY_KEY
            .get(key.to_ascii_lowercase().as_str())
            .copied()
            .ok_or_else(|| Error::UnknownProtocol {
                name: key.to_string(),
            })
    }

    /// Configuration key of this id
    pub fn key(self) -> Option<&'static str> {
        PROTOCOLS.get(self.0 as usize).map(|p| p.key)
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "proto#{}", self.0),
        }
    }
}

/// Static description of a protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolInfo {
    /// Protocol id
    pub id: ProtocolId,
    /// Configuration key
    pub key: &'static str,
    /// Display name
    pub name: &'static str,
}

/// Every protocol id, indexed by its numeric value
static PROTOCOLS: &[ProtocolInfo] = &[
    ProtocolInfo { id: ProtocolId::UNKNOWN, key: "unknown", name: "Unknown" },
    ProtocolInfo { id: ProtocolId::FTP_CONTROL, key: "ftp_control", name: "FTP_CONTROL" },
    ProtocolInfo { id: ProtocolId::HTTP, key: "http", name: "HTTP" },
    ProtocolInfo { id: ProtocolId::DNS, key: "dns", name: "DNS" },
    ProtocolInfo { id: ProtocolId::TLS, key: "tls", name: "TLS" },
    ProtocolInfo { id: ProtocolId::KUGOU_MUSIC, key: "kugou_music", name: "KuGouMusic" },
    ProtocolInfo { id: ProtocolId::NOT_YET, key: "not_yet", name: "NotYet" },
];

static BY_KEY: Lazy<HashMap<&'static str, ProtocolId>> =
    Lazy::new(|| PROTOCOLS.iter().map(|p| (p.key, p.id)).collect());

/// Read-only view of the protocol table
pub struct ProtocolTable;

impl ProtocolTable {
    /// All ids from `UNKNOWN` up to and including `NOT_YET`
    pub fn iter() -> impl Iterator<Item = &'static ProtocolInfo> {
        PROTOCOLS.iter()
    }

    /// Number of ids, sentinels included
    pub fn len() -> usize {
        PROTOCOLS.len()
    }
}

const MASK_WORDS: usize = 4;

/// Fixed-width set of protocol ids (ids 0..256)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ProtocolBitmask {
    words: [u64; MASK_WORDS],
}

impl ProtocolBitmask {
    /// Highest id + 1 representable in the mask
    pub const CAPACITY: usize = MASK_WORDS * 64;

    /// Empty set
    pub const fn new() -> Self {
        Self {
            words: [0; MASK_WORDS],
        }
    }

    /// Add an id; ids beyond the capacity are ignored
    pub fn insert(&mut self, id: ProtocolId) {
        let idx = id.0 as usize;
        if idx < Self::CAPACITY {
            self.words[idx / 64] |= 1u64 << (idx % 64);
        }
    }

    /// Builder-style insert
    pub fn with(mut self, id: ProtocolId) -> Self {
        self.insert(id);
        self
    }

    /// Membership test
    pub fn contains(&self, id: ProtocolId) -> bool {
        let idx = id.0 as usize;
        idx < Self::CAPACITY && self.words[idx / 64] & (1u64 << (idx % 64)) != 0
    }

    /// True if no id is set
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of ids set
    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Iterate the ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = ProtocolId> + '_ {
        (0..Self::CAPACITY)
            .filter(move |i| self.words[i / 64] & (1u64 << (i % 64)) != 0)
            .map(|i| ProtocolId(i as u16))
    }

    /// Build a mask from configuration keys
    pub fn from_keys<S: AsRef<str>>(keys: &[S]) -> Result<Self> {
        keys.iter()
            .map(|k| ProtocolId::from_key(k.as_ref()))
            .collect()
    }
}

impl FromIterator<ProtocolId> for ProtocolBitmask {
    fn from_iter<I: IntoIterator<Item = ProtocolId>>(iter: I) -> Self {
        let mut mask = Self::new();
        for id in iter {
            mask.insert(id);
        }
        mask
    }
}
