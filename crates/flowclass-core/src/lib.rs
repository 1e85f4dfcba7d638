//! # flowclass core
//!
//! Inline traffic classification for packet-filtering pipelines.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Flow cache** - LRU-ordered per-flow state keyed by connection object,
//!   self-healing when a key is reused by another connection
//! - **Detectors** - per-flow protocol state machines fed one packet at a time
//! - **Verdict engine** - protocol-set policies with saturating
//!   "match above" counters
//! - **Configuration** - TOML configuration for budgets and detectors
//!
//! ## Example
//!
//! ```rust,no_run
//! use flowclass_core::{Classifier, Config, Packet, Policy, ProtocolBitmask, ProtocolId};
//! use flowclass_core::flow::FlowIdentity;
//! use flowclass_core::packet::{ConnId, Transport};
//!
//! let config = Config::load("flowclass.toml")?;
//! let mut classifier = Classifier::new(&config)?;
//! let policy = Policy::new(ProtocolBitmask::new().with(ProtocolId::KUGOU_MUSIC)).with_match_above(2);
//!
//! let packet = Packet {
//!     conn: ConnId(0xffff_8800_1234_5600),
//!     identity: FlowIdentity::from_tuple(
//!         Transport::Udp,
//!         "192.168.1.10".parse()?,
//!         7000,
//!         "203.0.113.5".parse()?,
//!         8000,
//!     ),
//!     payload: &[0x65; 32],
//!     timestamp: 1,
//!     token: 1,
//! };
//! let verdict = classifier.process_match(&packet, &policy)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod admin;
pub mod classifier;
pub mod config;
pub mod detect;
pub mod error;
pub mod flow;
pub mod packet;
pub mod protocol;
pub mod verdict;

// Re-exports for convenience
pub use classifier::{Classifier, ClassifierOptions, MarkTarget, PacketMark, SharedClassifier, Stats};
pub use config::Config;
pub use error::{Error, Result};
pub use flow::{FlowEntry, FlowIdentity, Reason};
pub use packet::{ConnId, Packet, Transport};
pub use protocol::{ProtocolBitmask, ProtocolId};
pub use verdict::{Policy, Verdict};
