//! Per-packet classification pipeline
//!
//! [`Classifier::process`] is the single entry point the host calls for
//! every packet. It resolves the flow, short-circuits latched flows and
//! redelivered packets, advances the detectors, applies the classification
//! budget and renders a verdict. Internal failures never reach the data
//! path: they are logged and the packet passes.

use crate::config::{ClassificationConfig, Config};
use crate::detect::{guess, DetectorRegistry, PacketView, ScratchPool, Sweep};
use crate::error::{Error, Result};
use crate::flow::{FlowCache, FlowEntry, FlowObserver, LoggingObserver, Reason, Resolution};
use crate::packet::{ConnId, Packet};
use crate::protocol::{ProtocolBitmask, ProtocolId};
use crate::verdict::{self, Policy, Verdict};
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Mark-only invocation: classify, never filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarkTarget {
    /// Mark the host attaches to the packet
    pub mark: u32,
}

/// What a mark-only invocation asks the host to attach to the packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMark {
    /// Mark from the [`MarkTarget`]
    pub mark: u32,
    /// Flow protocol after this packet (`UNKNOWN` when classification failed)
    pub protocol: ProtocolId,
}

/// Classification budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierOptions {
    /// Packets after which any flow is finalized
    pub packet_ceiling: u32,
    /// Packets after which a flow showing a weak protocol is finalized
    pub weak_packet_limit: u32,
    /// Fall back to well-known ports on finalization
    pub guess_protocol: bool,
    /// Protocols prone to false positives
    pub weak: ProtocolBitmask,
    /// Protocols whose flows are never finalized
    pub always_inspect: ProtocolBitmask,
}

impl ClassifierOptions {
    /// Build from the `[classification]` section
    pub fn from_config(config: &ClassificationConfig) -> Result<Self> {
        Ok(Self {
            packet_ceiling: config.packet_ceiling,
            weak_packet_limit: config.weak_packet_limit,
            guess_protocol: config.guess_protocol,
            weak: ProtocolBitmask::from_keys(&config.weak_protocols)?,
            always_inspect: ProtocolBitmask::from_keys(&config.always_inspect)?,
        })
    }

    fn should_finalize(&self, protocol: ProtocolId, packets: u32, exhausted: bool) -> bool {
        if self.always_inspect.contains(protocol) {
            return false;
        }
        let weak = self.weak.contains(protocol);
        (weak && packets >= self.weak_packet_limit)
            || packets >= self.packet_ceiling
            || (protocol.is_real() && !weak)
            || exhausted
    }

    fn final_protocol(&self, protocol: ProtocolId, entry: &FlowEntry) -> (ProtocolId, Reason) {
        if protocol.is_real() {
            return (protocol, Reason::Detected);
        }
        if self.guess_protocol {
            let identity = entry.identity();
            let (a, b) = identity.endpoints();
            if let Some(guessed) = guess::guess(identity.transport(), a.port, b.port)
                .filter(|p| !entry.excluded().contains(*p))
            {
                return (guessed, Reason::Guessed);
            }
        }
        (ProtocolId::UNKNOWN, Reason::Detected)
    }
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            packet_ceiling: 20,
            weak_packet_limit: 5,
            guess_protocol: true,
            weak: ProtocolBitmask::new().with(ProtocolId::HTTP),
            always_inspect: ProtocolBitmask::new().with(ProtocolId::FTP_CONTROL),
        }
    }
}

/// Classification statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Packets offered
    pub packets: u64,
    /// Redelivered packets that skipped inspection
    pub duplicates: u64,
    /// Flows created
    pub cache_misses: u64,
    /// Packets of an already cached flow
    pub cache_hits: u64,
    /// Flows restarted because their key was reused
    pub flows_recycled: u64,
    /// Packets passed because classification could not run
    pub fail_open: u64,
    /// Flows finalized with an inspected protocol (including unknown)
    pub flows_detected: u64,
    /// Flows finalized with a port guess
    pub flows_guessed: u64,
    /// Block verdicts
    pub blocked: u64,
    /// Pass verdicts
    pub passed: u64,
}

/// Inline flow classifier
///
/// Not internally synchronized; wrap it in [`SharedClassifier`] when several
/// threads feed packets.
#[derive(Debug)]
pub struct Classifier {
    cache: FlowCache,
    options: ClassifierOptions,
    stats: Stats,
}

impl Classifier {
    /// Build a classifier from validated configuration
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_observer(config, Box::new(LoggingObserver))
    }

    /// Build a classifier reporting ended flows to `observer`
    pub fn with_observer(config: &Config, observer: Box<dyn FlowObserver + Send>) -> Result<Self> {
        config.validate()?;
        let registry = DetectorRegistry::from_keys(&config.detectors.enabled)?;
        let capacity = NonZeroUsize::new(config.cache.capacity)
            .ok_or_else(|| Error::config_value("cache.capacity", "Must be at least 1"))?;

        info!(
            detectors = ?registry.names(),
            capacity,
            max_active = config.cache.max_active_classifications,
            "classifier ready"
        );

        let pool = ScratchPool::new(registry, config.cache.max_active_classifications);
        Ok(Self::from_parts(
            FlowCache::with_observer(capacity, pool, observer),
            ClassifierOptions::from_config(&config.classification)?,
        ))
    }

    /// Assemble from an existing cache
    pub fn from_parts(cache: FlowCache, options: ClassifierOptions) -> Self {
        Self {
            cache,
            options,
            stats: Stats::default(),
        }
    }

    /// Classify one packet
    ///
    /// Exactly one of `policy` (match invocation) and `target` (mark-only
    /// invocation) must be given. A mark-only invocation always passes.
    #[instrument(skip_all, fields(conn = packet.conn.0, transport = %packet.transport()))]
    pub fn process(
        &mut self,
        packet: &Packet<'_>,
        policy: Option<&Policy>,
        target: Option<&MarkTarget>,
    ) -> Result<Verdict> {
        let policy = Self::select_policy(policy, target)?;
        Ok(self.classify(packet, &policy).0)
    }

    /// Match invocation
    pub fn process_match(&mut self, packet: &Packet<'_>, policy: &Policy) -> Result<Verdict> {
        self.process(packet, Some(policy), None)
    }

    /// Mark-only invocation
    #[instrument(skip_all, fields(conn = packet.conn.0, mark = target.mark))]
    pub fn process_target(&mut self, packet: &Packet<'_>, target: &MarkTarget) -> Result<PacketMark> {
        let policy = Self::select_policy(None, Some(target))?;
        let (_, protocol) = self.classify(packet, &policy);
        Ok(PacketMark {
            mark: target.mark,
            protocol,
        })
    }

    fn select_policy(policy: Option<&Policy>, target: Option<&MarkTarget>) -> Result<Policy> {
        match (policy, target) {
            (Some(policy), None) => {
                policy.validate()?;
                Ok(*policy)
            }
            (None, Some(_)) => Ok(Policy::empty()),
            (Some(_), Some(_)) => Err(Error::policy_misuse("both a match policy and a mark target given")),
            (None, None) => Err(Error::policy_misuse("neither a match policy nor a mark target given")),
        }
    }

    fn classify(&mut self, packet: &Packet<'_>, policy: &Policy) -> (Verdict, ProtocolId) {
        self.stats.packets += 1;
        let marker = packet.marker();

        let (resolution, entry) = match self.cache.resolve(packet.conn, packet.identity) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(error = %e, flow = %packet.identity, "classification skipped, passing packet");
                self.stats.fail_open += 1;
                self.stats.passed += 1;
                return (Verdict::Pass, ProtocolId::UNKNOWN);
            }
        };
        match resolution {
            Resolution::Miss => self.stats.cache_misses += 1,
            Resolution::Hit => self.stats.cache_hits += 1,
            Resolution::Recycled => self.stats.flows_recycled += 1,
        }

        let mut released = None;
        let verdict = if entry.is_detected() {
            verdict::evaluate_marked(entry, policy, Some(marker))
        } else if entry.is_duplicate(&marker) {
            debug!("duplicate delivery, not inspecting");
            self.stats.duplicates += 1;
            verdict::evaluate_marked(entry, policy, Some(marker))
        } else {
            entry.record_packet(marker);
            let view = PacketView {
                transport: packet.transport(),
                payload: packet.payload,
            };
            let sweep = entry.sweep(&view);

            let current = match sweep {
                Sweep::Accepted(protocol) => protocol,
                Sweep::Pending | Sweep::Exhausted if entry.protocol().is_real() => entry.protocol(),
                Sweep::Pending | Sweep::Exhausted => ProtocolId::UNKNOWN,
            };
            let packets = entry.packets_processed();

            if self
                .options
                .should_finalize(current, packets, sweep == Sweep::Exhausted)
            {
                let (protocol, reason) = self.options.final_protocol(current, entry);
                released = entry.latch(protocol, reason);
                match reason {
                    Reason::Guessed => self.stats.flows_guessed += 1,
                    _ => self.stats.flows_detected += 1,
                }
                info!(flow = %entry.identity(), %protocol, %reason, packets, "flow classified");
            } else {
                let pending = if current == ProtocolId::UNKNOWN {
                    ProtocolId::NOT_YET
                } else {
                    current
                };
                entry.set_pending(pending);
                debug!(protocol = %pending, packets, "flow still classifying");
            }

            verdict::evaluate_marked(entry, policy, Some(marker))
        };
        let protocol = entry.protocol();

        if let Some(scratch) = released {
            self.cache.recycle(scratch);
        }
        match verdict {
            Verdict::Block => self.stats.blocked += 1,
            Verdict::Pass => self.stats.passed += 1,
        }
        (verdict, protocol)
    }

    /// Cached entry of `conn`, if any
    pub fn lookup(&self, conn: ConnId) -> Option<&FlowEntry> {
        self.cache.get(conn)
    }

    /// Flow cache
    pub fn cache(&self) -> &FlowCache {
        &self.cache
    }

    /// Statistics so far
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Classification budget in use
    pub fn options(&self) -> &ClassifierOptions {
        &self.options
    }

    /// End every tracked flow
    pub fn shutdown(&mut self) {
        info!(flows = self.cache.len(), "flushing flow cache");
        self.cache.clear();
    }
}

/// [`Classifier`] behind one lock, for hosts with concurrent callers
#[derive(Debug, Clone)]
pub struct SharedClassifier {
    inner: Arc<Mutex<Classifier>>,
}

impl SharedClassifier {
    /// Wrap a classifier
    pub fn new(classifier: Classifier) -> Self {
        Self {
            inner: Arc::new(Mutex::new(classifier)),
        }
    }

    /// Match invocation under the lock
    pub fn process_match(&self, packet: &Packet<'_>, policy: &Policy) -> Result<Verdict> {
        self.inner.lock().process_match(packet, policy)
    }

    /// Mark-only invocation under the lock
    pub fn process_target(&self, packet: &Packet<'_>, target: &MarkTarget) -> Result<PacketMark> {
        self.inner.lock().process_target(packet, target)
    }

    /// Run `f` with exclusive access
    pub fn with<R>(&self, f: impl FnOnce(&mut Classifier) -> R) -> R {
        f(&mut self.inner.lock())
    }
}
