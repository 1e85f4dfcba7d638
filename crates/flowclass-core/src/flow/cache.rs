//! Flow cache with identity reconciliation
//!
//! Entries live in a slot arena; an [`LruCache`] maps each [`FlowKey`] to its
//! slot and decides eviction order. Since keys can alias, every hit is
//! checked against the stored [`FlowIdentity`]; a mismatch ends the stale
//! flow and restarts the slot in place.

use super::{FlowEntry, FlowIdentity, FlowKey};
use crate::detect::{FlowScratch, ScratchPool};
use crate::error::{Error, Result};
use crate::packet::ConnId;
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::{debug, info};

/// Why a flow left the cache (or restarted)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndCause {
    /// Pushed out by capacity pressure
    Evicted,
    /// Its key was reused by a different connection
    Recycled,
    /// The cache was cleared
    Cleared,
}

/// Receives the terminal state of every flow before its slot is reused
#[cfg_attr(test, mockall::automock)]
pub trait FlowObserver {
    /// Called once per ended flow, before the entry is reinitialized
    fn flow_ended(&mut self, entry: &FlowEntry, cause: EndCause);
}

/// Default observer: logs every ended flow
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl FlowObserver for LoggingObserver {
    fn flow_ended(&mut self, entry: &FlowEntry, cause: EndCause) {
        info!(
            flow = %entry.identity(),
            packets = entry.packets_processed(),
            protocol = %entry.protocol(),
            reason = %entry.reason(),
            ?cause,
            "exporting dead flow"
        );
    }
}

/// How [`FlowCache::resolve`] found the entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// New entry created
    Miss,
    /// Existing entry with matching identity
    Hit,
    /// Key reused by another flow; entry restarted in place
    Recycled,
}

/// LRU-ordered store of [`FlowEntry`] records
pub struct FlowCache {
    index: LruCache<FlowKey, usize>,
    slots: Vec<FlowEntry>,
    free_slots: Vec<usize>,
    pool: ScratchPool,
    observer: Box<dyn FlowObserver + Send>,
    evictions: u64,
}

impl FlowCache {
    /// Create a cache holding at most `capacity` flows
    pub fn new(capacity: NonZeroUsize, pool: ScratchPool) -> Self {
        Self::with_observer(capacity, pool, Box::new(LoggingObserver))
    }

    /// Create a cache reporting ended flows to `observer`
    pub fn with_observer(
        capacity: NonZeroUsize,
        pool: ScratchPool,
        observer: Box<dyn FlowObserver + Send>,
    ) -> Self {
        Self {
            index: LruCache::new(capacity),
            slots: Vec::new(),
            free_slots: Vec::new(),
            pool,
            observer,
            evictions: 0,
        }
    }

    /// Find or create the entry of `conn`, reconciling its identity
    ///
    /// Fails only with [`Error::ResourceExhausted`]; on failure no entry for
    /// `conn` remains in the cache.
    pub fn resolve(
        &mut self,
        conn: ConnId,
        identity: FlowIdentity,
    ) -> Result<(Resolution, &mut FlowEntry)> {
        let key = FlowKey::from_conn(conn);

        let (resolution, slot) = match self.index.get(&key).copied() {
            Some(slot) if self.slots[slot].identity().matches(&identity) => (Resolution::Hit, slot),
            Some(slot) => {
                self.restart(key, slot, identity)?;
                (Resolution::Recycled, slot)
            }
            None => (Resolution::Miss, self.insert(key, identity)?),
        };

        Ok((resolution, &mut self.slots[slot]))
    }

    fn restart(&mut self, key: FlowKey, slot: usize, identity: FlowIdentity) -> Result<()> {
        debug!(old = %self.slots[slot].identity(), new = %identity, "flow key reused");
        self.observer.flow_ended(&self.slots[slot], EndCause::Recycled);
        if let Some(scratch) = self.slots[slot].take_scratch() {
            self.pool.release(scratch);
        }

        match self.pool.acquire() {
            Ok(scratch) => {
                self.slots[slot].reinit(identity, scratch);
                Ok(())
            }
            Err(e) => {
                self.index.pop(&key);
                self.free_slots.push(slot);
                Err(e)
            }
        }
    }

    fn insert(&mut self, key: FlowKey, identity: FlowIdentity) -> Result<usize> {
        let full = self.index.len() >= self.index.cap().get();
        // a full pool admits the flow only if the eviction victim returns a region
        if self.pool.active() >= self.pool.max_active() {
            let victim_frees = full
                && self
                    .index
                    .peek_lru()
                    .is_some_and(|(_, &slot)| self.slots[slot].has_scratch());
            if !victim_frees {
                debug!(active = self.pool.active(), "scratch pool exhausted");
                return Err(Error::exhausted(format!(
                    "detector scratch ({} regions in use)",
                    self.pool.active()
                )));
            }
        }

        if full {
            self.evict_lru();
        } else if self.free_slots.is_empty() {
            self.slots
                .try_reserve(1)
                .map_err(|e| Error::exhausted(format!("flow slot: {e}")))?;
        }

        let entry = FlowEntry::new(identity, self.pool.acquire()?);
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot] = entry;
                slot
            }
            None => {
                self.slots.push(entry);
                self.slots.len() - 1
            }
        };

        self.index.put(key, slot);
        Ok(slot)
    }

    fn evict_lru(&mut self) {
        let Some((_, slot)) = self.index.pop_lru() else {
            return;
        };
        self.observer.flow_ended(&self.slots[slot], EndCause::Evicted);
        if let Some(scratch) = self.slots[slot].take_scratch() {
            self.pool.release(scratch);
        }
        self.free_slots.push(slot);
        self.evictions += 1;
    }

    /// Entry of `conn` without touching LRU order
    pub fn get(&self, conn: ConnId) -> Option<&FlowEntry> {
        self.index
            .peek(&FlowKey::from_conn(conn))
            .map(|&slot| &self.slots[slot])
    }

    /// Hand detached scratch back to the pool
    pub fn recycle(&mut self, scratch: FlowScratch) {
        self.pool.release(scratch);
    }

    /// Live entries, most recently used first
    pub fn iter(&self) -> impl Iterator<Item = &FlowEntry> + '_ {
        self.index.iter().map(move |(_, &slot)| &self.slots[slot])
    }

    /// End every flow and empty the cache
    pub fn clear(&mut self) {
        while let Some((_, slot)) = self.index.pop_lru() {
            self.observer.flow_ended(&self.slots[slot], EndCause::Cleared);
            if let Some(scratch) = self.slots[slot].take_scratch() {
                self.pool.release(scratch);
            }
        }
        self.slots.clear();
        self.free_slots.clear();
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if no flow is cached
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.index.cap().get()
    }

    /// Scratch regions currently attached to flows
    pub fn active_scratch(&self) -> usize {
        self.pool.active()
    }

    /// Scratch pool
    pub fn pool(&self) -> &ScratchPool {
        &self.pool
    }

    /// Entries evicted by capacity pressure so far
    pub fn evictions(&self) -> u64 {
        self.evictions
    }
}

impl std::fmt::Debug for FlowCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("active_scratch", &self.active_scratch())
            .field("evictions", &self.evictions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectorRegistry;
    use crate::packet::Transport;
    use std::net::{IpAddr, Ipv4Addr};

    fn identity(port: u16) -> FlowIdentity {
        let a = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2));
        let b = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
        FlowIdentity::from_tuple(Transport::Udp, a, port, b, 53)
    }

    fn cache(capacity: usize, max_active: usize, observer: MockFlowObserver) -> FlowCache {
        FlowCache::with_observer(
            NonZeroUsize::new(capacity).unwrap(),
            ScratchPool::new(DetectorRegistry::all(), max_active),
            Box::new(observer),
        )
    }

    #[test]
    fn test_miss_then_hit() {
        let mut observer = MockFlowObserver::new();
        observer.expect_flow_ended().never();
        let mut cache = cache(4, 4, observer);

        let (res, _) = cache.resolve(ConnId(0x1000), identity(4000)).unwrap();
        assert_eq!(res, Resolution::Miss);
        let (res, entry) = cache.resolve(ConnId(0x1000), identity(4000)).unwrap();
        assert_eq!(res, Resolution::Hit);
        assert_eq!(entry.identity(), &identity(4000));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_mismatch_notifies_once() {
        let mut observer = MockFlowObserver::new();
        observer
            .expect_flow_ended()
            .withf(|entry, cause| *cause == EndCause::Recycled && entry.identity() == &identity(4000))
            .times(1)
            .return_const(());
        let mut cache = cache(4, 4, observer);

        cache.resolve(ConnId(0x1000), identity(4000)).unwrap();
        let (res, entry) = cache.resolve(ConnId(0x1000), identity(4001)).unwrap();
        assert_eq!(res, Resolution::Recycled);
        assert_eq!(entry.identity(), &identity(4001));
        assert!(!entry.is_detected());
        assert_eq!(cache.active_scratch(), 1);
    }

    #[test]
    fn test_eviction_notifies_and_reuses_slot() {
        let mut observer = MockFlowObserver::new();
        observer
            .expect_flow_ended()
            .withf(|_, cause| *cause == EndCause::Evicted)
            .times(1)
            .return_const(());
        let mut cache = cache(2, 4, observer);

        cache.resolve(ConnId(0x1000), identity(1)).unwrap();
        cache.resolve(ConnId(0x2000), identity(2)).unwrap();
        cache.resolve(ConnId(0x3000), identity(3)).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.evictions(), 1);
        assert!(cache.get(ConnId(0x1000)).is_none());
        assert_eq!(cache.active_scratch(), 2);
    }

    #[test]
    fn test_exhaustion_leaves_no_entry() {
        let mut observer = MockFlowObserver::new();
        observer.expect_flow_ended().never();
        let mut cache = cache(4, 1, observer);

        cache.resolve(ConnId(0x1000), identity(1)).unwrap();
        let err = cache.resolve(ConnId(0x2000), identity(2)).unwrap_err();
        assert!(err.is_fail_open());
        assert!(cache.get(ConnId(0x2000)).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_ends_every_flow() {
        let mut observer = MockFlowObserver::new();
        observer
            .expect_flow_ended()
            .withf(|_, cause| *cause == EndCause::Cleared)
            .times(3)
            .return_const(());
        let mut cache = cache(4, 4, observer);

        for i in 1..=3u64 {
            cache.resolve(ConnId(i << 12), identity(i as u16)).unwrap();
        }
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.active_scratch(), 0);
    }
}
