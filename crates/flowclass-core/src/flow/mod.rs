//! Flow tracking
//!
//! Flow identity, cache keys, per-flow entries and the LRU flow cache.

mod cache;
mod entry;
mod identity;
mod key;

pub use cache::{EndCause, FlowCache, FlowObserver, LoggingObserver, Resolution};
pub use entry::{AboveCounter, FlowEntry, Reason, ABOVE_CEILING, ABOVE_POOLS};
pub use identity::{Endpoint, FlowIdentity};
pub use key::FlowKey;
