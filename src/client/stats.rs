//! Client-side counters.
//!
//! The listener acknowledges and discards malformed or unrecognized
//! traffic without telling anyone. These counters make that silent path
//! observable so operational message loss can be detected.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared between the publisher, listener, and sweeper.
#[derive(Default)]
pub(crate) struct ClientStats {
    pub published: AtomicU64,
    pub resolved: AtomicU64,
    pub discarded_malformed: AtomicU64,
    pub discarded_unknown: AtomicU64,
    pub discarded_duplicate: AtomicU64,
    pub evicted: AtomicU64,
}

impl ClientStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        // ---
        StatsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            discarded_malformed: self.discarded_malformed.load(Ordering::Relaxed),
            discarded_unknown: self.discarded_unknown.load(Ordering::Relaxed),
            discarded_duplicate: self.discarded_duplicate.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the client's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Requests accepted by the transport.
    pub published: u64,
    /// Inbound results stored in the registry.
    pub resolved: u64,
    /// Deliveries acknowledged and dropped as unparseable (poison policy).
    pub discarded_malformed: u64,
    /// Parseable deliveries whose id was neither issued nor awaited.
    pub discarded_unknown: u64,
    /// Redeliveries of an already-resolved id.
    pub discarded_duplicate: u64,
    /// Correlation entries removed by the TTL sweep.
    pub evicted: u64,
}
