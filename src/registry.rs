//! Shared correlation state.
//!
//! The registry is the single piece of mutable state shared between the
//! background listener and an arbitrary number of waiters. It is guarded by
//! one `std::sync::Mutex` whose critical sections are all O(1) map
//! operations; the lock is never held across an await point.
//!
//! # Lost-wakeup defense
//!
//! A waiter registers its oneshot sender under the *same* lock acquisition
//! that observed "not yet resolved" ([`CorrelationRegistry::claim_or_subscribe`]).
//! A result arriving after the lock drops therefore always finds the
//! registered sender; there is no gap between checking and blocking.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::CorrelationId;

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// Mutex poisoning indicates that another task panicked while holding the
/// lock. The protected state here is a best-effort correlation map; there
/// are no invariants spanning multiple fields, and the worst outcome is a
/// dropped or unmatched result. This avoids propagating non-`Send` poison
/// errors across async boundaries.
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Per-correlation-id state.
enum Entry {
    /// At least one waiter arrived before the result did.
    Pending {
        waiters: Vec<oneshot::Sender<Value>>,
        since: Instant,
    },
    /// The listener stored a result; a durable cache until claimed with
    /// `delete_after_use` or evicted by the TTL sweep.
    Resolved { value: Value, since: Instant },
}

struct RegistryInner {
    /// IDs minted by this client's publisher and not yet consumed. This is
    /// what makes an inbound result "recognized" before any waiter shows
    /// up; it is not wake-capable state.
    issued: HashMap<CorrelationId, Instant>,
    /// Lazily created correlation entries (first wait or first result,
    /// whichever comes first).
    entries: HashMap<CorrelationId, Entry>,
}

/// Outcome of handing an inbound result to the registry.
pub(crate) enum ResolveOutcome {
    /// Result stored. Senders for any waiters that were blocked on this id
    /// are handed back so the caller can fire them outside the lock.
    Stored(Vec<oneshot::Sender<Value>>),
    /// The id already holds a result; broker redelivery, dropped.
    Duplicate,
    /// Neither issued by this client nor awaited; dropped.
    Unknown,
}

/// Outcome of a waiter's atomic check-and-register.
pub(crate) enum WaitHandle {
    /// Already resolved; the value (claimed per `delete_after_use`).
    Ready(Value),
    /// Not resolved yet; receiver fires when the listener resolves the id.
    Waiting(oneshot::Receiver<Value>),
}

/// Shared mapping from correlation id to pending/resolved state.
pub(crate) struct CorrelationRegistry {
    inner: Mutex<RegistryInner>,
}

impl CorrelationRegistry {
    // ---
    pub fn new() -> Self {
        // ---
        Self {
            inner: Mutex::new(RegistryInner {
                issued: HashMap::new(),
                entries: HashMap::new(),
            }),
        }
    }

    /// Record that this client's publisher minted `id`.
    ///
    /// O(1); creates no wake-capable entry.
    pub fn mark_issued(&self, id: &CorrelationId) {
        // ---
        let mut inner = lock_ignore_poison(&self.inner);
        inner.issued.insert(id.clone(), Instant::now());
    }

    /// Roll back an issued mark after a failed publish, so the failed
    /// attempt leaves no registry residue.
    pub fn forget_issued(&self, id: &CorrelationId) {
        // ---
        let mut inner = lock_ignore_poison(&self.inner);
        inner.issued.remove(id);
    }

    /// Waiter entry point: claim a resolved value, or register a waker.
    ///
    /// Check and registration happen under one lock acquisition, so a
    /// result arriving concurrently either lands before the check (claimed
    /// here) or after it (delivered through the registered sender). Never
    /// lost.
    pub fn claim_or_subscribe(&self, id: &CorrelationId, delete_after_use: bool) -> WaitHandle {
        // ---
        let mut inner = lock_ignore_poison(&self.inner);

        if let Some(Entry::Resolved { value, .. }) = inner.entries.get(id) {
            let value = value.clone();
            if delete_after_use {
                inner.entries.remove(id);
                inner.issued.remove(id);
            }
            return WaitHandle::Ready(value);
        }

        let (tx, rx) = oneshot::channel();
        match inner.entries.entry(id.clone()) {
            std::collections::hash_map::Entry::Occupied(mut occ) => {
                if let Entry::Pending { waiters, .. } = occ.get_mut() {
                    waiters.push(tx);
                }
            }
            std::collections::hash_map::Entry::Vacant(vac) => {
                vac.insert(Entry::Pending {
                    waiters: vec![tx],
                    since: Instant::now(),
                });
            }
        }

        WaitHandle::Waiting(rx)
    }

    /// Consume a resolved entry after a slow-path wait completed with
    /// `delete_after_use`. Idempotent; a concurrent consumer winning the
    /// race is fine.
    pub fn consume(&self, id: &CorrelationId) {
        // ---
        let mut inner = lock_ignore_poison(&self.inner);
        inner.entries.remove(id);
        inner.issued.remove(id);
    }

    /// Listener entry point: store an inbound result for `id`.
    ///
    /// A result is stored at most once per id; an already-resolved entry is
    /// reported as a duplicate, and an id that is neither issued nor awaited
    /// is unknown. The returned waker senders must be fired by the caller
    /// *outside* this lock.
    pub fn resolve(&self, id: &CorrelationId, value: Value) -> ResolveOutcome {
        // ---
        let mut guard = lock_ignore_poison(&self.inner);
        let inner = &mut *guard;

        match inner.entries.get_mut(id) {
            Some(Entry::Resolved { .. }) => return ResolveOutcome::Duplicate,
            Some(entry @ Entry::Pending { .. }) => {
                let prev = std::mem::replace(
                    entry,
                    Entry::Resolved {
                        value,
                        since: Instant::now(),
                    },
                );
                inner.issued.remove(id);
                let Entry::Pending { waiters, .. } = prev else {
                    unreachable!("matched Pending above");
                };
                return ResolveOutcome::Stored(waiters);
            }
            None => {}
        }

        if inner.issued.remove(id).is_none() {
            return ResolveOutcome::Unknown;
        }

        inner.entries.insert(
            id.clone(),
            Entry::Resolved {
                value,
                since: Instant::now(),
            },
        );
        ResolveOutcome::Stored(Vec::new())
    }

    /// Evict stale state older than `ttl`.
    ///
    /// Removes: resolved entries nobody claimed, issued marks that never
    /// saw a result, and pending entries whose waiters have all gone away
    /// (timed out). Entries with a live waiter are never evicted. Returns
    /// the number of ids evicted.
    pub fn sweep(&self, ttl: Duration) -> u64 {
        // ---
        let mut guard = lock_ignore_poison(&self.inner);
        let inner = &mut *guard;
        let now = Instant::now();
        let mut evicted = 0u64;

        inner.entries.retain(|_, entry| match entry {
            Entry::Resolved { since, .. } => {
                let keep = now.duration_since(*since) < ttl;
                if !keep {
                    evicted += 1;
                }
                keep
            }
            Entry::Pending { waiters, since } => {
                waiters.retain(|tx| !tx.is_closed());
                let keep = !waiters.is_empty() || now.duration_since(*since) < ttl;
                if !keep {
                    evicted += 1;
                }
                keep
            }
        });

        let entries = &inner.entries;
        inner.issued.retain(|id, since| {
            let keep = entries.contains_key(id) || now.duration_since(*since) < ttl;
            if !keep {
                evicted += 1;
            }
            keep
        });

        evicted
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        lock_ignore_poison(&self.inner).entries.len()
    }

    #[cfg(test)]
    fn issued_count(&self) -> usize {
        lock_ignore_poison(&self.inner).issued.len()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    fn id() -> CorrelationId {
        CorrelationId::generate()
    }

    #[test]
    fn test_resolve_unknown_id_is_dropped() {
        // ---
        let registry = CorrelationRegistry::new();
        assert!(matches!(
            registry.resolve(&id(), json!(1)),
            ResolveOutcome::Unknown
        ));
        assert_eq!(registry.entry_count(), 0);
    }

    #[test]
    fn test_resolve_issued_id_is_cached() {
        // ---
        let registry = CorrelationRegistry::new();
        let id = id();
        registry.mark_issued(&id);

        assert!(matches!(
            registry.resolve(&id, json!("r")),
            ResolveOutcome::Stored(_)
        ));

        // Fast path sees the cached value without ever blocking.
        match registry.claim_or_subscribe(&id, false) {
            WaitHandle::Ready(v) => assert_eq!(v, json!("r")),
            WaitHandle::Waiting(_) => panic!("expected cached value"),
        }
    }

    #[test]
    fn test_redelivery_is_duplicate() {
        // ---
        let registry = CorrelationRegistry::new();
        let id = id();
        registry.mark_issued(&id);

        assert!(matches!(
            registry.resolve(&id, json!(1)),
            ResolveOutcome::Stored(_)
        ));
        assert!(matches!(
            registry.resolve(&id, json!(2)),
            ResolveOutcome::Duplicate
        ));

        // First value wins; the duplicate was not re-applied.
        match registry.claim_or_subscribe(&id, false) {
            WaitHandle::Ready(v) => assert_eq!(v, json!(1)),
            WaitHandle::Waiting(_) => panic!("expected cached value"),
        }
    }

    #[test]
    fn test_claim_with_delete_consumes_entry() {
        // ---
        let registry = CorrelationRegistry::new();
        let id = id();
        registry.mark_issued(&id);
        let _ = registry.resolve(&id, json!("once"));

        match registry.claim_or_subscribe(&id, true) {
            WaitHandle::Ready(v) => assert_eq!(v, json!("once")),
            WaitHandle::Waiting(_) => panic!("expected cached value"),
        }

        // Consumed: a redelivery for the id is now unrecognized.
        assert!(matches!(
            registry.resolve(&id, json!(0)),
            ResolveOutcome::Unknown
        ));

        // And a second claim registers a waiter instead of seeing a value.
        assert!(matches!(
            registry.claim_or_subscribe(&id, true),
            WaitHandle::Waiting(_)
        ));
    }

    #[test]
    fn test_resolve_wakes_registered_waiters() {
        // ---
        let registry = CorrelationRegistry::new();
        let id = id();
        registry.mark_issued(&id);

        let WaitHandle::Waiting(rx1) = registry.claim_or_subscribe(&id, false) else {
            panic!("expected pending");
        };
        let WaitHandle::Waiting(rx2) = registry.claim_or_subscribe(&id, false) else {
            panic!("expected pending");
        };

        let waiters = match registry.resolve(&id, json!(42)) {
            ResolveOutcome::Stored(w) => w,
            _ => panic!("expected stored"),
        };
        assert_eq!(waiters.len(), 2);
        for tx in waiters {
            let _ = tx.send(json!(42));
        }

        assert_eq!(rx1.blocking_recv().unwrap(), json!(42));
        assert_eq!(rx2.blocking_recv().unwrap(), json!(42));
    }

    #[test]
    fn test_forget_issued_rolls_back_publish() {
        // ---
        let registry = CorrelationRegistry::new();
        let id = id();
        registry.mark_issued(&id);
        registry.forget_issued(&id);

        assert_eq!(registry.issued_count(), 0);
        assert!(matches!(
            registry.resolve(&id, json!(1)),
            ResolveOutcome::Unknown
        ));
    }

    #[test]
    fn test_sweep_evicts_stale_state_only() {
        // ---
        let registry = CorrelationRegistry::new();

        let stale = id();
        registry.mark_issued(&stale);
        let _ = registry.resolve(&stale, json!("old"));

        let abandoned = id();
        {
            let WaitHandle::Waiting(_rx) = registry.claim_or_subscribe(&abandoned, false) else {
                panic!("expected pending");
            };
            // _rx dropped here: the waiter has gone away.
        }

        let live = id();
        let WaitHandle::Waiting(_live_rx) = registry.claim_or_subscribe(&live, false) else {
            panic!("expected pending");
        };

        std::thread::sleep(Duration::from_millis(20));
        let evicted = registry.sweep(Duration::from_millis(1));

        assert_eq!(evicted, 2);
        // The entry with a live waiter survives any TTL.
        assert_eq!(registry.entry_count(), 1);
    }

    #[test]
    fn test_sweep_within_ttl_keeps_everything() {
        // ---
        let registry = CorrelationRegistry::new();
        let id = id();
        registry.mark_issued(&id);
        let _ = registry.resolve(&id, json!("fresh"));

        assert_eq!(registry.sweep(Duration::from_secs(60)), 0);
        assert_eq!(registry.entry_count(), 1);
    }
}
