//! Keyed cache that computes each missing value at most once at a time.
//!
//! Mirrors the singleflight caches used for HTTP responses, but folds the
//! in-flight marker into the entry itself. A key is either absent, `Pending`
//! (one caller is computing it, others subscribe to its result) or
//! `Resolved`. Claiming a key and installing its `Pending` marker happen under
//! a single shard write lock, so two callers can never both observe "absent"
//! and both compute.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::trace;

enum Slot<V> {
    /// Resolves to `Some` on success; the sender is dropped on failure.
    Pending(watch::Receiver<Option<V>>),
    Resolved(V),
}

enum Claim<V> {
    Ready(V),
    Wait(watch::Receiver<Option<V>>),
    Owner(watch::Sender<Option<V>>),
}

/// Counters describing how lookups were served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub computed: u64,
    pub failed: u64,
}

pub struct DedupCache<V> {
    slots: DashMap<String, Slot<V>>,
    /// Bumped on every newly resolved entry; lets flushers skip unchanged snapshots.
    revision: AtomicU64,
    hits: AtomicU64,
    computed: AtomicU64,
    failed: AtomicU64,
}

impl<V> Default for DedupCache<V> {
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
            revision: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            computed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }
}

impl<V: Clone> DedupCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache whose entries all start resolved.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, V)>) -> Self {
        let cache = Self::new();
        cache.load_from(entries);
        cache
    }

    /// Resolved value for `key`, if any. Never waits on an in-flight computation.
    pub fn get(&self, key: &str) -> Option<V> {
        match self.slots.get(key)?.value() {
            Slot::Resolved(v) => Some(v.clone()),
            Slot::Pending(_) => None,
        }
    }

    /// Number of resolved entries.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Resolved(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            computed: self.computed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Seed resolved entries, keeping any entry already present.
    ///
    /// Returns how many entries were added.
    pub fn load_from(&self, entries: impl IntoIterator<Item = (String, V)>) -> usize {
        let mut added = 0;
        for (key, value) in entries {
            if let Entry::Vacant(slot) = self.slots.entry(key) {
                slot.insert(Slot::Resolved(value));
                added += 1;
            }
        }
        if added > 0 {
            self.revision.fetch_add(1, Ordering::AcqRel);
        }
        added
    }

    /// Copy of every resolved entry, ordered by key. In-flight keys are omitted.
    pub fn snapshot(&self) -> BTreeMap<String, V> {
        self.slots
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Resolved(v) => Some((slot.key().clone(), v.clone())),
                Slot::Pending(_) => None,
            })
            .collect()
    }

    /// Return the value for `key`, running `compute` only if no other caller is.
    ///
    /// Callers that find the key pending wait for the owner's result. If the
    /// owner fails, or its future is dropped, the key becomes absent again and
    /// the waiters race to claim it anew; the error itself is returned to the
    /// owner only and never cached.
    pub async fn get_or_compute<F, Fut, E>(&self, key: &str, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let tx = loop {
            match self.claim(key) {
                Claim::Ready(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Claim::Owner(tx) => break tx,
                Claim::Wait(mut rx) => {
                    trace!(key, "Waiting on in-flight computation");
                    if let Ok(resolved) = rx.wait_for(Option::is_some).await
                        && let Some(value) = resolved.as_ref()
                    {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(value.clone());
                    }
                    trace!(key, "In-flight computation abandoned, reclaiming");
                }
            }
        };

        let guard = PendingGuard {
            slots: &self.slots,
            key,
            armed: true,
        };

        match compute().await {
            Ok(value) => {
                self.slots
                    .insert(key.to_owned(), Slot::Resolved(value.clone()));
                guard.disarm();
                self.revision.fetch_add(1, Ordering::AcqRel);
                self.computed.fetch_add(1, Ordering::Relaxed);
                let _ = tx.send(Some(value.clone()));
                Ok(value)
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                // Release the key before waking waiters so they find it absent.
                drop(guard);
                drop(tx);
                Err(e)
            }
        }
    }

    /// Atomically inspect `key` and, if absent, mark it pending for the caller.
    fn claim(&self, key: &str) -> Claim<V> {
        match self.slots.entry(key.to_owned()) {
            Entry::Occupied(slot) => match slot.get() {
                Slot::Resolved(v) => Claim::Ready(v.clone()),
                Slot::Pending(rx) => Claim::Wait(rx.clone()),
            },
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                slot.insert(Slot::Pending(rx));
                Claim::Owner(tx)
            }
        }
    }
}

/// Removes a `Pending` slot unless disarmed, including when the owning future is dropped.
struct PendingGuard<'a, V> {
    slots: &'a DashMap<String, Slot<V>>,
    key: &'a str,
    armed: bool,
}

impl<V> PendingGuard<'_, V> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<V> Drop for PendingGuard<'_, V> {
    fn drop(&mut self) {
        if self.armed {
            self.slots
                .remove_if(self.key, |_, slot| matches!(slot, Slot::Pending(_)));
        }
    }
}
