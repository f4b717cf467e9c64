//! Freshness cache for last-known service metrics.
//!
//! This module provides the `CacheStore` which keeps the most recent value
//! (or error) per lookup key together with the time it was captured. Readers
//! never block on writers; eviction of old entries is done by a periodic
//! sweep rather than on read.

use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::stats::ResilienceStats;

/// Cached value for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub captured_at: Instant,
    pub error: Option<String>,
}

impl<T> CacheEntry<T> {
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.captured_at)
    }

    /// Fresh while `now - captured_at < ttl`.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

/// Process-wide store of last-known values, keyed by service name.
pub struct CacheStore<T> {
    entries: DashMap<String, CacheEntry<T>>,
    ttl: Duration,
}

impl<T: Clone + Send + Sync + 'static> CacheStore<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the entry for `key` regardless of age.
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Returns the entry for `key` only while it is fresh.
    pub fn get_fresh(&self, key: &str) -> Option<CacheEntry<T>> {
        self.entries
            .get(key)
            .filter(|e| e.is_fresh(self.ttl))
            .map(|e| e.value().clone())
    }

    /// Overwrites the entry for `key`, stamped with the current time.
    pub fn set(&self, key: &str, value: T, error: Option<String>) {
        self.set_at(key, value, error, Instant::now());
    }

    /// Writes the entry unless a newer capture is already stored.
    ///
    /// Returns `false` when the write was dropped because it lost against a
    /// value captured later.
    pub fn set_at(&self, key: &str, value: T, error: Option<String>, captured_at: Instant) -> bool {
        let entry = CacheEntry {
            value,
            captured_at,
            error,
        };

        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if slot.get().captured_at > captured_at {
                    debug!("Dropping out-of-order cache write for {}", key);
                    return false;
                }
                slot.insert(entry);
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
        true
    }

    /// Removes entries older than twice the TTL. Returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let max_age = self.ttl * 2;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.age() <= max_age);
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            debug!("Cache sweep evicted {} entries", evicted);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a list of all cached keys.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Runs `sweep()` every `every` until `cancel` fires or the store is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        stats: Arc<ResilienceStats>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match store.upgrade() {
                    Some(store) => {
                        let evicted = store.sweep();
                        stats.record_evictions(evicted as u64);
                    }
                    None => break,
                }
            }
            info!("Cache sweeper stopped");
        })
    }
}
