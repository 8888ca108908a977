//! In-memory TTL cache store.
//!
//! Entries live in a sharded concurrent map so reads and writes on
//! different keys do not contend. Expiry is lazy: freshness is computed
//! from the entry's age on every read and nothing sweeps in the background.
//! Expired entries are kept until replaced, invalidated or evicted so they
//! remain available for stale-serving.

use crate::entry::{CacheEntry, EntryState};
use crate::key::CacheKey;
use crate::stats::{CacheStats, StatsCounters};
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Concurrent map from scoped key to [`CacheEntry`].
///
/// The store holds at most `max_entries` entries. Inserting a new key into
/// a full store evicts the entry with the oldest `stored_at`. Concurrent
/// inserts may overshoot the bound by the number of racing writers.
#[derive(Debug)]
pub struct CacheStore<V> {
    entries: DashMap<String, CacheEntry<V>>,
    max_entries: usize,
    counters: StatsCounters,
}

impl<V: Clone> CacheStore<V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            counters: StatsCounters::default(),
        }
    }

    /// Fresh entry for `key`, if any. Expired entries read as absent.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let entry = self.entries.get(key.as_str()).map(|e| e.value().clone());
        match entry {
            Some(entry) if entry.state() == EntryState::Fresh => {
                StatsCounters::add(&self.counters.hits, 1);
                Some(entry)
            }
            Some(_) => {
                StatsCounters::add(&self.counters.misses, 1);
                StatsCounters::add(&self.counters.expirations, 1);
                None
            }
            None => {
                StatsCounters::add(&self.counters.misses, 1);
                None
            }
        }
    }

    /// Entry for `key` regardless of age. Does not touch hit/miss counters.
    pub fn get_including_stale(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        self.entries.get(key.as_str()).map(|e| e.value().clone())
    }

    /// Insert or replace the entry for `key`.
    pub fn put(&self, key: &CacheKey, value: V, ttl: Duration) {
        if !self.entries.contains_key(key.as_str()) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries
            .insert(key.as_str().to_string(), CacheEntry::new(value, ttl));
        StatsCounters::add(&self.counters.inserts, 1);
    }

    /// Remove one entry. Returns whether it existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.entries.remove(key.as_str()).is_some();
        if removed {
            StatsCounters::add(&self.counters.invalidations, 1);
        }
        removed
    }

    /// Remove every entry whose scoped key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0usize;
        self.entries.retain(|key, _| {
            if key.starts_with(prefix) {
                removed += 1;
                false
            } else {
                true
            }
        });
        StatsCounters::add(&self.counters.invalidations, removed as u64);
        removed
    }

    /// Remove everything.
    pub fn clear(&self) -> usize {
        self.invalidate_prefix("")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.entries.len() as u64)
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().stored_instant())
            .map(|e| (e.key().clone(), e.value().stored_instant()));

        if let Some((key, stored_at)) = oldest {
            // Another writer may have refreshed the entry since the scan.
            let evicted = self
                .entries
                .remove_if(&key, |_, entry| entry.stored_instant() == stored_at)
                .is_some();
            if evicted {
                StatsCounters::add(&self.counters.evictions, 1);
                let age = Instant::now().saturating_duration_since(stored_at);
                tracing::debug!(
                    key = %key,
                    age_ms = age.as_millis() as u64,
                    "Evicted oldest cache entry"
                );
            }
        }
    }
}
