//! Thread-safe in-memory cache with per-entry time-to-live.
//!
//! # Expiry Model
//!
//! Expiry is enforced lazily on the read path: [`TtlCache::get`] evicts an
//! expired entry before reporting a miss. [`TtlCache::cleanup`] performs the
//! same eviction eagerly for keys that are written once and never read again;
//! the server runs it from a background task.
//!
//! # Concurrency
//!
//! Entries live in a [`DashMap`], which shards the key space across
//! independently locked buckets. Operations on unrelated keys rarely contend
//! and there is no cache-wide lock. The expiry check and the eviction of a
//! key happen under that key's shard lock, so no caller can observe a
//! half-expired entry.
//!
//! # Statistics
//!
//! [`CacheStats::hit_rate`] is an approximation (`unique / (accesses + unique)`),
//! not a hit/miss ratio. Treat it as best-effort telemetry.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::trace;

use crate::clock::{Clock, SystemClock, add_duration};
use crate::metrics;

/// A cached value and its bookkeeping.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    access_count: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Bookkeeping of a single entry, as returned by [`TtlCache::entry_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub expired: bool,
}

/// Point-in-time snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub active_entries: usize,
    pub expired_entries: usize,
    pub total_access_count: u64,
    pub hit_rate: f64,
}

/// Generic key-value cache with per-entry expiration.
///
/// Values are handed out by clone, so `V` is usually `Arc<T>` or a small
/// copyable type.
pub struct TtlCache<V, K = String>
where
    K: Eq + Hash,
{
    entries: DashMap<K, CacheEntry<V>>,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
    /// Label used for metrics ("server", "client")
    name: &'static str,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache backed by the system clock.
    pub fn new(name: &'static str, default_ttl: Duration) -> Self {
        Self::with_clock(name, default_ttl, Arc::new(SystemClock))
    }
}

impl<V, K> TtlCache<V, K>
where
    V: Clone,
    K: Eq + Hash + Clone,
{
    /// Create a cache reading time from `clock`.
    pub fn with_clock(name: &'static str, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            clock,
            name,
        }
    }

    /// Default time-to-live applied by [`set`](Self::set).
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Return the value for `key` if present and unexpired.
    ///
    /// A hit increments the entry's access count. An expired entry is removed
    /// and reported as a miss.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();

        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.access_count += 1;
                entry.last_accessed_at = now;
                metrics::record_cache_lookup(self.name, true);
                return Some(entry.value.clone());
            }
        } else {
            metrics::record_cache_lookup(self.name, false);
            return None;
        }

        // The write guard above is released; re-check under the shard lock so
        // a concurrent `set` that just refreshed the key is not evicted.
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            trace!(cache = self.name, "Evicted expired entry on read");
            metrics::record_cache_evictions(self.name, 1);
        }
        metrics::record_cache_lookup(self.name, false);
        None
    }

    /// Whether `key` holds an unexpired value. Counts as an access on hit.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Insert or replace `key`, resetting its statistics.
    ///
    /// `ttl` overrides the default time-to-live for this entry only.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.default_ttl);

        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                expires_at: add_duration(now, ttl),
                last_accessed_at: now,
                access_count: 0,
            },
        );
    }

    /// Remove `key`, returning whether it was present.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove all expired entries and return how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0usize;

        self.entries.retain(|_, entry| {
            let expired = entry.is_expired(now);
            if expired {
                removed += 1;
            }
            !expired
        });

        if removed > 0 {
            metrics::record_cache_evictions(self.name, removed as u64);
        }
        removed
    }

    /// Snapshot of the cache contents.
    ///
    /// Expired entries that have not been purged yet are reported separately
    /// from active ones.
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let mut total_entries = 0usize;
        let mut expired_entries = 0usize;
        let mut total_access_count = 0u64;

        for entry in self.entries.iter() {
            total_entries += 1;
            total_access_count += entry.access_count;
            if entry.is_expired(now) {
                expired_entries += 1;
            }
        }

        CacheStats {
            total_entries,
            active_entries: total_entries - expired_entries,
            expired_entries,
            total_access_count,
            hit_rate: approximate_hit_rate(total_entries, total_access_count),
        }
    }

    /// Bookkeeping for `key` without counting an access. Expired entries that
    /// have not been purged are still reported.
    pub fn entry_info<Q>(&self, key: &Q) -> Option<EntryInfo>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        self.entries.get(key).map(|entry| EntryInfo {
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            last_accessed_at: entry.last_accessed_at,
            access_count: entry.access_count,
            expired: entry.is_expired(now),
        })
    }

    /// Keys currently held, including expired entries not yet purged.
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of physically stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `unique / (accesses + unique)`; 0.0 for an empty cache.
fn approximate_hit_rate(unique_keys: usize, total_accesses: u64) -> f64 {
    let unique = unique_keys as f64;
    let denominator = total_accesses as f64 + unique;
    if denominator > 0.0 {
        unique / denominator
    } else {
        0.0
    }
}
