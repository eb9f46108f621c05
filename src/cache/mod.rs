//! In-memory read cache with pluggable eviction and TTL.
//!
//! The cache is a hash-indexed KV front-end sitting before the LSM
//! engine on the read path. It is striped into a fixed set of buckets
//! by key hash; each bucket is an independently locked index map plus
//! one [`EvictionPolicy`] state machine, so concurrent readers and
//! writers only contend when they hash to the same stripe.
//!
//! # Eviction
//!
//! Capacity is per stripe (`max_entries / stripes`). Inserting into a
//! full stripe evicts `max(1, ⌊eviction_factor × stripe_capacity⌋)`
//! entries chosen by the configured policy (LRU / LFU / FIFO / RANDOM /
//! CLOCK / ARC — see [`policy`]).
//!
//! # TTL
//!
//! `ttl_ms = 0` means never expire. Expired entries are lazily removed
//! when touched by `get` / `exists`, and [`Cache::sweep_expired`] does
//! an active sweep (the engine's maintenance tick calls it).
//!
//! # Integrity
//!
//! [`Cache::validate_integrity`] asserts that each stripe's index size
//! equals its policy-tracked size — the invariant that catches a policy
//! and index drifting apart.

pub mod policy;

#[cfg(test)]
mod tests;

pub use policy::EvictionPolicy;

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::trace;
use xxhash_rust::xxh3::xxh3_64;

use crate::config::CacheConfig;

use self::policy::PolicyState;

/// Maximum number of independently locked stripes.
const MAX_STRIPES: usize = 16;

/// Minimum per-stripe capacity worth striping for. Below this the cache
/// stays single-striped so the policy's eviction order is exact — a
/// 5-entry LRU split across 16 locks would evict by stripe accident,
/// not by recency.
const MIN_STRIPE_CAPACITY: usize = 64;

// ------------------------------------------------------------------------------------------------
// Stats
// ------------------------------------------------------------------------------------------------

/// Aggregated cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups that found a live entry.
    pub hits: u64,
    /// Lookups that missed (or found an expired entry).
    pub misses: u64,
    /// Entries inserted.
    pub insertions: u64,
    /// Entries evicted by policy.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Entries currently resident.
    pub len: usize,
}

// ------------------------------------------------------------------------------------------------
// Entries and buckets
// ------------------------------------------------------------------------------------------------

struct CacheEntry {
    value: Vec<u8>,
    /// `None` = permanent.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

struct Bucket {
    index: HashMap<Vec<u8>, CacheEntry>,
    policy: Box<dyn PolicyState>,
    capacity: usize,
    evict_batch: usize,
}

impl Bucket {
    /// Removes an entry and its policy tracking.
    fn remove(&mut self, key: &[u8]) -> bool {
        if self.index.remove(key).is_some() {
            self.policy.on_remove(key);
            true
        } else {
            false
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Cache
// ------------------------------------------------------------------------------------------------

/// Striped, policy-driven KV cache. See the [module docs](self).
pub struct Cache {
    buckets: Vec<Mutex<Bucket>>,
    default_ttl: Duration,

    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl Cache {
    /// Builds a cache from its configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let stripes = (config.max_entries / MIN_STRIPE_CAPACITY).clamp(1, MAX_STRIPES);
        let capacity = (config.max_entries / stripes).max(1);
        let evict_batch = ((config.eviction_factor * capacity as f64).floor() as usize).max(1);

        let buckets = (0..stripes)
            .map(|_| {
                Mutex::new(Bucket {
                    index: HashMap::new(),
                    policy: config.policy.build(capacity),
                    capacity,
                    evict_batch,
                })
            })
            .collect();

        Self {
            buckets,
            default_ttl: Duration::from_millis(config.default_ttl_ms),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn bucket(&self, key: &[u8]) -> &Mutex<Bucket> {
        let idx = (xxh3_64(key) % self.buckets.len() as u64) as usize;
        &self.buckets[idx]
    }

    /// Looks up `key`, recording a hit or miss and updating policy
    /// recency state. An expired entry is lazily removed and reported
    /// as a miss.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let Ok(mut bucket) = self.bucket(key).lock() else {
            return None;
        };
        let now = Instant::now();

        let expired = match bucket.index.get(key) {
            Some(entry) => entry.expired(now),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            bucket.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        bucket.policy.on_access(key);
        self.hits.fetch_add(1, Ordering::Relaxed);
        bucket.index.get(key).map(|e| e.value.clone())
    }

    /// Inserts or updates `key` with the default TTL.
    pub fn set(&self, key: Vec<u8>, value: Vec<u8>) {
        let ttl_ms = self.default_ttl.as_millis() as u64;
        self.set_with_ttl(key, value, ttl_ms);
    }

    /// Inserts or updates `key`. `ttl_ms = 0` means the entry never
    /// expires. May evict a policy-chosen batch when the stripe is
    /// full.
    pub fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl_ms: u64) {
        let Ok(mut bucket) = self.bucket(&key).lock() else {
            return;
        };
        let expires_at = if ttl_ms == 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(ttl_ms))
        };
        let entry = CacheEntry { value, expires_at };

        if bucket.index.contains_key(&key) {
            bucket.index.insert(key.clone(), entry);
            bucket.policy.on_access(&key);
            return;
        }

        bucket.policy.on_insert(&key);
        bucket.index.insert(key.clone(), entry);
        self.insertions.fetch_add(1, Ordering::Relaxed);

        if bucket.index.len() > bucket.capacity {
            let batch = bucket.evict_batch;
            let victims = bucket.policy.evict_candidates(batch, &key);
            for victim in victims {
                if bucket.index.remove(&victim).is_some() {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    trace!(key_len = victim.len(), "cache entry evicted");
                }
            }
        }
    }

    /// Removes `key`. Returns whether it was resident.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.bucket(key)
            .lock()
            .map(|mut b| b.remove(key))
            .unwrap_or(false)
    }

    /// Whether `key` is resident and unexpired. Does **not** count as a
    /// hit or update recency, but does lazily remove an expired entry.
    pub fn exists(&self, key: &[u8]) -> bool {
        let Ok(mut bucket) = self.bucket(key).lock() else {
            return false;
        };
        let now = Instant::now();
        match bucket.index.get(key) {
            Some(entry) if entry.expired(now) => {
                bucket.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Actively removes every expired entry. Returns the count removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        for bucket in &self.buckets {
            let Ok(mut bucket) = bucket.lock() else {
                continue;
            };
            let expired: Vec<Vec<u8>> = bucket
                .index
                .iter()
                .filter(|(_, e)| e.expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired {
                bucket.remove(&key);
                removed += 1;
            }
        }
        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Drops every entry (route invalidation, reconfiguration).
    pub fn clear(&self) {
        for bucket in &self.buckets {
            if let Ok(mut bucket) = bucket.lock() {
                let keys: Vec<Vec<u8>> = bucket.index.keys().cloned().collect();
                for key in keys {
                    bucket.remove(&key);
                }
            }
        }
    }

    /// Resident entry count.
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.lock().map(|b| b.index.len()).unwrap_or(0))
            .sum()
    }

    /// True when nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            len: self.len(),
        }
    }

    /// Verifies that each stripe's index size equals its policy-tracked
    /// size. A `false` here means a policy and its index diverged.
    pub fn validate_integrity(&self) -> bool {
        self.buckets.iter().all(|b| {
            b.lock()
                .map(|b| b.index.len() == b.policy.len())
                .unwrap_or(false)
        })
    }
}
