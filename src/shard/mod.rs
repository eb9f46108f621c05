//! Hash-based shard router over independent per-shard engines.
//!
//! Keys map to one of N shards via a 64-bit xxh3 hash — a pure function
//! of the key, so two lookups of the same key can never disagree for a
//! fixed N. Each shard owns a full [`Engine`] (its own WAL, levels,
//! manifest) plus a read cache, all rooted under
//! `<data_dir>/shard-<idx>/`.
//!
//! # Route cache
//!
//! Recent `key → shard` decisions are memoized in a small LRU+TTL cache.
//! Routing is pure, so the memo is semantically transparent; it exists
//! to skip the hash on hot keys and — more importantly — to have a
//! single point that **must** be flushed when N changes.
//!
//! # Resharding
//!
//! [`ShardedStore::reconfigure`] changes N: engines are closed, the
//! route cache is flushed (old routes are invalid), and engines reopen
//! under the new count. Keys already resident in a shard directory are
//! *not* migrated — rebalancing resident data is the consensus/ops
//! layer's job, which owns cross-node copies anyway.
//!
//! # Batches
//!
//! [`ShardedStore::batch_submit`] groups entries by shard (preserving
//! add order within each shard) so every per-shard submission keeps
//! locality, then stitches the per-entry statuses back into the
//! caller's add order.

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_64;

use crate::batch::{EntryStatus, WriteBatch};
use crate::cache::{Cache, CacheStats, EvictionPolicy};
use crate::config::{CacheConfig, StoreConfig};
use crate::engine::{Engine, EngineError, EngineStats};
use crate::error::ErrorKind;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by the sharded store.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Error from a shard's engine.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Error re-staging a batch for a shard.
    #[error("batch error: {0}")]
    Batch(#[from] crate::batch::BatchError),

    /// Contract violation (zero shards, empty key).
    #[error("invalid argument: {0}")]
    Param(&'static str),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RouterError {
    /// Maps onto the closed result-code set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Engine(e) => e.kind(),
            Self::Batch(e) => e.kind(),
            Self::Param(_) => ErrorKind::Param,
            Self::Internal(_) => ErrorKind::System,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Routing
// ------------------------------------------------------------------------------------------------

/// The pure routing function: `xxh3_64(key) mod shard_count`.
pub fn shard_of(key: &[u8], shard_count: usize) -> usize {
    (xxh3_64(key) % shard_count.max(1) as u64) as usize
}

// ------------------------------------------------------------------------------------------------
// ShardedStore
// ------------------------------------------------------------------------------------------------

struct Shard {
    engine: Engine,
    cache: Cache,
}

/// Per-shard statistics pair.
#[derive(Debug, Clone)]
pub struct ShardStats {
    /// The shard's engine counters.
    pub engine: EngineStats,
    /// The shard's read-cache counters.
    pub cache: CacheStats,
}

/// Sharded key-value store front. See the [module docs](self).
pub struct ShardedStore {
    data_dir: PathBuf,
    config: StoreConfig,
    shards: RwLock<Vec<Shard>>,
    route_cache: Cache,
}

impl ShardedStore {
    /// Opens `config.shard.count` engines under `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self, RouterError> {
        if config.shard.count == 0 {
            return Err(RouterError::Param("shard count must be > 0"));
        }
        let data_dir = data_dir.as_ref().to_path_buf();
        let shards = Self::open_shards(&data_dir, &config, config.shard.count)?;

        let route_cache = Cache::new(&CacheConfig {
            max_entries: config.shard.route_cache_capacity,
            policy: EvictionPolicy::Lru,
            eviction_factor: 0.1,
            default_ttl_ms: config.shard.route_cache_ttl_ms,
        });

        info!(
            dir = %data_dir.display(),
            shards = config.shard.count,
            "sharded store opened"
        );
        Ok(Self {
            data_dir,
            config,
            shards: RwLock::new(shards),
            route_cache,
        })
    }

    fn open_shards(
        data_dir: &Path,
        config: &StoreConfig,
        count: usize,
    ) -> Result<Vec<Shard>, RouterError> {
        let mut shards = Vec::with_capacity(count);
        for idx in 0..count {
            let shard_dir = data_dir.join(format!("shard-{idx}"));
            let engine = Engine::open(&shard_dir, config.clone())?;
            let cache = Cache::new(&config.cache);
            shards.push(Shard { engine, cache });
        }
        Ok(shards)
    }

    /// Current shard count.
    pub fn shard_count(&self) -> usize {
        self.shards.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Routes `key`, consulting the memo before hashing.
    fn route(&self, key: &[u8], shard_count: usize) -> usize {
        if let Some(bytes) = self.route_cache.get(key)
            && let Ok(raw) = <[u8; 4]>::try_from(bytes.as_slice())
        {
            let idx = u32::from_le_bytes(raw) as usize;
            if idx < shard_count {
                return idx;
            }
            // Stale route from an earlier configuration.
            self.route_cache.delete(key);
        }
        let idx = shard_of(key, shard_count);
        self.route_cache
            .set(key.to_vec(), (idx as u32).to_le_bytes().to_vec());
        idx
    }

    // --------------------------------------------------------------------------------------------
    // KV surface
    // --------------------------------------------------------------------------------------------

    /// Inserts or updates a key on its shard, invalidating the shard's
    /// read cache entry.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), RouterError> {
        let shards = self.read_shards()?;
        let shard = &shards[self.route(&key, shards.len())];
        shard.cache.delete(&key);
        shard.engine.put(key, value)?;
        Ok(())
    }

    /// Looks up a key, going through the shard's read cache.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, RouterError> {
        let shards = self.read_shards()?;
        let shard = &shards[self.route(key, shards.len())];

        if let Some(value) = shard.cache.get(key) {
            return Ok(Some(value));
        }
        match shard.engine.get(key)? {
            Some(value) => {
                shard.cache.set(key.to_vec(), value.clone());
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Deletes a key on its shard, invalidating the cache entry.
    pub fn delete(&self, key: Vec<u8>) -> Result<(), RouterError> {
        let shards = self.read_shards()?;
        let shard = &shards[self.route(&key, shards.len())];
        shard.cache.delete(&key);
        shard.engine.delete(key)?;
        Ok(())
    }

    /// Submits a batch, grouping entries by shard for locality.
    ///
    /// Returns one status per added entry, in the caller's add order.
    pub fn batch_submit(&self, batch: WriteBatch) -> Result<Vec<EntryStatus>, RouterError> {
        let shards = self.read_shards()?;
        let entries = batch.into_entries();
        let total = entries.len();

        // Group by shard, remembering each entry's global position.
        let mut groups: Vec<(WriteBatch, Vec<usize>)> = (0..shards.len())
            .map(|_| (WriteBatch::new(self.config.batch_capacity()), Vec::new()))
            .collect();

        for (global_idx, entry) in entries.into_iter().enumerate() {
            let idx = self.route(&entry.key, shards.len());
            shards[idx].cache.delete(&entry.key);
            let (shard_batch, positions) = &mut groups[idx];
            match entry.value {
                Some(value) => shard_batch.add_put(entry.key, value)?,
                None => shard_batch.add_delete(entry.key)?,
            }
            positions.push(global_idx);
        }

        let mut statuses = vec![EntryStatus::Applied; total];
        for (idx, (shard_batch, positions)) in groups.into_iter().enumerate() {
            if shard_batch.is_empty() {
                continue;
            }
            let shard_statuses = shards[idx].engine.batch_submit(shard_batch)?;
            for (local, status) in shard_statuses.into_iter().enumerate() {
                statuses[positions[local]] = status;
            }
        }
        Ok(statuses)
    }

    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Changes the shard count.
    ///
    /// Closes every engine, flushes the route cache (old routes are
    /// invalid), and reopens engines under the new count. Resident data
    /// is not migrated between shard directories — see the
    /// [module docs](self).
    pub fn reconfigure(&self, new_count: usize) -> Result<(), RouterError> {
        if new_count == 0 {
            return Err(RouterError::Param("shard count must be > 0"));
        }
        let mut shards = self
            .shards
            .write()
            .map_err(|_| RouterError::Internal("shard lock poisoned".into()))?;

        for shard in shards.iter() {
            shard.engine.close()?;
        }
        self.route_cache.clear();

        *shards = Self::open_shards(&self.data_dir, &self.config, new_count)?;
        info!(shards = new_count, "store resharded");
        Ok(())
    }

    /// Housekeeping across all shards: engine maintenance plus cache
    /// expiry sweeps.
    pub fn maintain(&self) -> Result<(), RouterError> {
        let shards = self.read_shards()?;
        for shard in shards.iter() {
            shard.engine.maintain()?;
            shard.cache.sweep_expired();
        }
        self.route_cache.sweep_expired();
        Ok(())
    }

    /// Per-shard statistics.
    pub fn stats(&self) -> Result<Vec<ShardStats>, RouterError> {
        let shards = self.read_shards()?;
        let mut out = Vec::with_capacity(shards.len());
        for shard in shards.iter() {
            out.push(ShardStats {
                engine: shard.engine.stats()?,
                cache: shard.cache.stats(),
            });
        }
        Ok(out)
    }

    /// Gracefully closes every shard engine. Idempotent.
    pub fn close(&self) -> Result<(), RouterError> {
        let shards = self.read_shards()?;
        for shard in shards.iter() {
            shard.engine.close()?;
        }
        debug!("sharded store closed");
        Ok(())
    }

    fn read_shards(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Shard>>, RouterError> {
        self.shards
            .read()
            .map_err(|_| RouterError::Internal("shard lock poisoned".into()))
    }
}
