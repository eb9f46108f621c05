//! Engine, cache, and router configuration.
//!
//! Configuration *loading* (YAML/JSON files, CLI flags) lives outside
//! this crate; these structs are the boundary the wrappers fill in.
//! Field groups mirror the recognised key families: `wal.*`,
//! `memtable.*`, `compaction.*`, `cache.*`, `shard.*`.
//!
//! All constructors start from [`StoreConfig::default`] and override
//! fields; [`StoreConfig::validate`] fails fast on contract violations
//! before any state is touched.

use thiserror::Error;

use crate::cache::EvictionPolicy;

/// Maximum accepted key length (64 KiB).
pub const MAX_KEY_LEN: usize = 64 * 1024;

/// Maximum accepted value length (4 MiB).
pub const MAX_VALUE_LEN: usize = 4 * 1024 * 1024;

/// Configuration validation failure. The offending field and constraint
/// are spelled out in the message.
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Compaction strategy family selector.
///
/// Only leveled compaction is implemented; the enum is the extension
/// point for tiered / universal strategies. Unimplemented variants are
/// rejected by [`StoreConfig::validate`] rather than silently degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionStrategyKind {
    /// Leveled compaction: L0 file-count trigger, size-ratio triggers for
    /// L1 and deeper, disjoint key ranges within each level ≥ 1.
    #[default]
    Leveled,
}

/// Write-ahead log settings (`wal.*`).
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Segment rotation threshold in mebibytes (`wal.segment_size_mb`).
    pub segment_size_mb: u64,

    /// `true` = fsync on every append; `false` = incremental background
    /// sync (`wal.sync_mode` ∈ {sync, async}).
    pub sync_on_append: bool,

    /// Background sync interval in milliseconds
    /// (`wal.incremental_interval_ms`). Only meaningful in async mode.
    pub incremental_interval_ms: u64,

    /// Number of unsynced appends that forces an early incremental sync.
    pub sync_batch_threshold: usize,

    /// Live-record ratio below which WAL compaction is triggered
    /// (`wal.compact_ratio`).
    pub compact_ratio: f64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            segment_size_mb: 64,
            sync_on_append: true,
            incremental_interval_ms: 5000,
            sync_batch_threshold: 64,
            compact_ratio: 0.3,
        }
    }
}

/// Memtable settings (`memtable.*`).
#[derive(Debug, Clone)]
pub struct MemtableConfig {
    /// Active table rotation threshold in bytes (`memtable.max_bytes`).
    pub max_bytes: usize,

    /// Maximum queued immutable tables
    /// (`memtable.immutable_queue_depth`).
    pub immutable_queue_depth: usize,

    /// How long a rotating writer waits for queue space before failing
    /// with `Busy`.
    pub rotation_wait_ms: u64,
}

impl Default for MemtableConfig {
    fn default() -> Self {
        Self {
            max_bytes: 4 * 1024 * 1024,
            immutable_queue_depth: 6,
            rotation_wait_ms: 1000,
        }
    }
}

/// Compaction scheduler settings (`compaction.*`).
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Worker thread count (`compaction.worker_count`).
    pub worker_count: usize,

    /// L0 file count that triggers an L0→L1 compaction
    /// (`compaction.l0_file_limit`).
    pub l0_file_limit: usize,

    /// Per-level size multiplier (`compaction.level_size_ratio`): level N
    /// compacts when its total size exceeds `base * ratio^N`.
    pub level_size_ratio: u64,

    /// Base size budget for level 1, in bytes.
    pub level_base_bytes: u64,

    /// Maximum wall-clock time a single task may run before it is marked
    /// failed and its partial output discarded.
    pub task_timeout_ms: u64,

    /// Strategy family. Only [`CompactionStrategyKind::Leveled`] today.
    pub strategy: CompactionStrategyKind,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            l0_file_limit: 4,
            level_size_ratio: 10,
            level_base_bytes: 64 * 1024 * 1024,
            task_timeout_ms: 60_000,
            strategy: CompactionStrategyKind::Leveled,
        }
    }
}

/// Cache settings (`cache.*`).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Total entry capacity across all stripes (`cache.max_entries`).
    pub max_entries: usize,

    /// Eviction policy (`cache.policy`).
    pub policy: EvictionPolicy,

    /// Fraction of a stripe's capacity evicted per overflow
    /// (`cache.eviction_factor`).
    pub eviction_factor: f64,

    /// Default time-to-live in milliseconds; 0 = never expire
    /// (`cache.default_ttl_ms`).
    pub default_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            policy: EvictionPolicy::Lru,
            eviction_factor: 0.1,
            default_ttl_ms: 0,
        }
    }
}

/// Shard router settings (`shard.*`).
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Number of independent shards (`shard.count`).
    pub count: usize,

    /// Route-memo entry TTL in milliseconds (`shard.route_cache_ttl_ms`).
    pub route_cache_ttl_ms: u64,

    /// Route-memo capacity.
    pub route_cache_capacity: usize,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            count: 16,
            route_cache_ttl_ms: 300_000,
            route_cache_capacity: 1024,
        }
    }
}

/// Lock manager settings.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Number of key-hash segments.
    pub segments: usize,

    /// Default acquire timeout in milliseconds.
    pub acquire_timeout_ms: u64,

    /// Enables the wait-for-graph deadlock detector.
    pub deadlock_detection: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            segments: 64,
            acquire_timeout_ms: 5000,
            deadlock_detection: true,
        }
    }
}

/// Top-level configuration for a store (one engine per shard).
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Write-ahead log settings.
    pub wal: WalConfig,

    /// Memtable settings.
    pub memtable: MemtableConfig,

    /// Compaction scheduler settings.
    pub compaction: CompactionConfig,

    /// Read cache settings.
    pub cache: CacheConfig,

    /// Shard router settings.
    pub shard: ShardConfig,

    /// Lock manager settings.
    pub locks: LockConfig,

    /// Maximum byte size of a staged write batch.
    pub max_batch_bytes: usize,
}

impl StoreConfig {
    /// Checks every field constraint, failing fast before any state is
    /// created. Violations never mutate anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wal.segment_size_mb == 0 {
            return Err(ConfigError("wal.segment_size_mb must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.wal.compact_ratio) {
            return Err(ConfigError("wal.compact_ratio must be in [0, 1]".into()));
        }
        if self.memtable.max_bytes == 0 {
            return Err(ConfigError("memtable.max_bytes must be > 0".into()));
        }
        if self.memtable.immutable_queue_depth == 0 {
            return Err(ConfigError(
                "memtable.immutable_queue_depth must be > 0".into(),
            ));
        }
        if self.compaction.worker_count == 0 {
            return Err(ConfigError("compaction.worker_count must be > 0".into()));
        }
        if self.compaction.l0_file_limit == 0 {
            return Err(ConfigError("compaction.l0_file_limit must be > 0".into()));
        }
        if self.compaction.level_size_ratio < 2 {
            return Err(ConfigError(
                "compaction.level_size_ratio must be >= 2".into(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError("cache.max_entries must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.cache.eviction_factor) {
            return Err(ConfigError("cache.eviction_factor must be in [0, 1]".into()));
        }
        if self.shard.count == 0 {
            return Err(ConfigError("shard.count must be > 0".into()));
        }
        if self.locks.segments == 0 {
            return Err(ConfigError("locks.segments must be > 0".into()));
        }
        Ok(())
    }

    /// Batch capacity defaulting to 1 MiB when unset.
    pub fn batch_capacity(&self) -> usize {
        if self.max_batch_bytes == 0 {
            1024 * 1024
        } else {
            self.max_batch_bytes
        }
    }
}
