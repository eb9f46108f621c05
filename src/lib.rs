//! # ConcordKV
//!
//! An embeddable, **sharded**, persistent key-value storage engine core
//! built on a **Log-Structured Merge Tree (LSM-tree)**. Designed for
//! fast writes, crash-safe operation, and predictable reads under
//! compaction.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      ShardedStore                         │
//! │   key ── xxh3 ──► shard-<i>  (route memo, per-shard cache)│
//! │ ┌───────────────────────────────────────────────────────┐ │
//! │ │                    Engine (per shard)                 │ │
//! │ │  ┌──────────┐   ┌─────────────┐   ┌────────────────┐  │ │
//! │ │  │  Active  │   │  Immutable  │   │  Levels L0..LN │  │ │
//! │ │  │ memtable │──►│    queue    │──►│   (SSTables)   │  │ │
//! │ │  └────┬─────┘   └──────┬──────┘   └───────▲────────┘  │ │
//! │ │       │ WAL-first      │ flush            │ merge     │ │
//! │ │  ┌────▼────────────────▼───────────────── ┴────────┐  │ │
//! │ │  │   WAL (segments)  ·  compaction worker pool     │  │ │
//! │ │  └─────────────────────────────────────────────────┘  │ │
//! │ └───────────────────────────────────────────────────────┘ │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`shard`] | Hash router, route memo, per-shard engine + cache |
//! | [`engine`] | Orchestrator — put/get/delete/scan/batch, recovery, state machine |
//! | [`wal`] | Segmented, CRC-protected write-ahead log with compaction |
//! | [`memtable`] | Concurrent skip-list write buffer + rotation manager |
//! | [`sstable`] | Immutable sorted tables with bloom filters and block index |
//! | [`levels`] | Level metadata, file-id allocation, manifest |
//! | [`compaction`] | Priority task queue and worker pool |
//! | [`cache`] | Striped read cache with six eviction policies and TTL |
//! | [`batch`] | Ordered, deduplicated, capacity-bounded batches |
//! | [`locks`] | Segmented RW locks with timeouts and deadlock detection |
//! | [`arena`] | Bump allocator for per-operation scratch |
//! | [`encoding`] | Deterministic wire format for everything on disk |
//! | [`config`] | Configuration structs and validation |
//! | [`error`] | Closed result-code set and error-site diagnostics |
//!
//! ## Key guarantees
//!
//! - **Durability** — every mutation hits the WAL before it is
//!   acknowledged; `sync` mode fsyncs per append, `async` mode fsyncs
//!   incrementally with an explicit `force_sync` for commit points.
//! - **Crash recovery** — on open, the manifest is loaded and WAL
//!   records above the flushed watermark are replayed; recovered state
//!   equals the last successful synchronous sync point.
//! - **Ordered multi-op writes** — batches deduplicate latest-add-wins
//!   and apply in `(key, seq)` order, so `Put(a) … Delete(a) … Put(a,v)`
//!   lands as `v`.
//! - **System-level compaction correctness** — one immutable memtable
//!   produces exactly one Level-0 table even when flush tasks race.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use concordkv::{ShardedStore, StoreConfig};
//!
//! let mut config = StoreConfig::default();
//! config.shard.count = 4;
//!
//! let store = ShardedStore::open("/tmp/concord", config).unwrap();
//!
//! store.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
//! assert_eq!(store.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! store.delete(b"hello".to_vec()).unwrap();
//! assert_eq!(store.get(b"hello").unwrap(), None);
//!
//! store.close().unwrap();
//! ```

pub mod arena;
pub mod batch;
pub mod cache;
pub mod compaction;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod levels;
pub mod locks;
pub mod memtable;
pub mod shard;
pub mod sstable;
pub mod wal;

mod util;

pub use batch::{BatchError, EntryStatus, WriteBatch};
pub use cache::{Cache, CacheStats, EvictionPolicy};
pub use config::{ConfigError, StoreConfig};
pub use engine::{Engine, EngineError, EngineStats, SnapshotMeta};
pub use error::{Diag, ErrorKind};
pub use shard::{RouterError, ShardedStore, shard_of};
pub use wal::OpKind;
