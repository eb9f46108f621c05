//! LSM storage engine — the orchestrator tying WAL, memtables, levels,
//! and the compaction scheduler together.
//!
//! ## Write path
//!
//! `put`/`delete` take the key's segmented write lock, draw a seq from
//! the engine's atomic counter, append to the WAL, then insert into the
//! active memtable. When the insert rotates the active table, the
//! sealed table is handed to the compaction scheduler for an L0 flush.
//!
//! ## Read path
//!
//! `get` resolves newest-first: active memtable → immutables (newest to
//! oldest) → L0 files (newest to oldest) → one file per deeper level.
//! The first definitive answer wins; a tombstone anywhere along the way
//! is a definitive `None`.
//!
//! ## Recovery
//!
//! `open` loads the manifest, then replays WAL records above the
//! persisted **replay watermark** into a fresh memtable. The watermark
//! is contiguous — it never jumps over a memtable whose flush had not
//! registered, no matter in which order racing flush workers finished —
//! so after a crash the recovered state equals the state at the last
//! successful synchronous WAL sync.
//!
//! ## Fatal-error fencing
//!
//! A failed WAL fsync or manifest write marks the engine **read-only**;
//! every subsequent write fails with `Busy` until restart. Reads keep
//! working — the data that was durable stays readable.
//!
//! ## State-machine surface
//!
//! The consensus layer drives the engine exclusively through
//! [`Engine::apply`], [`Engine::snapshot_create`],
//! [`Engine::snapshot_load`], [`Engine::current_seq`], and
//! [`Engine::flush_all`].

pub mod utils;

#[cfg(test)]
mod tests;

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::batch::{BatchError, EntryStatus, WriteBatch};
use crate::config::{MAX_KEY_LEN, MAX_VALUE_LEN, StoreConfig};
use crate::encoding::{Decode, Encode};
use crate::error::{Diag, ErrorKind};
use crate::levels::{LevelManager, LevelsError};
use crate::locks::{LockError, LockMode, SegmentedLockManager};
use crate::memtable::manager::{InsertOutcome, ManagerError, MemtableManager};
use crate::memtable::{Entry, LookupResult, MemtableError};
use crate::sstable::{TableError, TableGetResult};
use crate::wal::{OpKind, Wal, WalError, WalRecord, WalStats};

use self::utils::{MergeIterator, SurvivorFilter, VisibilityFilter};

use crate::compaction::{CompactionScheduler, StatsSnapshot, TaskPriority};

/// WAL subdirectory under the engine's data dir.
pub const WAL_DIR: &str = "wal";

const SNAPSHOT_MAGIC: [u8; 4] = *b"CSNP";
const SNAPSHOT_VERSION: u16 = 1;

/// How long `flush_all` waits for the scheduler to drain.
const FLUSH_ALL_TIMEOUT: Duration = Duration::from_secs(30);

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error from the write-ahead log.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Error from the memtable layer.
    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Error from the memtable manager.
    #[error("memtable manager error: {0}")]
    Manager(#[from] ManagerError),

    /// Error from the level manager.
    #[error("levels error: {0}")]
    Levels(#[from] LevelsError),

    /// Error from a table read.
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// Error from lock acquisition.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// Error from batch staging.
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parameter or contract violation; no state was touched.
    #[error("invalid argument: {0}")]
    Param(&'static str),

    /// The engine is read-only after a fatal I/O failure.
    #[error("engine is read-only after a fatal I/O error")]
    ReadOnly,

    /// A bounded wait elapsed.
    #[error("operation timed out: {0}")]
    Timeout(&'static str),

    /// Snapshot stream failed validation.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(Diag),
}

impl EngineError {
    /// Maps onto the closed result-code set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Wal(e) => e.kind(),
            Self::Memtable(e) => e.kind(),
            Self::Manager(e) => e.kind(),
            Self::Levels(e) => e.kind(),
            Self::Table(e) => e.kind(),
            Self::Lock(e) => e.kind(),
            Self::Batch(e) => e.kind(),
            Self::Io(e) => crate::error::io_kind(e),
            Self::Param(_) => ErrorKind::Param,
            Self::ReadOnly => ErrorKind::Busy,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::CorruptSnapshot(_) => ErrorKind::Corrupted,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Stats & snapshot metadata
// ------------------------------------------------------------------------------------------------

/// Point-in-time engine statistics.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Bytes in the active memtable.
    pub active_memtable_bytes: usize,
    /// Immutable memtables awaiting flush.
    pub immutable_count: usize,
    /// Per-level `(file_count, byte_total)`.
    pub levels: Vec<(usize, u64)>,
    /// WAL counters.
    pub wal: WalStats,
    /// Compaction counters.
    pub compaction: StatsSnapshot,
    /// Highest assigned seq.
    pub current_seq: u64,
}

/// Metadata describing a written state-machine snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMeta {
    /// Live entries written.
    pub entry_count: u64,
    /// Highest seq captured.
    pub max_seq: u64,
    /// Snapshot byte size.
    pub bytes: u64,
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

/// One shard's storage engine. Cloneable handle; all clones share state.
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct EngineShared {
    data_dir: PathBuf,
    config: StoreConfig,
    wal: Arc<Wal>,
    memtables: Arc<MemtableManager>,
    levels: Arc<LevelManager>,
    scheduler: CompactionScheduler,
    locks: SegmentedLockManager,
    seq: AtomicU64,
    read_only: AtomicBool,
    snapshot_in_progress: AtomicBool,
    closed: AtomicBool,
}

impl Engine {
    /// Opens (or creates) an engine rooted at `data_dir`, performing
    /// full crash recovery before returning.
    pub fn open(data_dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|_| EngineError::Param("invalid configuration"))?;

        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        // 1. Durable table state.
        let levels = Arc::new(LevelManager::open(&data_dir)?);
        // The persisted replay watermark, NOT max-seq-over-tables: with
        // several flush workers a newer memtable's table can register
        // before an older one's, so the max would jump over records
        // that are WAL-synced but not yet flushed — and a crash right
        // then would silently drop them from replay.
        let replay_watermark = levels.replay_watermark();

        // 2. WAL + replay of everything above the watermark. Records
        // that also made it into a table replay as harmless duplicates
        // (same key, same seq).
        let wal = Arc::new(Wal::open(data_dir.join(WAL_DIR), config.wal.clone())?);
        let memtables = Arc::new(MemtableManager::new(config.memtable.clone()));

        let mut replayed = 0u64;
        let max_wal_seq = wal.replay(|record| {
            if record.seq <= replay_watermark {
                return Ok(());
            }
            let value = match record.kind {
                OpKind::Put => Some(record.value),
                OpKind::Delete => None,
            };
            memtables
                .insert(record.key, value, record.seq)
                .map_err(|e| WalError::Internal(format!("replay insert failed: {e}")))?;
            replayed += 1;
            Ok(())
        })?;

        let start_seq = levels.max_flushed_seq().max(max_wal_seq);
        info!(
            dir = %data_dir.display(),
            replay_watermark,
            replayed,
            start_seq,
            "engine recovered"
        );

        // 3. Background machinery.
        let scheduler = CompactionScheduler::start(
            config.compaction.clone(),
            Arc::clone(&memtables),
            Arc::clone(&levels),
        );

        // Replay may have filled and rotated memtables; queue their
        // flushes now that workers exist.
        let (_, immutables) = memtables.layers()?;
        for table in immutables {
            scheduler.schedule_flush(table, TaskPriority::Flush);
        }

        let locks = SegmentedLockManager::new(
            config.locks.segments,
            Duration::from_millis(config.locks.acquire_timeout_ms),
            config.locks.deadlock_detection,
        );

        Ok(Self {
            shared: Arc::new(EngineShared {
                data_dir,
                config,
                wal,
                memtables,
                levels,
                scheduler,
                locks,
                seq: AtomicU64::new(start_seq),
                read_only: AtomicBool::new(false),
                snapshot_in_progress: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        })
    }

    // --------------------------------------------------------------------------------------------
    // Write path
    // --------------------------------------------------------------------------------------------

    /// Inserts or updates a key.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), EngineError> {
        validate_key(&key)?;
        if value.len() > MAX_VALUE_LEN {
            return Err(EngineError::Param("value exceeds maximum length"));
        }
        self.write_one(key, Some(value))
    }

    /// Deletes a key by writing a tombstone.
    pub fn delete(&self, key: Vec<u8>) -> Result<(), EngineError> {
        validate_key(&key)?;
        self.write_one(key, None)
    }

    fn write_one(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<(), EngineError> {
        let shared = &self.shared;
        self.check_writable()?;

        let _guard = shared.locks.lock(&key, LockMode::Write, None)?;
        let seq = shared.seq.fetch_add(1, Ordering::SeqCst) + 1;

        let record = match &value {
            Some(v) => WalRecord::put(seq, key.clone(), v.clone()),
            None => WalRecord::delete(seq, key.clone()),
        };
        self.append_fenced(&record)?;

        match shared.memtables.insert(key, value, seq)? {
            InsertOutcome::Inserted => {}
            InsertOutcome::Rotated(sealed) => {
                shared
                    .scheduler
                    .schedule_flush(sealed, TaskPriority::Flush);
            }
        }
        Ok(())
    }

    /// WAL append that trips the read-only fence on fatal failure.
    fn append_fenced(&self, record: &WalRecord) -> Result<(), EngineError> {
        match self.shared.wal.append(record) {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.shared.wal.is_poisoned() {
                    self.shared.read_only.store(true, Ordering::Release);
                    warn!("engine switched to read-only after WAL failure");
                }
                Err(e.into())
            }
        }
    }

    /// Applies a batch: deduplicates (latest add wins), takes a
    /// multi-segment lock over the key set, applies survivors in
    /// `(key asc, seq asc)` order, and returns one status per added
    /// entry, in add order.
    pub fn batch_submit(&self, batch: WriteBatch) -> Result<Vec<EntryStatus>, EngineError> {
        self.check_writable()?;
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let (survivors, mut statuses) = batch.into_apply_order();
        for entry in &survivors {
            validate_key(&entry.key)?;
        }

        let key_refs: Vec<&[u8]> = survivors.iter().map(|e| e.key.as_slice()).collect();
        let _guard = self
            .shared
            .locks
            .multi_lock(&key_refs, LockMode::Write, None)?;

        let mut rotated = Vec::new();
        for entry in survivors {
            let slot = entry.seq as usize;
            let seq = self.shared.seq.fetch_add(1, Ordering::SeqCst) + 1;

            let record = match &entry.value {
                Some(v) => WalRecord::put(seq, entry.key.clone(), v.clone()),
                None => WalRecord::delete(seq, entry.key.clone()),
            };
            if let Err(e) = self.append_fenced(&record) {
                // The entry was never logged, so it must not land in the
                // memtable either; later entries still get their chance
                // (a poisoned log will fail them the same way).
                statuses[slot] = EntryStatus::Failed(e.kind());
                continue;
            }

            match self.shared.memtables.insert(entry.key, entry.value, seq) {
                Ok(InsertOutcome::Inserted) => {}
                Ok(InsertOutcome::Rotated(sealed)) => rotated.push(sealed),
                Err(e) => statuses[slot] = EntryStatus::Failed(e.kind()),
            }
        }

        for sealed in rotated {
            self.shared
                .scheduler
                .schedule_flush(sealed, TaskPriority::Flush);
        }
        Ok(statuses)
    }

    // --------------------------------------------------------------------------------------------
    // Read path
    // --------------------------------------------------------------------------------------------

    /// Point lookup. `None` means the key does not exist (never written,
    /// or deleted).
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        validate_key(key)?;
        let snapshot = self.current_seq();

        // 1. Memtables, newest first.
        match self.shared.memtables.get(key, snapshot)? {
            LookupResult::Found(value) => return Ok(Some(value)),
            LookupResult::Tombstone => return Ok(None),
            LookupResult::NotFound => {}
        }

        // 2. Levels: L0 newest-first, then at most one file per level.
        for (meta, table) in self.shared.levels.read_path(key)? {
            match table.get(key) {
                Ok(TableGetResult::Found { value, .. }) => return Ok(Some(value)),
                Ok(TableGetResult::Tombstone { .. }) => return Ok(None),
                Ok(TableGetResult::NotFound) => {}
                Err(TableError::ChecksumMismatch) => {
                    self.shared.levels.quarantine(meta.id);
                    return Err(EngineError::Table(TableError::ChecksumMismatch));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Ordered scan of live entries in `[start, end)`. An empty `end`
    /// means "to the end of the keyspace".
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError> {
        let snapshot = self.current_seq();
        let merged = self.merged_range(start, end, snapshot)?;
        Ok(VisibilityFilter::new(merged).collect())
    }

    /// Builds the k-way merge over every layer for `[start, end)`.
    fn merged_range(
        &self,
        start: &[u8],
        end: &[u8],
        snapshot: u64,
    ) -> Result<MergeIterator, EngineError> {
        let mut sources: Vec<Box<dyn Iterator<Item = Entry>>> = Vec::new();

        let (active, immutables) = self.shared.memtables.layers()?;
        sources.push(Box::new(active.range_raw(start, end, snapshot).into_iter()));
        for table in immutables.iter().rev() {
            sources.push(Box::new(table.range_raw(start, end, snapshot).into_iter()));
        }

        let mut l0 = self.shared.levels.files(0)?;
        l0.sort_by(|a, b| b.max_seq.cmp(&a.max_seq));
        for meta in l0 {
            sources.push(self.table_range_source(&meta, start, end)?);
        }
        for level in 1..self.shared.levels.level_count() as u32 {
            for meta in self.shared.levels.files(level)? {
                sources.push(self.table_range_source(&meta, start, end)?);
            }
        }

        Ok(MergeIterator::new(sources))
    }

    fn table_range_source(
        &self,
        meta: &crate::levels::TableMeta,
        start: &[u8],
        end: &[u8],
    ) -> Result<Box<dyn Iterator<Item = Entry>>, EngineError> {
        let table = self.shared.levels.table(meta)?;
        let entries = if end.is_empty() {
            let mut all = Vec::new();
            for item in table.iter() {
                let entry = item?;
                if entry.key.as_slice() >= start {
                    all.push(entry);
                }
            }
            all
        } else {
            table.scan(start, end)?
        };
        Ok(Box::new(entries.into_iter()))
    }

    // --------------------------------------------------------------------------------------------
    // State-machine surface
    // --------------------------------------------------------------------------------------------

    /// Applies one replicated operation. The consensus layer's sole
    /// mutation entry point.
    pub fn apply(&self, op: OpKind, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<(), EngineError> {
        match op {
            OpKind::Put => {
                let value = value.ok_or(EngineError::Param("Put requires a value"))?;
                self.put(key, value)
            }
            OpKind::Delete => self.delete(key),
        }
    }

    /// Highest assigned sequence number.
    pub fn current_seq(&self) -> u64 {
        self.shared.seq.load(Ordering::SeqCst)
    }

    /// Streams a consistent snapshot of the live state into `writer`.
    ///
    /// Format: `magic | version | entry_count | [seq, key, value]* |
    /// crc32`. WAL compaction is excluded for the duration so segment
    /// retirement never races the stream.
    pub fn snapshot_create(&self, writer: &mut dyn Write) -> Result<SnapshotMeta, EngineError> {
        self.shared
            .snapshot_in_progress
            .store(true, Ordering::Release);
        let result = self.snapshot_create_inner(writer);
        self.shared
            .snapshot_in_progress
            .store(false, Ordering::Release);
        result
    }

    fn snapshot_create_inner(&self, writer: &mut dyn Write) -> Result<SnapshotMeta, EngineError> {
        let snapshot_seq = self.current_seq();
        let merged = self.merged_range(&[], &[], snapshot_seq)?;
        let live: Vec<Entry> = SurvivorFilter::new(merged, true).collect();

        let mut buf = Vec::new();
        SNAPSHOT_MAGIC
            .encode_to(&mut buf)
            .map_err(WalError::Encoding)?;
        SNAPSHOT_VERSION
            .encode_to(&mut buf)
            .map_err(WalError::Encoding)?;
        (live.len() as u64)
            .encode_to(&mut buf)
            .map_err(WalError::Encoding)?;

        let mut max_seq = 0u64;
        for entry in &live {
            entry.seq.encode_to(&mut buf).map_err(WalError::Encoding)?;
            entry.key.encode_to(&mut buf).map_err(WalError::Encoding)?;
            entry
                .value
                .clone()
                .unwrap_or_default()
                .encode_to(&mut buf)
                .map_err(WalError::Encoding)?;
            max_seq = max_seq.max(entry.seq);
        }

        let mut hasher = Crc32::new();
        hasher.update(&buf);
        hasher
            .finalize()
            .encode_to(&mut buf)
            .map_err(WalError::Encoding)?;

        writer.write_all(&buf)?;
        writer.flush()?;

        info!(entries = live.len(), max_seq, "state snapshot written");
        Ok(SnapshotMeta {
            entry_count: live.len() as u64,
            max_seq,
            bytes: buf.len() as u64,
        })
    }

    /// Ingests a snapshot previously produced by
    /// [`Engine::snapshot_create`], applying entries through the normal
    /// write path (each gets a fresh seq; ordering is preserved).
    pub fn snapshot_load(&self, reader: &mut dyn Read) -> Result<u64, EngineError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;

        if bytes.len() < 4 {
            return Err(EngineError::CorruptSnapshot(Diag::capture(
                ErrorKind::Corrupted,
                "snapshot shorter than checksum",
            )));
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes(crc_bytes.try_into().map_err(|_| {
            EngineError::CorruptSnapshot(Diag::capture(ErrorKind::Corrupted, "short checksum"))
        })?);
        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != stored {
            return Err(EngineError::CorruptSnapshot(Diag::capture(
                ErrorKind::Corrupted,
                "checksum mismatch",
            )));
        }

        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&body[off..]).map_err(WalError::Encoding)?;
        off += n;
        if magic != SNAPSHOT_MAGIC {
            return Err(EngineError::CorruptSnapshot(Diag::capture(
                ErrorKind::Corrupted,
                "bad magic",
            )));
        }
        let (version, n) = u16::decode_from(&body[off..]).map_err(WalError::Encoding)?;
        off += n;
        if version != SNAPSHOT_VERSION {
            return Err(EngineError::CorruptSnapshot(Diag::capture(
                ErrorKind::Corrupted,
                format!("unsupported version {version}"),
            )));
        }
        let (count, n) = u64::decode_from(&body[off..]).map_err(WalError::Encoding)?;
        off += n;

        for _ in 0..count {
            let (_orig_seq, n) = u64::decode_from(&body[off..]).map_err(WalError::Encoding)?;
            off += n;
            let (key, n) = Vec::<u8>::decode_from(&body[off..]).map_err(WalError::Encoding)?;
            off += n;
            let (value, n) = Vec::<u8>::decode_from(&body[off..]).map_err(WalError::Encoding)?;
            off += n;
            self.put(key, value)?;
        }

        info!(entries = count, "state snapshot loaded");
        Ok(count)
    }

    /// Rotates the active memtable and waits until every immutable has
    /// been flushed to Level 0.
    pub fn flush_all(&self) -> Result<(), EngineError> {
        if let Some(sealed) = self.shared.memtables.rotate_now()? {
            self.shared
                .scheduler
                .schedule_flush(sealed, TaskPriority::UserInitiated);
        }
        // Belt and braces: anything already queued gets a task too
        // (duplicates dedup inside the scheduler).
        let (_, immutables) = self.shared.memtables.layers()?;
        for table in immutables {
            self.shared
                .scheduler
                .schedule_flush(table, TaskPriority::UserInitiated);
        }

        let deadline = Instant::now() + FLUSH_ALL_TIMEOUT;
        while self.shared.memtables.immutable_count() > 0 {
            if Instant::now() >= deadline {
                return Err(EngineError::Timeout("flush_all did not drain"));
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Maintenance & lifecycle
    // --------------------------------------------------------------------------------------------

    /// Periodic housekeeping: worker health, level triggers, WAL
    /// pruning and compaction. Call from an operational timer; tests
    /// call it directly.
    pub fn maintain(&self) -> Result<(), EngineError> {
        let shared = &self.shared;
        shared.scheduler.probe_workers();
        shared.scheduler.maybe_schedule_level(TaskPriority::LevelSize);

        // Safety net: if a rotation's flush trigger was lost (crash
        // between rotate and schedule), the oldest queued immutable
        // gets a task here. Duplicates dedup inside the scheduler.
        if let Some(oldest) = shared.memtables.flush_oldest()? {
            shared.scheduler.schedule_flush(oldest, TaskPriority::Flush);
        }

        // WAL segments are reclaimable once their records are both
        // flushed to tables and absent from live memtables — exactly
        // what the persisted replay watermark certifies.
        let prune_to = shared.levels.replay_watermark();
        if prune_to > 0 {
            shared.wal.prune_flushed(prune_to)?;
        }

        // WAL compaction is skipped while a snapshot streams (segment
        // retirement must not race the reader).
        if shared.wal.compaction_due() && !shared.snapshot_in_progress.load(Ordering::Acquire) {
            shared.wal.compact(false)?;
        }
        Ok(())
    }

    /// Forces the WAL durable right now (commit point).
    pub fn sync(&self) -> Result<(), EngineError> {
        match self.shared.wal.force_sync() {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.shared.wal.is_poisoned() {
                    self.shared.read_only.store(true, Ordering::Release);
                }
                Err(e.into())
            }
        }
    }

    /// Requests a manual compaction round at user priority.
    pub fn compact(&self) -> Result<(), EngineError> {
        self.shared
            .scheduler
            .maybe_schedule_level(TaskPriority::UserInitiated);
        Ok(())
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let (active, _) = self.shared.memtables.layers()?;
        Ok(EngineStats {
            active_memtable_bytes: active.memory_usage(),
            immutable_count: self.shared.memtables.immutable_count(),
            levels: self.shared.levels.level_stats(),
            wal: self.shared.wal.stats()?,
            compaction: self.shared.scheduler.stats(),
            current_seq: self.current_seq(),
        })
    }

    /// True once a fatal I/O error fenced writes off.
    pub fn is_read_only(&self) -> bool {
        self.shared.read_only.load(Ordering::Acquire)
    }

    /// The configuration this engine was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Graceful shutdown: drain flushes, stop workers, sync and stop
    /// the WAL, fsync directories. Idempotent.
    pub fn close(&self) -> Result<(), EngineError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(dir = %self.shared.data_dir.display(), "engine closing");

        let flush_result = self.flush_all();
        self.shared.scheduler.shutdown();

        if !self.shared.wal.is_poisoned() {
            self.shared.wal.force_sync()?;
        }
        self.shared.wal.shutdown();

        for dir in [
            self.shared.data_dir.clone(),
            self.shared.data_dir.join(WAL_DIR),
            self.shared.levels.sst_dir().to_path_buf(),
        ] {
            if let Ok(handle) = fs::File::open(&dir) {
                let _ = handle.sync_all();
            }
        }

        flush_result
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

impl Engine {
    fn check_writable(&self) -> Result<(), EngineError> {
        if self.shared.read_only.load(Ordering::Acquire) {
            return Err(EngineError::ReadOnly);
        }
        Ok(())
    }
}

fn validate_key(key: &[u8]) -> Result<(), EngineError> {
    if key.is_empty() {
        return Err(EngineError::Param("empty key"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(EngineError::Param("key exceeds maximum length"));
    }
    Ok(())
}
