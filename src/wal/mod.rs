//! Write-Ahead Log — segmented, CRC-protected, compactable.
//!
//! Every mutation is appended here before it touches the memtable, so a
//! crash at any point can be replayed back to the last durable state.
//! The log is a chain of size-bounded **segments**; the highest-numbered
//! segment is active, older ones are sealed and retired once their
//! records are flushed to SSTables.
//!
//! # On-disk layout
//!
//! Segment files are named `segment-<seq>.log` (zero-padded, monotonic):
//!
//! ```text
//! [MAGIC(4) "CWAL"][VERSION(2)][RECORD_COUNT(4)]
//! [CRC32(4)][LEN(4)][PAYLOAD]
//! [CRC32(4)][LEN(4)][PAYLOAD]
//! ...
//! ```
//!
//! - `RECORD_COUNT` is patched in when a segment is sealed at rotation;
//!   a segment that was active at crash time carries 0 ("unknown").
//!   Replay never trusts it — records are walked until end-of-file.
//! - `PAYLOAD` is `seq(8) | op(1) | ts(8) | key_len(4) | key |
//!   val_len(4) | val`; the CRC covers `LEN || PAYLOAD`.
//!
//! # Rotation vs. compaction
//!
//! These are different operations and both can occur on the same log:
//!
//! - **Rotation** seals the active segment when it exceeds the size
//!   threshold and opens a fresh one. No records are dropped.
//! - **Compaction** rewrites the *live* state — the latest record per
//!   key (tombstones included) — into one fresh segment and deletes all
//!   older segments. Triggered when the live/total record ratio sinks
//!   below `wal.compact_ratio`.
//!
//! # Durability
//!
//! `sync_on_append = true` fsyncs every append. In async mode a
//! background worker fsyncs on a timer (`incremental_interval_ms`) or
//! after `sync_batch_threshold` unsynced appends; [`Wal::force_sync`]
//! remains synchronous for commit points. A failed fsync **poisons** the
//! log: every subsequent operation fails until the process restarts,
//! because the kernel may have dropped dirty pages we already
//! acknowledged.
//!
//! # Recovery
//!
//! [`Wal::replay`] walks all segments in sequence order and feeds each
//! valid record to a consumer callback. A CRC mismatch or truncated
//! frame in the **newest** segment is a torn tail — the writer never saw
//! success — so replay stops there with a warning. The same damage in an
//! older segment means silent corruption and is fatal.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crc32fast::Hasher as Crc32;
use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::arena::Arena;
use crate::config::WalConfig;
use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::error::{self, ErrorKind};
use crate::util::now_micros;

const U32_SIZE: usize = std::mem::size_of::<u32>();

/// Segment file magic.
const SEGMENT_MAGIC: [u8; 4] = *b"CWAL";

/// Segment format version.
const SEGMENT_VERSION: u16 = 1;

/// Encoded header size: magic(4) + version(2) + record_count(4).
const HEADER_SIZE: usize = 10;

/// Byte offset of the patchable `record_count` field.
const RECORD_COUNT_OFFSET: u64 = 6;

/// Hard cap on a single record frame (covers max key + max value).
const MAX_RECORD_SIZE: u32 = 8 * 1024 * 1024;

/// Minimum records before ratio-based compaction is considered.
const COMPACT_MIN_RECORDS: u64 = 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Record frame failed its CRC mid-log — silent corruption.
    #[error("corrupted record in segment {segment} at offset {offset}")]
    Corrupted {
        /// Segment sequence number.
        segment: u64,
        /// Byte offset of the bad frame.
        offset: u64,
    },

    /// Record exceeds the maximum frame size.
    #[error("record size {0} exceeds limit")]
    RecordTooLarge(usize),

    /// Segment header failed validation.
    #[error("invalid segment header: {0}")]
    InvalidHeader(String),

    /// A previous fsync failed; the log refuses further writes.
    #[error("WAL poisoned by an earlier sync failure")]
    Poisoned,

    /// Internal consistency or locking error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WalError {
    /// Maps onto the closed result-code set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) => error::io_kind(e),
            Self::Encoding(_) | Self::Corrupted { .. } | Self::InvalidHeader(_) => {
                ErrorKind::Corrupted
            }
            Self::RecordTooLarge(_) => ErrorKind::Param,
            Self::Poisoned => ErrorKind::Busy,
            Self::Internal(_) => ErrorKind::System,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Record
// ------------------------------------------------------------------------------------------------

/// Operation carried by a WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Insert or update a key.
    Put,
    /// Point tombstone.
    Delete,
}

impl Encode for OpKind {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let tag: u8 = match self {
            Self::Put => 0,
            Self::Delete => 1,
        };
        tag.encode_to(buf)
    }
}

impl Decode for OpKind {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, n) = u8::decode_from(buf)?;
        let kind = match tag {
            0 => Self::Put,
            1 => Self::Delete,
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: u32::from(other),
                    type_name: "OpKind",
                });
            }
        };
        Ok((kind, n))
    }
}

/// A single logged mutation.
///
/// `value` is empty for [`OpKind::Delete`] records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Engine-assigned sequence number.
    pub seq: u64,

    /// Operation kind.
    pub kind: OpKind,

    /// Wall-clock timestamp in microseconds (diagnostic).
    pub timestamp: u64,

    /// User key.
    pub key: Vec<u8>,

    /// User value (empty for deletes).
    pub value: Vec<u8>,
}

impl WalRecord {
    /// A Put record stamped with the current time.
    pub fn put(seq: u64, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            seq,
            kind: OpKind::Put,
            timestamp: now_micros(),
            key,
            value,
        }
    }

    /// A Delete (tombstone) record stamped with the current time.
    pub fn delete(seq: u64, key: Vec<u8>) -> Self {
        Self {
            seq,
            kind: OpKind::Delete,
            timestamp: now_micros(),
            key,
            value: Vec::new(),
        }
    }
}

impl Encode for WalRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.seq.encode_to(buf)?;
        self.kind.encode_to(buf)?;
        self.timestamp.encode_to(buf)?;
        self.key.encode_to(buf)?;
        self.value.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for WalRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (seq, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (kind, n) = OpKind::decode_from(&buf[offset..])?;
        offset += n;
        let (timestamp, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        let (value, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                seq,
                kind,
                timestamp,
                key,
                value,
            },
            offset,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Segment bookkeeping
// ------------------------------------------------------------------------------------------------

struct ActiveSegment {
    seq: u64,
    file: File,
    path: PathBuf,
    record_count: u32,
    bytes: u64,
    /// Highest record seq written to this segment.
    max_record_seq: u64,
}

/// A sealed (read-only) segment still on disk.
#[derive(Debug, Clone)]
struct SealedSegment {
    seq: u64,
    path: PathBuf,
    /// Highest record seq contained; 0 until replay has walked it.
    max_record_seq: u64,
}

struct WalInner {
    active: ActiveSegment,
    sealed: Vec<SealedSegment>,
    /// Appends not yet covered by an fsync (async mode).
    unsynced: usize,
    /// Records appended across all live segments.
    total_records: u64,
}

// ------------------------------------------------------------------------------------------------
// Sync worker plumbing
// ------------------------------------------------------------------------------------------------

enum SyncCmd {
    /// Batch-threshold nudge from an appender.
    Nudge,
    /// Synchronous sync request; ack when durable.
    Force(Sender<Result<(), ErrorKind>>),
    /// Worker shutdown.
    Shutdown,
}

// ------------------------------------------------------------------------------------------------
// Wal
// ------------------------------------------------------------------------------------------------

struct WalShared {
    dir: PathBuf,
    config: WalConfig,
    inner: Mutex<WalInner>,
    poisoned: AtomicBool,
}

/// Segmented write-ahead log. See the [module docs](self).
pub struct Wal {
    shared: Arc<WalShared>,
    sync_tx: Mutex<Option<Sender<SyncCmd>>>,
    sync_worker: Mutex<Option<JoinHandle<()>>>,
}

/// Statistics snapshot for monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalStats {
    /// Number of segment files on disk.
    pub segment_count: usize,
    /// Active segment sequence number.
    pub active_segment: u64,
    /// Total records across all live segments.
    pub total_records: u64,
    /// Bytes in the active segment.
    pub active_bytes: u64,
}

/// Outcome of a compaction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactOutcome {
    /// Live ratio was above the threshold (or too few records); nothing
    /// rewritten.
    Skipped,
    /// Old segments were replaced by one compacted segment.
    Compacted {
        /// Records before the rewrite.
        before: u64,
        /// Surviving records.
        after: u64,
    },
}

impl Wal {
    /// Opens (or creates) the log under `dir`.
    ///
    /// Existing segments are discovered and chained; the highest becomes
    /// active. Call [`Wal::replay`] before appending to restore record
    /// counters and per-segment watermarks.
    pub fn open(dir: impl AsRef<Path>, config: WalConfig) -> Result<Self, WalError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut seqs = Self::list_segments(&dir)?;
        seqs.sort_unstable();

        let (active, sealed) = match seqs.last().copied() {
            Some(highest) => {
                let sealed = seqs[..seqs.len() - 1]
                    .iter()
                    .map(|&seq| SealedSegment {
                        seq,
                        path: segment_path(&dir, seq),
                        max_record_seq: 0,
                    })
                    .collect();
                (Self::open_segment(&dir, highest)?, sealed)
            }
            None => (Self::create_segment(&dir, 1)?, Vec::new()),
        };

        info!(
            dir = %dir.display(),
            active = active.seq,
            sealed = sealed.len(),
            "WAL opened"
        );

        let shared = Arc::new(WalShared {
            dir,
            config,
            inner: Mutex::new(WalInner {
                active,
                sealed,
                unsynced: 0,
                total_records: 0,
            }),
            poisoned: AtomicBool::new(false),
        });

        let (sync_tx, sync_worker) = if shared.config.sync_on_append {
            (None, None)
        } else {
            let (tx, rx) = channel::unbounded();
            let worker = Self::spawn_sync_worker(Arc::clone(&shared), rx);
            (Some(tx), Some(worker))
        };

        Ok(Self {
            shared,
            sync_tx: Mutex::new(sync_tx),
            sync_worker: Mutex::new(sync_worker),
        })
    }

    /// Appends one record, rotating the active segment first if it is
    /// over the size threshold.
    ///
    /// In sync mode the record is durable when this returns. In async
    /// mode durability follows within the incremental sync window; use
    /// [`Wal::force_sync`] for commit points.
    pub fn append(&self, record: &WalRecord) -> Result<(), WalError> {
        if self.shared.poisoned.load(Ordering::Acquire) {
            return Err(WalError::Poisoned);
        }

        let payload = encoding::encode_to_vec(record)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| WalError::RecordTooLarge(payload.len()))?;
        if len > MAX_RECORD_SIZE {
            return Err(WalError::RecordTooLarge(payload.len()));
        }

        let len_bytes = len.to_le_bytes();
        let crc = compute_crc(&[&len_bytes, &payload]);

        let mut inner = self.lock_inner()?;

        if inner.active.bytes >= self.shared.config.segment_size_mb * 1024 * 1024 {
            self.rotate_locked(&mut inner)?;
        }

        let active = &mut inner.active;
        active.file.seek(SeekFrom::End(0))?;
        active.file.write_all(&crc.to_le_bytes())?;
        active.file.write_all(&len_bytes)?;
        active.file.write_all(&payload)?;

        active.bytes += (2 * U32_SIZE + payload.len()) as u64;
        active.record_count += 1;
        active.max_record_seq = active.max_record_seq.max(record.seq);
        inner.total_records += 1;

        trace!(seq = record.seq, len, "WAL record appended");

        if self.shared.config.sync_on_append {
            if let Err(e) = inner.active.file.sync_all() {
                self.shared.poisoned.store(true, Ordering::Release);
                error!(error = %e, "WAL fsync failed, poisoning log");
                return Err(WalError::Io(e));
            }
        } else {
            inner.unsynced += 1;
            if inner.unsynced >= self.shared.config.sync_batch_threshold
                && let Ok(tx) = self.sync_tx.lock()
                && let Some(tx) = tx.as_ref()
            {
                let _ = tx.send(SyncCmd::Nudge);
            }
        }

        Ok(())
    }

    /// Synchronously fsyncs the active segment. Used at commit points
    /// regardless of sync mode.
    pub fn force_sync(&self) -> Result<(), WalError> {
        if self.shared.poisoned.load(Ordering::Acquire) {
            return Err(WalError::Poisoned);
        }
        let mut inner = self.lock_inner()?;
        match inner.active.file.sync_all() {
            Ok(()) => {
                inner.unsynced = 0;
                Ok(())
            }
            Err(e) => {
                self.shared.poisoned.store(true, Ordering::Release);
                error!(error = %e, "WAL force_sync failed, poisoning log");
                Err(WalError::Io(e))
            }
        }
    }

    /// Replays every valid record, oldest segment first, into `consumer`.
    ///
    /// Also restores internal per-segment watermarks and record totals,
    /// so it must run once after [`Wal::open`] before the first append.
    /// A torn tail in the newest segment is discarded with a warning; a
    /// bad frame in any older segment is fatal.
    pub fn replay(
        &self,
        mut consumer: impl FnMut(WalRecord) -> Result<(), WalError>,
    ) -> Result<u64, WalError> {
        let mut inner = self.lock_inner()?;
        let mut max_seq = 0u64;
        let mut total = 0u64;

        let mut chain: Vec<(u64, PathBuf, bool)> = inner
            .sealed
            .iter()
            .map(|s| (s.seq, s.path.clone(), false))
            .collect();
        chain.push((inner.active.seq, inner.active.path.clone(), true));
        chain.sort_by_key(|(seq, _, _)| *seq);

        for (seg_seq, path, is_tail) in chain {
            let mut seg_max = 0u64;
            let mut seg_count = 0u64;
            let outcome = replay_segment(&path, seg_seq, is_tail, |record| {
                seg_max = seg_max.max(record.seq);
                seg_count += 1;
                consumer(record)
            })?;

            if let SegmentEnd::TornTail { offset } = outcome {
                warn!(
                    segment = seg_seq,
                    offset, "discarding torn WAL tail after crash"
                );
            }

            max_seq = max_seq.max(seg_max);
            total += seg_count;

            if is_tail {
                inner.active.max_record_seq = seg_max;
                inner.active.record_count = seg_count as u32;
            } else if let Some(s) = inner.sealed.iter_mut().find(|s| s.seq == seg_seq) {
                s.max_record_seq = seg_max;
            }
        }

        inner.total_records = total;
        debug!(records = total, max_seq, "WAL replay complete");
        Ok(max_seq)
    }

    /// Deletes sealed segments whose records are all at or below the
    /// flushed watermark (durably in SSTables, no live memtable needs
    /// them).
    pub fn prune_flushed(&self, flushed_seq: u64) -> Result<usize, WalError> {
        let mut inner = self.lock_inner()?;
        let mut removed = 0usize;

        inner.sealed.retain(|seg| {
            // max_record_seq == 0 means replay never walked it (empty or
            // unknown); keep it to stay safe.
            let prunable = seg.max_record_seq != 0 && seg.max_record_seq <= flushed_seq;
            if prunable {
                match fs::remove_file(&seg.path) {
                    Ok(()) => {
                        removed += 1;
                        info!(segment = seg.seq, "pruned flushed WAL segment");
                        false
                    }
                    Err(e) => {
                        warn!(segment = seg.seq, error = %e, "failed to prune WAL segment");
                        true
                    }
                }
            } else {
                true
            }
        });

        Ok(removed)
    }

    /// Rewrites the live state (latest record per key) into one fresh
    /// segment and deletes everything older.
    ///
    /// Skips the rewrite when there are fewer than a minimum number of
    /// records or the live ratio is still above `wal.compact_ratio`,
    /// unless `force` is set.
    pub fn compact(&self, force: bool) -> Result<CompactOutcome, WalError> {
        if self.shared.poisoned.load(Ordering::Acquire) {
            return Err(WalError::Poisoned);
        }
        let mut inner = self.lock_inner()?;

        // Collect the latest record per key across the whole chain.
        // Keys are interned in an arena scratch that lives for this
        // operation only; the BTreeMap keeps replay order deterministic.
        let arena = Arena::new();
        let mut live: BTreeMap<&[u8], WalRecord> = BTreeMap::new();
        let mut total = 0u64;

        let mut chain: Vec<(u64, PathBuf, bool)> = inner
            .sealed
            .iter()
            .map(|s| (s.seq, s.path.clone(), false))
            .collect();
        chain.push((inner.active.seq, inner.active.path.clone(), true));
        chain.sort_by_key(|(seq, _, _)| *seq);

        for (seg_seq, path, is_tail) in &chain {
            replay_segment(path, *seg_seq, *is_tail, |record| {
                total += 1;
                if live.contains_key(record.key.as_slice()) {
                    if let Some(existing) = live.get_mut(record.key.as_slice())
                        && record.seq > existing.seq
                    {
                        *existing = record;
                    }
                } else {
                    let interned = arena.alloc_slice(&record.key);
                    live.insert(interned, record);
                }
                Ok(())
            })?;
        }

        let live_count = live.len() as u64;
        let ratio = if total == 0 {
            1.0
        } else {
            live_count as f64 / total as f64
        };

        if !force && (total < COMPACT_MIN_RECORDS || ratio >= self.shared.config.compact_ratio) {
            trace!(total, live_count, ratio, "WAL compaction skipped");
            return Ok(CompactOutcome::Skipped);
        }

        // Write survivors into the next segment seq, fsync, then retire
        // the old chain. The new segment is complete before anything is
        // deleted, so a crash mid-compaction leaves a replayable log.
        let next_seq = inner.active.seq + 1;
        let mut fresh = Self::create_segment(&self.shared.dir, next_seq)?;

        for record in live.values() {
            let payload = encoding::encode_to_vec(record)?;
            let len_bytes = (payload.len() as u32).to_le_bytes();
            let crc = compute_crc(&[&len_bytes, &payload]);
            fresh.file.write_all(&crc.to_le_bytes())?;
            fresh.file.write_all(&len_bytes)?;
            fresh.file.write_all(&payload)?;
            fresh.bytes += (2 * U32_SIZE + payload.len()) as u64;
            fresh.record_count += 1;
            fresh.max_record_seq = fresh.max_record_seq.max(record.seq);
        }
        fresh.file.sync_all()?;

        let old_paths: Vec<PathBuf> = chain.iter().map(|(_, p, _)| p.clone()).collect();
        inner.sealed.clear();
        inner.total_records = fresh.record_count as u64;
        inner.active = fresh;
        inner.unsynced = 0;

        for path in old_paths {
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove compacted WAL segment");
            }
        }

        info!(
            before = total,
            after = live_count,
            segment = next_seq,
            "WAL compacted"
        );
        Ok(CompactOutcome::Compacted {
            before: total,
            after: live_count,
        })
    }

    /// Whether a compaction pass is worth attempting, judged purely on
    /// the appended-record count (the precise live ratio is only known
    /// by scanning, which [`Wal::compact`] does itself).
    pub fn compaction_due(&self) -> bool {
        self.lock_inner()
            .map(|inner| inner.total_records >= COMPACT_MIN_RECORDS)
            .unwrap_or(false)
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> Result<WalStats, WalError> {
        let inner = self.lock_inner()?;
        Ok(WalStats {
            segment_count: inner.sealed.len() + 1,
            active_segment: inner.active.seq,
            total_records: inner.total_records,
            active_bytes: inner.active.bytes,
        })
    }

    /// True once a sync failure has poisoned the log.
    pub fn is_poisoned(&self) -> bool {
        self.shared.poisoned.load(Ordering::Acquire)
    }

    /// Stops the incremental sync worker (if any) after a final sync.
    pub fn shutdown(&self) {
        if let Ok(mut tx) = self.sync_tx.lock()
            && let Some(tx) = tx.take()
        {
            let _ = tx.send(SyncCmd::Shutdown);
        }
        if let Ok(mut worker) = self.sync_worker.lock()
            && let Some(handle) = worker.take()
        {
            let _ = handle.join();
        }
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, WalInner>, WalError> {
        self.shared
            .inner
            .lock()
            .map_err(|_| WalError::Internal("WAL mutex poisoned".into()))
    }

    /// Seals the active segment (patches its record count) and opens the
    /// next one. Caller holds the inner lock.
    fn rotate_locked(&self, inner: &mut WalInner) -> Result<(), WalError> {
        let active = &mut inner.active;

        // Patch the header record count now that it is final.
        active.file.seek(SeekFrom::Start(RECORD_COUNT_OFFSET))?;
        active.file.write_all(&active.record_count.to_le_bytes())?;
        active.file.sync_all()?;

        let sealed = SealedSegment {
            seq: active.seq,
            path: active.path.clone(),
            max_record_seq: active.max_record_seq,
        };
        let next_seq = active.seq + 1;
        let fresh = Self::create_segment(&self.shared.dir, next_seq)?;

        info!(
            sealed = sealed.seq,
            records = active.record_count,
            next = next_seq,
            "WAL segment rotated"
        );

        inner.sealed.push(sealed);
        inner.active = fresh;
        inner.unsynced = 0;
        Ok(())
    }

    fn create_segment(dir: &Path, seq: u64) -> Result<ActiveSegment, WalError> {
        let path = segment_path(dir, seq);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let mut header = Vec::with_capacity(HEADER_SIZE);
        SEGMENT_MAGIC.encode_to(&mut header)?;
        SEGMENT_VERSION.encode_to(&mut header)?;
        0u32.encode_to(&mut header)?; // record_count patched at seal
        file.write_all(&header)?;
        file.sync_all()?;

        debug!(seq, path = %path.display(), "WAL segment created");
        Ok(ActiveSegment {
            seq,
            file,
            path,
            record_count: 0,
            bytes: HEADER_SIZE as u64,
            max_record_seq: 0,
        })
    }

    fn open_segment(dir: &Path, seq: u64) -> Result<ActiveSegment, WalError> {
        let path = segment_path(dir, seq);
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut header = [0u8; HEADER_SIZE];
        file.read_exact(&mut header)
            .map_err(|_| WalError::InvalidHeader("segment shorter than header".into()))?;
        validate_header(&header)?;

        let bytes = file.metadata()?.len();
        Ok(ActiveSegment {
            seq,
            file,
            path,
            record_count: 0,
            bytes,
            max_record_seq: 0,
        })
    }

    fn list_segments(dir: &Path) -> Result<Vec<u64>, WalError> {
        let mut seqs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str()
                && let Some(seq) = parse_segment_name(name)
            {
                seqs.push(seq);
            }
        }
        Ok(seqs)
    }

    fn spawn_sync_worker(shared: Arc<WalShared>, rx: Receiver<SyncCmd>) -> JoinHandle<()> {
        let interval = Duration::from_millis(shared.config.incremental_interval_ms.max(1));
        std::thread::Builder::new()
            .name("wal-sync".into())
            .spawn(move || {
                loop {
                    let cmd = rx.recv_timeout(interval);
                    match cmd {
                        Ok(SyncCmd::Shutdown) => {
                            let _ = sync_shared(&shared);
                            return;
                        }
                        Ok(SyncCmd::Force(ack)) => {
                            let _ = ack.send(sync_shared(&shared));
                        }
                        Ok(SyncCmd::Nudge) | Err(channel::RecvTimeoutError::Timeout) => {
                            if sync_shared(&shared).is_err() {
                                // Poisoned; nothing left to do but drain
                                // shutdown commands.
                            }
                        }
                        Err(channel::RecvTimeoutError::Disconnected) => {
                            let _ = sync_shared(&shared);
                            return;
                        }
                    }
                }
            })
            .expect("failed to spawn wal-sync thread")
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        self.shutdown();
        if let Ok(inner) = self.shared.inner.lock()
            && let Err(e) = inner.active.file.sync_all()
        {
            error!(error = %e, "WAL sync failed on drop");
        }
    }
}

/// Fsync the active segment of a shared WAL, poisoning on failure.
fn sync_shared(shared: &WalShared) -> Result<(), ErrorKind> {
    let mut inner = match shared.inner.lock() {
        Ok(g) => g,
        Err(_) => return Err(ErrorKind::System),
    };
    if inner.unsynced == 0 {
        return Ok(());
    }
    match inner.active.file.sync_all() {
        Ok(()) => {
            inner.unsynced = 0;
            Ok(())
        }
        Err(e) => {
            shared.poisoned.store(true, Ordering::Release);
            error!(error = %e, "incremental WAL sync failed, poisoning log");
            Err(error::io_kind(&e))
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Segment replay
// ------------------------------------------------------------------------------------------------

enum SegmentEnd {
    /// Walked cleanly to end-of-file.
    Clean,
    /// Stopped at a torn frame (tail segment only).
    TornTail { offset: u64 },
}

/// Walks one segment's frames, feeding decoded records to `consumer`.
///
/// `is_tail` selects the failure policy for a bad frame: the newest
/// segment tolerates a torn tail (the write never returned success);
/// older segments must be pristine.
fn replay_segment(
    path: &Path,
    seg_seq: u64,
    is_tail: bool,
    mut consumer: impl FnMut(WalRecord) -> Result<(), WalError>,
) -> Result<SegmentEnd, WalError> {
    let mut file = File::open(path)?;

    let mut header = [0u8; HEADER_SIZE];
    file.read_exact(&mut header)
        .map_err(|_| WalError::InvalidHeader("segment shorter than header".into()))?;
    validate_header(&header)?;

    let mut offset = HEADER_SIZE as u64;
    loop {
        let mut frame_head = [0u8; 2 * U32_SIZE];
        match file.read_exact(&mut frame_head) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(SegmentEnd::Clean),
            Err(e) => return Err(WalError::Io(e)),
        }

        let stored_crc = u32::from_le_bytes([
            frame_head[0],
            frame_head[1],
            frame_head[2],
            frame_head[3],
        ]);
        let len_bytes: [u8; 4] = [frame_head[4], frame_head[5], frame_head[6], frame_head[7]];
        let len = u32::from_le_bytes(len_bytes);

        if len > MAX_RECORD_SIZE {
            return tail_or_fatal(seg_seq, offset, is_tail);
        }

        let mut payload = vec![0u8; len as usize];
        if let Err(e) = file.read_exact(&mut payload) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return tail_or_fatal(seg_seq, offset, is_tail);
            }
            return Err(WalError::Io(e));
        }

        if compute_crc(&[&len_bytes, &payload]) != stored_crc {
            return tail_or_fatal(seg_seq, offset, is_tail);
        }

        let (record, _) = encoding::decode_from_slice::<WalRecord>(&payload)?;
        consumer(record)?;
        offset += (2 * U32_SIZE + len as usize) as u64;
    }
}

fn tail_or_fatal(segment: u64, offset: u64, is_tail: bool) -> Result<SegmentEnd, WalError> {
    if is_tail {
        Ok(SegmentEnd::TornTail { offset })
    } else {
        Err(WalError::Corrupted { segment, offset })
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn segment_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("segment-{seq:06}.log"))
}

fn parse_segment_name(name: &str) -> Option<u64> {
    name.strip_prefix("segment-")
        .and_then(|s| s.strip_suffix(".log"))
        .and_then(|s| s.parse().ok())
}

fn validate_header(header: &[u8; HEADER_SIZE]) -> Result<(), WalError> {
    if header[..4] != SEGMENT_MAGIC {
        return Err(WalError::InvalidHeader("bad magic".into()));
    }
    let version = u16::from_le_bytes([header[4], header[5]]);
    if version != SEGMENT_VERSION {
        return Err(WalError::InvalidHeader(format!(
            "unsupported version {version}"
        )));
    }
    Ok(())
}

/// CRC32 over one or more byte slices.
fn compute_crc(parts: &[&[u8]]) -> u32 {
    let mut hasher = Crc32::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}
