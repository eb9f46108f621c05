//! In-memory sorted write buffer with sequence-qualified entries.
//!
//! ## Design Invariants
//!
//! - Entries are keyed `(user_key asc, seq desc)`; `(key, seq)` pairs are
//!   unique because the engine assigns every mutation a fresh seq.
//! - A reader at snapshot `s` sees, for each key, the entry with the
//!   highest `seq ≤ s`. Deletes are tombstones (`value = None`), not
//!   physical removals.
//! - The memory footprint counter only grows while the table is active;
//!   the manager rotates the table once it crosses the configured
//!   threshold.
//!
//! ## Concurrency
//!
//! The index is a lock-free skip list ([`crossbeam_skiplist::SkipMap`]),
//! so point reads, writers, and snapshot iteration all proceed
//! concurrently without a table-wide lock. Once [`Memtable::seal`] has
//! been called only readers remain; a write after seal is a caller
//! contract violation and is rejected.
//!
//! ## Flush Semantics
//!
//! [`Memtable::iter_raw`] yields the surviving (highest-seq) entry per
//! key **including tombstones** — exactly what the flush path needs to
//! build an L0 SSTable. User-facing scans go through
//! [`Memtable::scan`], which drops tombstones.

pub mod manager;

#[cfg(test)]
mod tests;

use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;
use thiserror::Error;
use tracing::trace;

use crate::error::ErrorKind;

/// Per-entry bookkeeping overhead added to the footprint counter.
const ENTRY_OVERHEAD: usize = 64;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by memtable operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemtableError {
    /// Write attempted on a sealed table.
    #[error("memtable {0} is sealed")]
    Sealed(u64),

    /// Contract violation (empty key, zero seq).
    #[error("invalid argument: {0}")]
    Param(&'static str),
}

impl MemtableError {
    /// Maps onto the closed result-code set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Sealed(_) => ErrorKind::Busy,
            Self::Param(_) => ErrorKind::Param,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Keys and entries
// ------------------------------------------------------------------------------------------------

/// Composite skip-list key: user key ascending, seq **descending**.
///
/// The inverted seq order puts the newest version of a key first, so
/// "latest visible entry" is a single forward step from the range start.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EntryKey {
    key: Vec<u8>,
    seq: u64,
}

impl Ord for EntryKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for EntryKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A materialised entry handed to readers and the flush path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// User key.
    pub key: Vec<u8>,

    /// Stored value; `None` marks a tombstone.
    pub value: Option<Vec<u8>>,

    /// Engine-assigned sequence number.
    pub seq: u64,
}

impl Entry {
    /// True when this entry is a delete marker.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Result of a point lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupResult {
    /// A live value at or below the snapshot seq.
    Found(Vec<u8>),

    /// The newest visible entry is a tombstone — the key is definitively
    /// deleted as far as this table knows.
    Tombstone,

    /// This table holds nothing visible for the key; check older layers.
    NotFound,
}

// ------------------------------------------------------------------------------------------------
// Memtable
// ------------------------------------------------------------------------------------------------

/// Concurrent, ordered in-memory table. See the [module docs](self).
#[derive(Debug)]
pub struct Memtable {
    /// Manager-assigned identity, used by `remove_specific`.
    id: u64,

    map: SkipMap<EntryKey, Option<Vec<u8>>>,

    approximate_size: AtomicUsize,
    sealed: AtomicBool,

    /// Highest seq inserted (0 = empty).
    max_seq: AtomicU64,

    /// Lowest seq inserted (`u64::MAX` = empty).
    min_seq: AtomicU64,
}

impl Memtable {
    /// Creates an empty table with the given identity.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            map: SkipMap::new(),
            approximate_size: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
            max_seq: AtomicU64::new(0),
            min_seq: AtomicU64::new(u64::MAX),
        }
    }

    /// Manager-assigned identity.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Inserts a Put (`value = Some`) or tombstone (`value = None`).
    ///
    /// O(log n). Fails on a sealed table or an empty key; `(key, seq)`
    /// uniqueness is the engine's responsibility (it owns the counter).
    pub fn insert(
        &self,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
        seq: u64,
    ) -> Result<(), MemtableError> {
        if key.is_empty() {
            return Err(MemtableError::Param("empty key"));
        }
        if self.sealed.load(Ordering::Acquire) {
            debug_assert!(false, "insert into sealed memtable");
            return Err(MemtableError::Sealed(self.id));
        }

        let size = ENTRY_OVERHEAD + key.len() + value.as_ref().map_or(0, Vec::len);
        trace!(seq, key_len = key.len(), size, "memtable insert");

        self.map.insert(EntryKey { key, seq }, value);
        self.approximate_size.fetch_add(size, Ordering::Relaxed);
        self.max_seq.fetch_max(seq, Ordering::Relaxed);
        self.min_seq.fetch_min(seq, Ordering::Relaxed);
        Ok(())
    }

    /// Point lookup at `snapshot_seq`: returns the entry with the
    /// largest `seq ≤ snapshot_seq` for `key`, classified for the layered
    /// read path.
    pub fn get(&self, key: &[u8], snapshot_seq: u64) -> LookupResult {
        let start = EntryKey {
            key: key.to_vec(),
            seq: snapshot_seq,
        };
        // Ordering is (key asc, seq desc): the first element at or after
        // `start` is the newest version of `key` with seq ≤ snapshot, if
        // any version qualifies.
        if let Some(entry) = self.map.range(start..).next()
            && entry.key().key == key
        {
            return match entry.value() {
                Some(v) => LookupResult::Found(v.clone()),
                None => LookupResult::Tombstone,
            };
        }
        LookupResult::NotFound
    }

    /// Ordered scan of live entries in `[start, end)` visible at
    /// `snapshot_seq`. Tombstoned keys are omitted.
    pub fn scan(&self, start: &[u8], end: &[u8], snapshot_seq: u64) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.collect_survivors(Some((start, end)), snapshot_seq)
            .into_iter()
            .filter_map(|e| e.value.map(|v| (e.key, v)))
            .collect()
    }

    /// The surviving entry per key — tombstones included — in key order.
    ///
    /// This is the flush/compaction view: enough to rebuild the table's
    /// visible state, with delete markers preserved so they keep
    /// shadowing older levels.
    pub fn iter_raw(&self) -> Vec<Entry> {
        self.collect_survivors(None, u64::MAX)
    }

    /// Like [`Memtable::iter_raw`] but bounded to `[start, end)` and a
    /// snapshot, for merged range scans. An empty `end` means unbounded.
    pub fn range_raw(&self, start: &[u8], end: &[u8], snapshot_seq: u64) -> Vec<Entry> {
        if end.is_empty() {
            return self
                .collect_survivors(None, snapshot_seq)
                .into_iter()
                .filter(|e| e.key.as_slice() >= start)
                .collect();
        }
        self.collect_survivors(Some((start, end)), snapshot_seq)
    }

    fn collect_survivors(&self, range: Option<(&[u8], &[u8])>, snapshot_seq: u64) -> Vec<Entry> {
        let mut out: Vec<Entry> = Vec::new();
        let mut last_key: Option<Vec<u8>> = None;

        let iter: Box<
            dyn Iterator<Item = crossbeam_skiplist::map::Entry<'_, EntryKey, Option<Vec<u8>>>>,
        > = match range {
            Some((start, end)) => {
                if start >= end {
                    return out;
                }
                let lo = EntryKey {
                    key: start.to_vec(),
                    seq: u64::MAX,
                };
                let hi = EntryKey {
                    key: end.to_vec(),
                    seq: u64::MAX,
                };
                Box::new(self.map.range((Bound::Included(lo), Bound::Excluded(hi))))
            }
            None => Box::new(self.map.iter()),
        };

        // Versions of one key are adjacent with the newest first, so the
        // first version at or below the snapshot is the survivor; later
        // versions of the same key are skipped.
        for item in iter {
            let ek = item.key();
            if ek.seq > snapshot_seq {
                continue;
            }
            if last_key.as_deref() == Some(ek.key.as_slice()) {
                continue;
            }
            last_key = Some(ek.key.clone());
            out.push(Entry {
                key: ek.key.clone(),
                value: item.value().clone(),
                seq: ek.seq,
            });
        }
        out
    }

    /// Approximate memory footprint in bytes.
    pub fn memory_usage(&self) -> usize {
        self.approximate_size.load(Ordering::Relaxed)
    }

    /// Number of stored versions (not distinct keys).
    pub fn entry_count(&self) -> usize {
        self.map.len()
    }

    /// True when the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Highest seq inserted; 0 for an empty table.
    pub fn max_seq(&self) -> u64 {
        self.max_seq.load(Ordering::Relaxed)
    }

    /// Lowest seq inserted; `u64::MAX` for an empty table.
    pub fn min_seq(&self) -> u64 {
        self.min_seq.load(Ordering::Relaxed)
    }

    /// Freezes the table; subsequent inserts fail.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Whether [`Memtable::seal`] has been called.
    pub fn sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }
}
