//! Bounded staging area for multi-operation submissions.
//!
//! A [`WriteBatch`] records Puts and Deletes with an increasing local
//! seq assigned at add-time. Capacity is bounded by byte size; crossing
//! it returns [`BatchError::BatchTooLarge`] (distinct from an allocation
//! failure) and the offending entry is **not** retained.
//!
//! # Deduplication direction
//!
//! When multiple entries share a key, only the one with the **highest**
//! local seq survives — latest add wins. The implementation stable-sorts
//! by `(key asc, seq asc)` so duplicates are adjacent with the latest
//! last, then forward-scans keeping an entry only when the next entry
//! has a different key. The direction is load-bearing: a reverse scan
//! would keep the *oldest* add and silently resurrect overwritten
//! values.
//!
//! Application order is `(key asc, seq asc)`, so a later Delete is
//! applied after the Put it supersedes.

use thiserror::Error;

use crate::error::ErrorKind;

/// Fixed accounting overhead per staged entry.
const ENTRY_OVERHEAD: usize = 32;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by batch staging.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    /// The staged byte size would exceed the configured capacity.
    #[error("batch capacity exceeded ({used} + {incoming} > {capacity} bytes)")]
    BatchTooLarge {
        /// Bytes already staged.
        used: usize,
        /// Size of the rejected entry.
        incoming: usize,
        /// Configured capacity.
        capacity: usize,
    },

    /// Contract violation (empty key).
    #[error("invalid argument: {0}")]
    Param(&'static str),
}

impl BatchError {
    /// Maps onto the closed result-code set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BatchTooLarge { .. } => ErrorKind::BatchTooLarge,
            Self::Param(_) => ErrorKind::Param,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Entries and statuses
// ------------------------------------------------------------------------------------------------

/// One staged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// User key.
    pub key: Vec<u8>,

    /// `Some` for a Put, `None` for a Delete.
    pub value: Option<Vec<u8>>,

    /// Local seq assigned at add-time (position in the batch).
    pub seq: u64,
}

/// Per-entry result reported by submission, aligned with add order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Entry was applied.
    Applied,

    /// A later add on the same key superseded this entry during
    /// deduplication. Not a failure.
    Superseded,

    /// Application failed with the given code.
    Failed(ErrorKind),
}

// ------------------------------------------------------------------------------------------------
// WriteBatch
// ------------------------------------------------------------------------------------------------

/// Ordered, deduplicated, capacity-bounded staging area.
/// See the [module docs](self).
#[derive(Debug)]
pub struct WriteBatch {
    entries: Vec<BatchEntry>,
    used_bytes: usize,
    capacity: usize,
    next_seq: u64,
}

impl WriteBatch {
    /// Creates a batch bounded at `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            used_bytes: 0,
            capacity,
            next_seq: 0,
        }
    }

    /// Stages a Put.
    pub fn add_put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), BatchError> {
        self.add(key, Some(value))
    }

    /// Stages a Delete.
    pub fn add_delete(&mut self, key: Vec<u8>) -> Result<(), BatchError> {
        self.add(key, None)
    }

    fn add(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<(), BatchError> {
        if key.is_empty() {
            return Err(BatchError::Param("empty key"));
        }
        let incoming = ENTRY_OVERHEAD + key.len() + value.as_ref().map_or(0, Vec::len);
        if self.used_bytes + incoming > self.capacity {
            return Err(BatchError::BatchTooLarge {
                used: self.used_bytes,
                incoming,
                capacity: self.capacity,
            });
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(BatchEntry { key, value, seq });
        self.used_bytes += incoming;
        Ok(())
    }

    /// Staged entry count (before deduplication).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Staged byte footprint.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    /// Consumes the batch into its raw entries in add order (`seq` is
    /// the add index). Used by the shard router to regroup a batch by
    /// shard before submission.
    pub fn into_entries(self) -> Vec<BatchEntry> {
        self.entries
    }

    /// Resolves the batch into apply order, consuming it.
    ///
    /// Returns `(surviving_entries, statuses)`:
    /// - survivors are sorted `(key asc, seq asc)` — the required apply
    ///   order — with exactly one entry per key (latest add);
    /// - `statuses` has one slot per *added* entry, in add order, marked
    ///   [`EntryStatus::Superseded`] for dedup losers and
    ///   [`EntryStatus::Applied`] for survivors (the engine downgrades
    ///   individual slots to `Failed` if application errors).
    pub fn into_apply_order(self) -> (Vec<BatchEntry>, Vec<EntryStatus>) {
        let mut statuses = vec![EntryStatus::Applied; self.entries.len()];

        let mut sorted = self.entries;
        // Stable sort by (key asc, seq asc): duplicates end up adjacent
        // with the latest add last.
        sorted.sort_by(|a, b| a.key.cmp(&b.key).then(a.seq.cmp(&b.seq)));

        // Forward scan: keep an entry only when the next one is for a
        // different key. Keeping the *last* of each run is what makes
        // "latest add wins" hold.
        let mut survivors = Vec::with_capacity(sorted.len());
        for i in 0..sorted.len() {
            let superseded = sorted
                .get(i + 1)
                .is_some_and(|next| next.key == sorted[i].key);
            if superseded {
                statuses[sorted[i].seq as usize] = EntryStatus::Superseded;
            } else {
                survivors.push(sorted[i].clone());
            }
        }

        (survivors, statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_assigns_increasing_seqs() {
        let mut batch = WriteBatch::new(1024);
        batch.add_put(b"a".to_vec(), b"1".to_vec()).unwrap();
        batch.add_delete(b"b".to_vec()).unwrap();
        batch.add_put(b"c".to_vec(), b"3".to_vec()).unwrap();

        let entries = batch.into_entries();
        let seqs: Vec<u64> = entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn capacity_breach_rejects_entry() {
        let mut batch = WriteBatch::new(128);
        let mut accepted = 0;
        loop {
            match batch.add_put(format!("k{accepted}").into_bytes(), vec![0u8; 8]) {
                Ok(()) => accepted += 1,
                Err(BatchError::BatchTooLarge { .. }) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        // The rejected entry is not retained, and nothing staged busts
        // the budget.
        assert_eq!(batch.len(), accepted);
        assert!(batch.used_bytes() <= 128);
    }

    #[test]
    fn empty_key_is_rejected() {
        let mut batch = WriteBatch::new(1024);
        assert_eq!(
            batch.add_put(Vec::new(), b"v".to_vec()),
            Err(BatchError::Param("empty key"))
        );
    }

    #[test]
    fn dedup_keeps_latest_add() {
        let mut batch = WriteBatch::new(4096);
        batch.add_put(b"a".to_vec(), b"1".to_vec()).unwrap();
        batch.add_put(b"b".to_vec(), b"2".to_vec()).unwrap();
        batch.add_delete(b"a".to_vec()).unwrap();
        batch.add_put(b"a".to_vec(), b"3".to_vec()).unwrap();

        let (survivors, statuses) = batch.into_apply_order();

        // Only the last add for "a" survives, and it is a Put("3").
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[0].key, b"a".to_vec());
        assert_eq!(survivors[0].value, Some(b"3".to_vec()));
        assert_eq!(survivors[0].seq, 3);
        assert_eq!(survivors[1].key, b"b".to_vec());

        assert_eq!(
            statuses,
            vec![
                EntryStatus::Superseded, // Put(a, 1)
                EntryStatus::Applied,    // Put(b, 2)
                EntryStatus::Superseded, // Delete(a)
                EntryStatus::Applied,    // Put(a, 3)
            ]
        );
    }

    #[test]
    fn dedup_keeps_trailing_delete() {
        let mut batch = WriteBatch::new(4096);
        batch.add_put(b"k".to_vec(), b"v".to_vec()).unwrap();
        batch.add_delete(b"k".to_vec()).unwrap();

        let (survivors, statuses) = batch.into_apply_order();
        assert_eq!(survivors.len(), 1);
        assert!(survivors[0].value.is_none());
        assert_eq!(statuses[0], EntryStatus::Superseded);
        assert_eq!(statuses[1], EntryStatus::Applied);
    }

    #[test]
    fn apply_order_is_key_then_seq() {
        let mut batch = WriteBatch::new(4096);
        batch.add_put(b"z".to_vec(), b"1".to_vec()).unwrap();
        batch.add_put(b"a".to_vec(), b"2".to_vec()).unwrap();
        batch.add_put(b"m".to_vec(), b"3".to_vec()).unwrap();

        let (survivors, _) = batch.into_apply_order();
        let keys: Vec<&[u8]> = survivors.iter().map(|e| e.key.as_slice()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"m".as_slice(), b"z".as_slice()]);
    }
}
