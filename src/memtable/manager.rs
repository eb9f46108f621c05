//! Active-table lifecycle: rotation, the bounded immutable queue, and
//! the flush hand-off contract.
//!
//! The manager owns one **active** memtable plus an age-ordered queue of
//! sealed immutable tables awaiting flush. Ownership is strict: an
//! immutable table belongs to the manager until a flush worker finishes
//! writing its SSTable and calls [`MemtableManager::remove_specific`];
//! only then does the `Arc` drop to zero and the memory go away.
//!
//! Two flush workers may race for the same table. That is by contract:
//! exactly one `remove_specific` call succeeds, the other observes
//! [`ManagerError::NotFound`] and reports its task as already handled.
//! `NotFound` here is **not** an error condition — success is measured
//! at the system level (one immutable table ⇒ one on-disk SSTable).
//!
//! # Read invariant
//!
//! Every lookup walks active → immutables newest-to-oldest; the first
//! definitive answer (value or tombstone) wins. Deeper layers (SSTable
//! levels) are the engine's job.
//!
//! # Backpressure
//!
//! When the queue is at capacity, a rotating writer waits on a condvar
//! for up to `rotation_wait_ms`, then fails with [`ManagerError::Busy`].
//! Flush completions notify the condvar.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::MemtableConfig;
use crate::error::ErrorKind;

use super::{LookupResult, Memtable, MemtableError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by the memtable manager.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Error from the underlying memtable.
    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// The referenced immutable table is no longer queued — another
    /// worker already handled it. Callers under compaction contention
    /// treat this as "already done", not a failure.
    #[error("immutable memtable {0} not found")]
    NotFound(u64),

    /// Immutable queue full and the rotation wait elapsed.
    #[error("immutable queue full ({0} tables), write backpressure")]
    Busy(usize),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ManagerError {
    /// Maps onto the closed result-code set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Memtable(e) => e.kind(),
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Busy(_) => ErrorKind::Busy,
            Self::Internal(_) => ErrorKind::System,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Manager
// ------------------------------------------------------------------------------------------------

struct ManagerInner {
    active: Arc<Memtable>,

    /// Sealed tables, oldest at the front.
    immutables: VecDeque<Arc<Memtable>>,
}

/// Outcome of an insert, telling the engine whether a rotation happened
/// (and therefore a flush should be scheduled).
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// Entry landed in the current active table.
    Inserted,

    /// The active table was sealed and queued; the entry landed in a
    /// fresh active table. The sealed handle is returned so the caller
    /// can schedule its flush.
    Rotated(Arc<Memtable>),
}

/// Holds the active memtable and the bounded immutable queue.
/// See the [module docs](self).
pub struct MemtableManager {
    inner: Mutex<ManagerInner>,
    space_freed: Condvar,
    next_id: AtomicU64,
    config: MemtableConfig,
}

impl MemtableManager {
    /// Creates a manager with an empty active table.
    pub fn new(config: MemtableConfig) -> Self {
        let next_id = AtomicU64::new(2);
        Self {
            inner: Mutex::new(ManagerInner {
                active: Arc::new(Memtable::new(1)),
                immutables: VecDeque::new(),
            }),
            space_freed: Condvar::new(),
            next_id,
            config,
        }
    }

    /// Inserts a Put or tombstone, rotating the active table first when
    /// it is over the size threshold.
    pub fn insert(
        &self,
        key: Vec<u8>,
        value: Option<Vec<u8>>,
        seq: u64,
    ) -> Result<InsertOutcome, ManagerError> {
        let entry_size = key.len() + value.as_ref().map_or(0, Vec::len);
        let mut inner = self.lock_inner()?;

        let mut rotated = None;
        if !inner.active.is_empty()
            && inner.active.memory_usage() + entry_size > self.config.max_bytes
        {
            inner = self.rotate_locked(inner)?;
            // Re-borrow after the rotation wait: the sealed table is the
            // newest queue element.
            rotated = inner.immutables.back().cloned();
        }

        inner.active.insert(key, value, seq)?;

        Ok(match rotated {
            Some(sealed) => InsertOutcome::Rotated(sealed),
            None => InsertOutcome::Inserted,
        })
    }

    /// Point lookup across active then immutables newest-to-oldest.
    pub fn get(&self, key: &[u8], snapshot_seq: u64) -> Result<LookupResult, ManagerError> {
        let (active, immutables) = self.layers()?;

        match active.get(key, snapshot_seq) {
            LookupResult::NotFound => {}
            hit => return Ok(hit),
        }
        for table in immutables.iter().rev() {
            match table.get(key, snapshot_seq) {
                LookupResult::NotFound => {}
                hit => return Ok(hit),
            }
        }
        Ok(LookupResult::NotFound)
    }

    /// Oldest immutable table, if any, for a flush worker. The table
    /// stays queued until [`MemtableManager::remove_specific`] succeeds.
    pub fn flush_oldest(&self) -> Result<Option<Arc<Memtable>>, ManagerError> {
        let inner = self.lock_inner()?;
        Ok(inner.immutables.front().cloned())
    }

    /// Removes a specific immutable table after its flush completed.
    ///
    /// Idempotent under contention: the second caller gets
    /// [`ManagerError::NotFound`], which means the race was already won
    /// — see the [module docs](self).
    pub fn remove_specific(&self, id: u64) -> Result<(), ManagerError> {
        let mut inner = self.lock_inner()?;
        let before = inner.immutables.len();
        inner.immutables.retain(|t| t.id() != id);

        if inner.immutables.len() == before {
            trace!(id, "remove_specific: table already gone (race winner handled it)");
            return Err(ManagerError::NotFound(id));
        }

        debug!(id, remaining = inner.immutables.len(), "immutable memtable retired");
        self.space_freed.notify_all();
        Ok(())
    }

    /// All layers, newest first (active at index 0), for merged scans.
    pub fn layers(&self) -> Result<(Arc<Memtable>, Vec<Arc<Memtable>>), ManagerError> {
        let inner = self.lock_inner()?;
        Ok((
            Arc::clone(&inner.active),
            inner.immutables.iter().cloned().collect(),
        ))
    }

    /// Number of queued immutable tables.
    pub fn immutable_count(&self) -> usize {
        self.lock_inner().map(|i| i.immutables.len()).unwrap_or(0)
    }

    /// The smallest seq still held by any live table (`u64::MAX` when
    /// everything is empty). WAL segments below this are reclaimable
    /// once flushed.
    pub fn min_live_seq(&self) -> Result<u64, ManagerError> {
        let inner = self.lock_inner()?;
        let mut min = inner.active.min_seq();
        for t in &inner.immutables {
            min = min.min(t.min_seq());
        }
        Ok(min)
    }

    /// Seals the active table unconditionally (shutdown / flush_all) and
    /// returns its handle if it held any data.
    pub fn rotate_now(&self) -> Result<Option<Arc<Memtable>>, ManagerError> {
        let inner = self.lock_inner()?;
        if inner.active.is_empty() {
            return Ok(None);
        }
        let inner = self.rotate_locked(inner)?;
        Ok(inner.immutables.back().cloned())
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn lock_inner(&self) -> Result<std::sync::MutexGuard<'_, ManagerInner>, ManagerError> {
        self.inner
            .lock()
            .map_err(|_| ManagerError::Internal("manager mutex poisoned".into()))
    }

    /// Seals the active table and swaps in a fresh one, waiting for
    /// queue space under backpressure.
    fn rotate_locked<'a>(
        &'a self,
        mut inner: std::sync::MutexGuard<'a, ManagerInner>,
    ) -> Result<std::sync::MutexGuard<'a, ManagerInner>, ManagerError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.rotation_wait_ms);

        while inner.immutables.len() >= self.config.immutable_queue_depth {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    queued = inner.immutables.len(),
                    "immutable queue full, rejecting rotation"
                );
                return Err(ManagerError::Busy(inner.immutables.len()));
            }
            let (next, _timeout) = self
                .space_freed
                .wait_timeout(inner, deadline - now)
                .map_err(|_| ManagerError::Internal("manager mutex poisoned".into()))?;
            inner = next;
        }

        let fresh_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let fresh = Arc::new(Memtable::new(fresh_id));
        let old = std::mem::replace(&mut inner.active, fresh);
        old.seal();

        info!(
            sealed = old.id(),
            bytes = old.memory_usage(),
            entries = old.entry_count(),
            queued = inner.immutables.len() + 1,
            "active memtable rotated"
        );
        inner.immutables.push_back(old);
        Ok(inner)
    }
}
