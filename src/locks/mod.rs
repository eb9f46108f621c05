//! Segmented reader/writer locks with timeouts and deadlock detection.
//!
//! The key space is partitioned into a fixed number of **segments** by
//! xxh3 hash. Each segment carries reader/writer semantics built on a
//! `Mutex` + `Condvar` pair, which lets us do two things `std::sync::RwLock`
//! cannot: bound every acquisition with an **absolute deadline**, and
//! record which threads hold a segment so the optional deadlock detector
//! can walk wait-for edges.
//!
//! # Ordering discipline
//!
//! Any code path that needs more than one segment must acquire them in
//! ascending segment-id order. [`SegmentedLockManager::multi_lock`]
//! enforces this by sorting and deduplicating the segment set before
//! acquisition, so two callers locking overlapping key sets can never
//! deadlock against each other.
//!
//! # Timeout semantics
//!
//! Deadlines are absolute: a retry loop waking up repeatedly on the
//! condvar never extends the caller's bound. Expiry surfaces
//! [`LockError::Timeout`].
//!
//! # Deadlock detection
//!
//! When enabled, a wait-for graph (waiting thread → holding threads) is
//! maintained while threads block. Before each wait the would-be waiter
//! checks whether adding its edges closes a cycle; if so it backs off
//! immediately with [`LockError::Deadlock`] instead of blocking.

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{trace, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::ErrorKind;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by lock acquisition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    /// The absolute deadline elapsed before the segment became free.
    #[error("lock acquisition timed out after {0:?}")]
    Timeout(Duration),

    /// Blocking would have closed a wait-for cycle; this waiter was
    /// chosen as the victim and holds nothing.
    #[error("deadlock detected on segment {0}")]
    Deadlock(usize),

    /// Internal invariant violation (poisoned mutex).
    #[error("internal error: {0}")]
    Internal(String),
}

impl LockError {
    /// Maps onto the closed result-code set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Deadlock(_) => ErrorKind::Deadlock,
            Self::Internal(_) => ErrorKind::Lock,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Lock mode
// ------------------------------------------------------------------------------------------------

/// Acquisition mode for a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared access; excludes writers only.
    Read,
    /// Exclusive access.
    Write,
}

// ------------------------------------------------------------------------------------------------
// Segment state
// ------------------------------------------------------------------------------------------------

struct SegState {
    /// Threads currently holding shared access.
    readers: HashSet<ThreadId>,

    /// Thread currently holding exclusive access, if any.
    writer: Option<ThreadId>,
}

impl SegState {
    fn holders(&self) -> Vec<ThreadId> {
        match self.writer {
            Some(w) => vec![w],
            None => self.readers.iter().copied().collect(),
        }
    }

    fn grantable(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Read => self.writer.is_none(),
            LockMode::Write => self.writer.is_none() && self.readers.is_empty(),
        }
    }

    fn grant(&mut self, mode: LockMode, me: ThreadId) {
        match mode {
            LockMode::Read => {
                self.readers.insert(me);
            }
            LockMode::Write => self.writer = Some(me),
        }
    }
}

struct Segment {
    state: Mutex<SegState>,
    cond: Condvar,
}

impl Segment {
    fn new() -> Self {
        Self {
            state: Mutex::new(SegState {
                readers: HashSet::new(),
                writer: None,
            }),
            cond: Condvar::new(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Deadlock detector
// ------------------------------------------------------------------------------------------------

/// Wait-for graph over blocked threads.
///
/// Edges point from a waiting thread to the threads currently holding
/// the segment it wants. A cycle reachable from the waiter means every
/// thread on the cycle is blocked on another cycle member — a deadlock.
struct WaitForGraph {
    edges: HashMap<ThreadId, HashSet<ThreadId>>,
}

impl WaitForGraph {
    fn new() -> Self {
        Self {
            edges: HashMap::new(),
        }
    }

    /// Would `waiter → holders` close a cycle back to `waiter`?
    fn creates_cycle(&self, waiter: ThreadId, holders: &[ThreadId]) -> bool {
        let mut stack: Vec<ThreadId> = holders.to_vec();
        let mut seen: HashSet<ThreadId> = HashSet::new();
        while let Some(t) = stack.pop() {
            if t == waiter {
                return true;
            }
            if !seen.insert(t) {
                continue;
            }
            if let Some(next) = self.edges.get(&t) {
                stack.extend(next.iter().copied());
            }
        }
        false
    }

    fn add(&mut self, waiter: ThreadId, holders: &[ThreadId]) {
        self.edges
            .entry(waiter)
            .or_default()
            .extend(holders.iter().copied());
    }

    fn remove(&mut self, waiter: ThreadId) {
        self.edges.remove(&waiter);
    }
}

// ------------------------------------------------------------------------------------------------
// Manager
// ------------------------------------------------------------------------------------------------

/// Key-hash-partitioned RW lock set. See the [module docs](self).
pub struct SegmentedLockManager {
    segments: Vec<Segment>,
    graph: Option<Mutex<WaitForGraph>>,
    default_timeout: Duration,
}

impl SegmentedLockManager {
    /// Creates a manager with `segments` partitions.
    ///
    /// `deadlock_detection` enables the wait-for graph; production
    /// configurations can turn it off to shed the bookkeeping.
    pub fn new(segments: usize, default_timeout: Duration, deadlock_detection: bool) -> Self {
        let count = segments.max(1);
        Self {
            segments: (0..count).map(|_| Segment::new()).collect(),
            graph: deadlock_detection.then(|| Mutex::new(WaitForGraph::new())),
            default_timeout,
        }
    }

    /// Number of partitions.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// The segment covering `key`.
    pub fn segment_of(&self, key: &[u8]) -> usize {
        (xxh3_64(key) % self.segments.len() as u64) as usize
    }

    /// Acquires the segment covering `key` in `mode`.
    ///
    /// `timeout = None` uses the manager default. Returns a guard that
    /// releases on drop.
    pub fn lock(
        &self,
        key: &[u8],
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> Result<SegmentGuard<'_>, LockError> {
        let seg = self.segment_of(key);
        let deadline = Instant::now() + timeout.unwrap_or(self.default_timeout);
        self.acquire(seg, mode, deadline)?;
        Ok(SegmentGuard {
            manager: self,
            segment: seg,
            mode,
        })
    }

    /// Acquires every segment covering `keys` in `mode`.
    ///
    /// Segment ids are sorted ascending and deduplicated before
    /// acquisition — the global ordering that makes overlapping
    /// multi-key callers deadlock-free. All acquisitions share one
    /// absolute deadline; on any failure the segments already taken are
    /// released before the error is returned.
    pub fn multi_lock(
        &self,
        keys: &[&[u8]],
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> Result<MultiGuard<'_>, LockError> {
        let mut ids: Vec<usize> = keys.iter().map(|k| self.segment_of(k)).collect();
        ids.sort_unstable();
        ids.dedup();

        let deadline = Instant::now() + timeout.unwrap_or(self.default_timeout);
        let mut taken = Vec::with_capacity(ids.len());

        for &seg in &ids {
            if let Err(e) = self.acquire(seg, mode, deadline) {
                for &held in taken.iter().rev() {
                    self.release(held, mode);
                }
                return Err(e);
            }
            taken.push(seg);
        }

        trace!(segments = ?taken, ?mode, "multi_lock acquired");
        Ok(MultiGuard {
            manager: self,
            segments: taken,
            mode,
        })
    }

    // --------------------------------------------------------------------------------------------
    // Core acquire / release
    // --------------------------------------------------------------------------------------------

    fn acquire(&self, seg: usize, mode: LockMode, deadline: Instant) -> Result<(), LockError> {
        let me = thread::current().id();
        let segment = &self.segments[seg];

        let mut state = segment
            .state
            .lock()
            .map_err(|_| LockError::Internal("segment mutex poisoned".into()))?;

        loop {
            if state.grantable(mode) {
                state.grant(mode, me);
                return Ok(());
            }

            // Register wait-for edges and probe for a cycle before
            // blocking. The victim is the thread that would have closed
            // the cycle — it holds nothing on this segment yet, so
            // backing off is free.
            if let Some(graph) = &self.graph {
                let holders = state.holders();
                let mut g = graph
                    .lock()
                    .map_err(|_| LockError::Internal("wait-for graph poisoned".into()))?;
                if g.creates_cycle(me, &holders) {
                    warn!(segment = seg, "lock wait-for cycle detected, backing off");
                    return Err(LockError::Deadlock(seg));
                }
                g.add(me, &holders);
            }

            let now = Instant::now();
            if now >= deadline {
                self.clear_wait_edges(me);
                return Err(LockError::Timeout(Duration::ZERO));
            }

            let (next, timed_out) = segment
                .cond
                .wait_timeout(state, deadline - now)
                .map_err(|_| LockError::Internal("segment mutex poisoned".into()))?;
            state = next;
            self.clear_wait_edges(me);

            if timed_out.timed_out() && !state.grantable(mode) {
                return Err(LockError::Timeout(deadline.saturating_duration_since(now)));
            }
        }
    }

    fn clear_wait_edges(&self, me: ThreadId) {
        if let Some(graph) = &self.graph
            && let Ok(mut g) = graph.lock()
        {
            g.remove(me);
        }
    }

    fn release(&self, seg: usize, mode: LockMode) {
        let me = thread::current().id();
        let segment = &self.segments[seg];
        if let Ok(mut state) = segment.state.lock() {
            match mode {
                LockMode::Read => {
                    state.readers.remove(&me);
                }
                LockMode::Write => {
                    debug_assert_eq!(state.writer, Some(me));
                    state.writer = None;
                }
            }
            segment.cond.notify_all();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Guards
// ------------------------------------------------------------------------------------------------

/// RAII guard for a single locked segment.
pub struct SegmentGuard<'a> {
    manager: &'a SegmentedLockManager,
    segment: usize,
    mode: LockMode,
}

impl SegmentGuard<'_> {
    /// Segment id held by this guard.
    pub fn segment(&self) -> usize {
        self.segment
    }
}

impl Drop for SegmentGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(self.segment, self.mode);
    }
}

/// RAII guard for a sorted set of locked segments.
pub struct MultiGuard<'a> {
    manager: &'a SegmentedLockManager,
    segments: Vec<usize>,
    mode: LockMode,
}

impl MultiGuard<'_> {
    /// Segment ids held, in acquisition (ascending) order.
    pub fn segments(&self) -> &[usize] {
        &self.segments
    }
}

impl Drop for MultiGuard<'_> {
    fn drop(&mut self) {
        // Release in reverse acquisition order.
        for &seg in self.segments.iter().rev() {
            self.manager.release(seg, self.mode);
        }
    }
}
