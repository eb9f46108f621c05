//! Background compaction: priority task queue, worker pool, and the
//! flush / level-merge executors.
//!
//! # Task protocol
//!
//! 1. A trigger fires (memtable sealed, level over budget, manual).
//! 2. [`CompactionScheduler::schedule`] checks the pending set for a
//!    task targeting the same input — the same memtable id, or a file
//!    set overlapping a queued task's — and drops the duplicate trigger.
//! 3. A worker pops the highest-priority task, marks it running, and
//!    executes it under a wall-clock deadline, checking the shutdown
//!    flag and the deadline between I/O steps.
//! 4. Success records bytes read/written; failure records the error in
//!    the stats. A timed-out or failed task unlinks its partial output.
//!
//! # Priorities
//!
//! User-initiated > flush > level-compaction-by-size, FIFO within a
//! priority class.
//!
//! # Success is a system property
//!
//! Two workers can race for one immutable memtable (a manual trigger
//! landing next to an automatic one). The loser's
//! [`remove_specific`](crate::memtable::manager::MemtableManager::remove_specific)
//! comes back `NotFound`, it retracts its own freshly built table, and
//! the task finishes as **already handled — which is not an error**.
//! What must hold is the system-level invariant: one immutable memtable
//! ⇒ exactly one Level-0 table. Tests assert that, never per-task
//! success rates.
//!
//! # Worker health
//!
//! Workers wake at least every 500 ms to observe the shutdown flag.
//! [`CompactionScheduler::probe_workers`] respawns any worker thread
//! that died (panic in foreign code, etc.) while the scheduler runs.

#[cfg(test)]
mod tests;

use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::CompactionConfig;
use crate::engine::utils::{MergeIterator, SurvivorFilter};
use crate::error::ErrorKind;
use crate::levels::{CompactionPick, FileId, LevelManager, LevelsError, TableMeta};
use crate::memtable::manager::{ManagerError, MemtableManager};
use crate::memtable::{Entry, Memtable};
use crate::sstable::{TableBuilder, TableError};

/// Worker dequeue wake-up interval (shutdown observation bound).
const DEQUEUE_WAIT: Duration = Duration::from_millis(500);

/// Target output table size for level merges.
const TARGET_TABLE_BYTES: u64 = 8 * 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors produced while executing a compaction task.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// Error from the level manager.
    #[error("levels error: {0}")]
    Levels(#[from] LevelsError),

    /// Error from the memtable manager.
    #[error("memtable manager error: {0}")]
    Manager(#[from] ManagerError),

    /// Error from a table build or read.
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// The task exceeded its execution deadline.
    #[error("task deadline exceeded")]
    DeadlineExceeded,

    /// Shutdown was requested mid-task.
    #[error("shutdown requested")]
    Shutdown,

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CompactionError {
    /// Maps onto the closed result-code set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Levels(e) => e.kind(),
            Self::Manager(e) => e.kind(),
            Self::Table(e) => e.kind(),
            Self::DeadlineExceeded => ErrorKind::Timeout,
            Self::Shutdown => ErrorKind::Busy,
            Self::Internal(_) => ErrorKind::System,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Tasks
// ------------------------------------------------------------------------------------------------

/// Priority classes, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    /// Manual trigger from the engine API.
    UserInitiated = 0,

    /// Memtable flush to Level 0.
    Flush = 1,

    /// Size-triggered level merge.
    LevelSize = 2,
}

/// What a task does.
pub enum TaskKind {
    /// Build an L0 table from a sealed memtable.
    Flush {
        /// The immutable table (shared with the manager's queue).
        memtable: Arc<Memtable>,
    },

    /// Merge `pick.inputs` + `pick.target_overlaps` into the target
    /// level.
    Level {
        /// The pick decided by the level manager's policy.
        pick: CompactionPick,
    },
}

struct Task {
    priority: TaskPriority,
    /// FIFO tie-break within a priority class.
    submitted: u64,
    kind: TaskKind,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for Task {}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: highest priority (lowest discriminant), then oldest
        // submission first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.submitted.cmp(&self.submitted))
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// How a finished task resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Task did its work.
    Success,

    /// Another worker had already handled the same input. Not an error.
    AlreadyHandled,

    /// Task failed; the error was recorded in the stats.
    Failed,
}

// ------------------------------------------------------------------------------------------------
// Stats
// ------------------------------------------------------------------------------------------------

/// Monotonic counters exposed for monitoring and tests.
#[derive(Debug, Default)]
pub struct CompactionStats {
    /// Tasks that completed their work.
    pub tasks_succeeded: AtomicU64,

    /// Tasks that failed with an error.
    pub tasks_failed: AtomicU64,

    /// Tasks that found their input already handled by a racing worker.
    pub tasks_already_handled: AtomicU64,

    /// Flush tasks among the succeeded.
    pub flushes_completed: AtomicU64,

    /// Level merges among the succeeded.
    pub merges_completed: AtomicU64,

    /// Bytes read from input tables.
    pub bytes_read: AtomicU64,

    /// Bytes written to output tables.
    pub bytes_written: AtomicU64,
}

/// Point-in-time copy of [`CompactionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Tasks that completed their work.
    pub tasks_succeeded: u64,
    /// Tasks that failed with an error.
    pub tasks_failed: u64,
    /// Tasks resolved as already handled.
    pub tasks_already_handled: u64,
    /// Completed flushes.
    pub flushes_completed: u64,
    /// Completed level merges.
    pub merges_completed: u64,
    /// Bytes read from inputs.
    pub bytes_read: u64,
    /// Bytes written to outputs.
    pub bytes_written: u64,
}

impl CompactionStats {
    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_already_handled: self.tasks_already_handled.load(Ordering::Relaxed),
            flushes_completed: self.flushes_completed.load(Ordering::Relaxed),
            merges_completed: self.merges_completed.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Scheduler
// ------------------------------------------------------------------------------------------------

struct QueueState {
    heap: BinaryHeap<Task>,
    /// Memtable ids with a queued or running flush.
    pending_memtables: HashSet<u64>,
    /// File ids involved in a queued or running level task.
    pending_files: HashSet<FileId>,
    submitted: u64,
}

struct Shared {
    queue: Mutex<QueueState>,
    work_ready: Condvar,
    shutdown: AtomicBool,
    stats: CompactionStats,
    config: CompactionConfig,
    memtables: Arc<MemtableManager>,
    levels: Arc<LevelManager>,
}

/// Thread-pooled compaction scheduler. See the [module docs](self).
pub struct CompactionScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CompactionScheduler {
    /// Creates the scheduler and spawns its worker pool.
    pub fn start(
        config: CompactionConfig,
        memtables: Arc<MemtableManager>,
        levels: Arc<LevelManager>,
    ) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                pending_memtables: HashSet::new(),
                pending_files: HashSet::new(),
                submitted: 0,
            }),
            work_ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
            stats: CompactionStats::default(),
            config,
            memtables,
            levels,
        });

        let workers = (0..shared.config.worker_count)
            .map(|i| Self::spawn_worker(Arc::clone(&shared), i))
            .collect();

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Queues a flush for a sealed memtable. A duplicate trigger for a
    /// memtable already queued or running is silently dropped.
    pub fn schedule_flush(&self, memtable: Arc<Memtable>, priority: TaskPriority) {
        let Ok(mut queue) = self.shared.queue.lock() else {
            return;
        };
        if !queue.pending_memtables.insert(memtable.id()) {
            debug!(id = memtable.id(), "duplicate flush trigger dropped");
            return;
        }
        queue.submitted += 1;
        let submitted = queue.submitted;
        queue.heap.push(Task {
            priority,
            submitted,
            kind: TaskKind::Flush { memtable },
        });
        drop(queue);
        self.shared.work_ready.notify_one();
    }

    /// Queues a level merge. A pick whose file set overlaps a queued or
    /// running task's is dropped.
    pub fn schedule_level(&self, pick: CompactionPick, priority: TaskPriority) {
        let Ok(mut queue) = self.shared.queue.lock() else {
            return;
        };
        let ids: Vec<FileId> = pick
            .inputs
            .iter()
            .chain(pick.target_overlaps.iter())
            .map(|m| m.id)
            .collect();
        if ids.iter().any(|id| queue.pending_files.contains(id)) {
            debug!(source = pick.source_level, "overlapping level task dropped");
            return;
        }
        queue.pending_files.extend(ids.iter().copied());
        queue.submitted += 1;
        let submitted = queue.submitted;
        queue.heap.push(Task {
            priority,
            submitted,
            kind: TaskKind::Level { pick },
        });
        drop(queue);
        self.shared.work_ready.notify_one();
    }

    /// Consults the pick policy and queues a level merge when a level is
    /// over budget. Called after flushes and from the maintenance tick.
    pub fn maybe_schedule_level(&self, priority: TaskPriority) {
        let cfg = &self.shared.config;
        match self.shared.levels.pick_compaction(
            cfg.l0_file_limit,
            cfg.level_base_bytes,
            cfg.level_size_ratio,
        ) {
            Ok(Some(pick)) => self.schedule_level(pick, priority),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "compaction pick failed"),
        }
    }

    /// Respawns workers whose threads have died. No-op after shutdown.
    pub fn probe_workers(&self) {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        let Ok(mut workers) = self.workers.lock() else {
            return;
        };
        for i in 0..workers.len() {
            if workers[i].is_finished() {
                warn!(worker = i, "compaction worker died, respawning");
                let dead = std::mem::replace(
                    &mut workers[i],
                    Self::spawn_worker(Arc::clone(&self.shared), i),
                );
                let _ = dead.join();
            }
        }
    }

    /// Number of queued (not yet running) tasks.
    pub fn queued_tasks(&self) -> usize {
        self.shared.queue.lock().map(|q| q.heap.len()).unwrap_or(0)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Signals shutdown and joins every worker. Queued tasks are
    /// abandoned; running tasks observe the flag between I/O steps.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.work_ready.notify_all();
        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                let _ = handle.join();
            }
        }
        info!("compaction scheduler stopped");
    }

    // --------------------------------------------------------------------------------------------
    // Worker loop
    // --------------------------------------------------------------------------------------------

    fn spawn_worker(shared: Arc<Shared>, index: usize) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name(format!("compact-{index}"))
            .spawn(move || worker_loop(&shared))
            .expect("failed to spawn compaction worker")
    }
}

impl Drop for CompactionScheduler {
    fn drop(&mut self) {
        if !self.shared.shutdown.load(Ordering::Acquire) {
            self.shutdown();
        }
    }
}

fn worker_loop(shared: &Shared) {
    while !shared.shutdown.load(Ordering::Acquire) {
        let task = {
            let Ok(mut queue) = shared.queue.lock() else {
                return;
            };
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                if let Some(task) = queue.heap.pop() {
                    break task;
                }
                let Ok((next, _timeout)) = shared.work_ready.wait_timeout(queue, DEQUEUE_WAIT)
                else {
                    return;
                };
                queue = next;
            }
        };

        let deadline = Instant::now() + Duration::from_millis(shared.config.task_timeout_ms);
        let outcome = match &task.kind {
            TaskKind::Flush { memtable } => {
                run_recorded(shared, || execute_flush(shared, memtable, deadline))
            }
            TaskKind::Level { pick } => {
                run_recorded(shared, || execute_level(shared, pick, deadline))
            }
        };

        // Clear dedup keys only after execution so a running task still
        // suppresses duplicate triggers.
        if let Ok(mut queue) = shared.queue.lock() {
            match &task.kind {
                TaskKind::Flush { memtable } => {
                    queue.pending_memtables.remove(&memtable.id());
                }
                TaskKind::Level { pick } => {
                    for meta in pick.inputs.iter().chain(pick.target_overlaps.iter()) {
                        queue.pending_files.remove(&meta.id);
                    }
                }
            }
        }

        if outcome == TaskOutcome::Success
            && matches!(task.kind, TaskKind::Flush { .. })
        {
            // A flush may have pushed L0 over its limit.
            let cfg = &shared.config;
            if let Ok(Some(pick)) = shared.levels.pick_compaction(
                cfg.l0_file_limit,
                cfg.level_base_bytes,
                cfg.level_size_ratio,
            ) {
                schedule_level_internal(shared, pick, TaskPriority::LevelSize);
            }
        }
    }
}

/// Wraps task execution with stats accounting.
fn run_recorded(
    shared: &Shared,
    run: impl FnOnce() -> Result<TaskOutcome, CompactionError>,
) -> TaskOutcome {
    match run() {
        Ok(TaskOutcome::Success) => {
            shared.stats.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
            TaskOutcome::Success
        }
        Ok(TaskOutcome::AlreadyHandled) => {
            shared
                .stats
                .tasks_already_handled
                .fetch_add(1, Ordering::Relaxed);
            TaskOutcome::AlreadyHandled
        }
        Ok(TaskOutcome::Failed) | Err(CompactionError::Shutdown) => {
            shared.stats.tasks_failed.fetch_add(1, Ordering::Relaxed);
            TaskOutcome::Failed
        }
        Err(e) => {
            error!(error = %e, "compaction task failed");
            shared.stats.tasks_failed.fetch_add(1, Ordering::Relaxed);
            TaskOutcome::Failed
        }
    }
}

/// Re-entrant version of `schedule_level` for use inside the worker.
fn schedule_level_internal(shared: &Shared, pick: CompactionPick, priority: TaskPriority) {
    let Ok(mut queue) = shared.queue.lock() else {
        return;
    };
    let ids: Vec<FileId> = pick
        .inputs
        .iter()
        .chain(pick.target_overlaps.iter())
        .map(|m| m.id)
        .collect();
    if ids.iter().any(|id| queue.pending_files.contains(id)) {
        return;
    }
    queue.pending_files.extend(ids.iter().copied());
    queue.submitted += 1;
    let submitted = queue.submitted;
    queue.heap.push(Task {
        priority,
        submitted,
        kind: TaskKind::Level { pick },
    });
    drop(queue);
    shared.work_ready.notify_one();
}

// ------------------------------------------------------------------------------------------------
// Flush execution
// ------------------------------------------------------------------------------------------------

fn check_progress(shared: &Shared, deadline: Instant) -> Result<(), CompactionError> {
    if shared.shutdown.load(Ordering::Acquire) {
        return Err(CompactionError::Shutdown);
    }
    if Instant::now() >= deadline {
        return Err(CompactionError::DeadlineExceeded);
    }
    Ok(())
}

/// Advances the persisted replay watermark after a memtable retired.
///
/// The watermark may only move to a point below which **no live
/// memtable** holds a record: a seq leaves the live set exclusively via
/// `remove_specific`, which runs *after* its table was registered, so
/// everything under the minimum live seq is durably in a table. Flushes
/// completing out of seal order are therefore safe — retiring a newer
/// memtable while an older one is still queued leaves the watermark
/// pinned below the older table's first seq. When nothing is live at
/// all, everything ever written is flushed and the highest table seq is
/// the bound.
fn advance_watermark(shared: &Shared) -> Result<(), CompactionError> {
    let min_live = shared.memtables.min_live_seq()?;
    let to = if min_live == u64::MAX {
        shared.levels.max_flushed_seq()
    } else {
        min_live.saturating_sub(1)
    };
    shared.levels.advance_replay_watermark(to)?;
    Ok(())
}

/// Builds an L0 table from an immutable memtable.
///
/// Commit protocol: build the (unregistered) file, register it with the
/// level manager, claim the memtable via `remove_specific`, then
/// advance the replay watermark. A `NotFound` from the claim means a
/// racing worker already flushed this memtable; we retract our table
/// and report [`TaskOutcome::AlreadyHandled`]. Crash-safety rests on
/// the watermark: WAL records stay replayable until the watermark —
/// which never jumps over an unflushed memtable — passes them.
fn execute_flush(
    shared: &Shared,
    memtable: &Arc<Memtable>,
    deadline: Instant,
) -> Result<TaskOutcome, CompactionError> {
    check_progress(shared, deadline)?;

    let entries = memtable.iter_raw();
    if entries.is_empty() {
        return match shared.memtables.remove_specific(memtable.id()) {
            Ok(()) => {
                advance_watermark(shared)?;
                Ok(TaskOutcome::Success)
            }
            Err(ManagerError::NotFound(_)) => Ok(TaskOutcome::AlreadyHandled),
            Err(e) => Err(e.into()),
        };
    }

    let (file_id, path) = shared.levels.allocate_file(0)?;
    let mut builder = TableBuilder::new(&path, entries.len())?;

    let mut read_bytes = 0u64;
    for entry in &entries {
        if let Err(e) = check_progress(shared, deadline) {
            builder.abandon();
            return Err(e);
        }
        read_bytes += (entry.key.len() + entry.value.as_ref().map_or(0, Vec::len)) as u64;
        if let Err(e) = builder.add(entry) {
            return Err(e.into());
        }
    }

    let props = builder.finish()?;
    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    let meta = TableMeta::from_properties(0, file_id, size, &props);

    shared.levels.add(meta.clone())?;

    match shared.memtables.remove_specific(memtable.id()) {
        Ok(()) => {
            advance_watermark(shared)?;
            shared.stats.bytes_read.fetch_add(read_bytes, Ordering::Relaxed);
            shared.stats.bytes_written.fetch_add(size, Ordering::Relaxed);
            shared.stats.flushes_completed.fetch_add(1, Ordering::Relaxed);
            info!(
                memtable = memtable.id(),
                table = %meta.id,
                entries = meta.entry_count,
                bytes = size,
                "memtable flushed to L0"
            );
            Ok(TaskOutcome::Success)
        }
        Err(ManagerError::NotFound(_)) => {
            // Race lost after the build: retract our table so the system
            // ends at exactly one L0 file per memtable.
            warn!(
                memtable = memtable.id(),
                table = %meta.id,
                "flush already handled by racing worker, retracting table"
            );
            shared.levels.apply_compaction(&[meta], Vec::new())?;
            Ok(TaskOutcome::AlreadyHandled)
        }
        Err(e) => Err(e.into()),
    }
}

// ------------------------------------------------------------------------------------------------
// Level merge execution
// ------------------------------------------------------------------------------------------------

/// Merge-sorts the picked inputs into the target level.
///
/// Outputs are split at a byte target; the file swap in the level
/// manager is atomic (metadata first, file deletion after).
fn execute_level(
    shared: &Shared,
    pick: &CompactionPick,
    deadline: Instant,
) -> Result<TaskOutcome, CompactionError> {
    check_progress(shared, deadline)?;

    // Stale-pick check: every input must still be tracked (a racing
    // merge may have consumed it).
    let current_source = shared.levels.files(pick.source_level)?;
    let current_target = shared.levels.files(pick.target_level)?;
    let still_tracked = |meta: &TableMeta, files: &[TableMeta]| {
        files.iter().any(|m| m.id == meta.id)
    };
    if !pick.inputs.iter().all(|m| still_tracked(m, &current_source))
        || !pick
            .target_overlaps
            .iter()
            .all(|m| still_tracked(m, &current_target))
    {
        debug!(source = pick.source_level, "stale compaction pick dropped");
        return Ok(TaskOutcome::AlreadyHandled);
    }

    // Tombstones can only be dropped when nothing exists below the
    // target level for them to shadow.
    let deepest_populated = (0..shared.levels.level_count() as u32)
        .filter(|&l| {
            !shared
                .levels
                .files(l)
                .map(|f| f.is_empty())
                .unwrap_or(true)
        })
        .max()
        .unwrap_or(0);
    let drop_tombstones = pick.target_level >= deepest_populated;

    // Load inputs. Newer data must come first in the merge: source level
    // is above the target, and L0 files are ordered newest-first.
    let mut inputs: Vec<TableMeta> = pick.inputs.clone();
    inputs.sort_by(|a, b| b.max_seq.cmp(&a.max_seq));
    inputs.extend(pick.target_overlaps.iter().cloned());

    let mut bytes_read = 0u64;
    let mut sources: Vec<Box<dyn Iterator<Item = Entry>>> = Vec::with_capacity(inputs.len());
    for meta in &inputs {
        check_progress(shared, deadline)?;
        let table = match shared.levels.table(meta) {
            Ok(t) => t,
            Err(LevelsError::Table(TableError::ChecksumMismatch)) => {
                shared.levels.quarantine(meta.id);
                return Err(CompactionError::Table(TableError::ChecksumMismatch));
            }
            Err(e) => return Err(e.into()),
        };
        bytes_read += table.file_size();
        // Materialise per input: merge inputs are bounded by the pick,
        // and owning the entries sidesteps borrowing the Arc in the
        // boxed iterator.
        let mut entries = Vec::with_capacity(table.properties.entry_count as usize);
        for item in table.iter() {
            match item {
                Ok(entry) => entries.push(entry),
                Err(TableError::ChecksumMismatch) => {
                    shared.levels.quarantine(meta.id);
                    return Err(CompactionError::Table(TableError::ChecksumMismatch));
                }
                Err(e) => return Err(e.into()),
            }
        }
        sources.push(Box::new(entries.into_iter()));
    }

    let merged = SurvivorFilter::new(MergeIterator::new(sources), drop_tombstones);

    // Emit outputs, rolling to a new table at the byte target.
    let mut added: Vec<TableMeta> = Vec::new();
    let mut builder: Option<(FileId, std::path::PathBuf, TableBuilder, u64)> = None;
    let mut bytes_written = 0u64;

    let result: Result<(), CompactionError> = (|| {
        for entry in merged {
            check_progress(shared, deadline)?;
            if builder.is_none() {
                let (id, path) = shared.levels.allocate_file(pick.target_level)?;
                let b = TableBuilder::new(&path, 1024)?;
                builder = Some((id, path, b, 0));
            }
            let (_, _, b, approx) = builder.as_mut().ok_or_else(|| {
                CompactionError::Internal("builder missing after init".into())
            })?;
            b.add(&entry)?;
            *approx += (entry.key.len() + entry.value.as_ref().map_or(0, Vec::len) + 16) as u64;

            if *approx >= TARGET_TABLE_BYTES {
                let (id, path, b, _) = builder.take().ok_or_else(|| {
                    CompactionError::Internal("builder missing at roll".into())
                })?;
                let props = b.finish()?;
                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                bytes_written += size;
                added.push(TableMeta::from_properties(pick.target_level, id, size, &props));
            }
        }
        if let Some((id, path, b, _)) = builder.take() {
            let props = b.finish()?;
            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            bytes_written += size;
            added.push(TableMeta::from_properties(pick.target_level, id, size, &props));
        }
        Ok(())
    })();

    if let Err(e) = result {
        // Unwind: abandon the open builder and unlink finished outputs
        // that were never registered.
        if let Some((_, _, b, _)) = builder.take() {
            b.abandon();
        }
        for meta in &added {
            let path = shared
                .levels
                .sst_dir()
                .join(crate::levels::table_file_name(meta.level, meta.id));
            let _ = std::fs::remove_file(path);
        }
        return Err(e);
    }

    let removed: Vec<TableMeta> = pick
        .inputs
        .iter()
        .chain(pick.target_overlaps.iter())
        .cloned()
        .collect();
    shared.levels.apply_compaction(&removed, added.clone())?;

    shared.stats.bytes_read.fetch_add(bytes_read, Ordering::Relaxed);
    shared
        .stats
        .bytes_written
        .fetch_add(bytes_written, Ordering::Relaxed);
    shared.stats.merges_completed.fetch_add(1, Ordering::Relaxed);
    info!(
        source = pick.source_level,
        target = pick.target_level,
        inputs = removed.len(),
        outputs = added.len(),
        bytes_read,
        bytes_written,
        "level compaction applied"
    );
    Ok(TaskOutcome::Success)
}
