//! Level metadata, file-id allocation, and the manifest.
//!
//! The level manager is the single owner of every SSTable the engine
//! knows about. Readers and compaction workers borrow `Arc<Table>`
//! handles; a table file is deleted only after it has been removed from
//! the level metadata, so no borrower can observe a vanishing file.
//!
//! # Level invariants
//!
//! - **Level 0** files come from independent memtable flushes and may
//!   overlap each other; reads consult them newest-first (by max seq).
//! - **Level N ≥ 1** files have pairwise disjoint key ranges, so at most
//!   one file per level can contain a given key.
//!
//! # File ids
//!
//! A [`FileId`] combines a monotonic counter, the allocating thread id,
//! and a microsecond timestamp. Two workers *can* still collide under a
//! coarse clock, so allocation reserves the filename with `create_new`
//! and retries with a fresh id on `AlreadyExists` — the collision is
//! detected at the filesystem, not assumed away.
//!
//! # Manifest
//!
//! All level metadata plus the id counter and the **replay watermark**
//! is snapshotted to `<data_dir>/manifest`: encoded with a trailing
//! CRC32, written to `manifest.tmp`, then atomically renamed. Every
//! metadata mutation persists before it is visible to callers. A
//! corrupt manifest fails open — silent reset would orphan data.
//!
//! # Replay watermark
//!
//! Recovery must not trust "highest seq in any table" as a low-water
//! mark: flush workers register tables concurrently, so a *newer*
//! memtable's table can land before an older one's. The manifest
//! therefore carries an explicit [`replay_watermark`](LevelManager::replay_watermark)
//! that only the flush path advances — and only to a point below which
//! **no live memtable** holds a record, i.e. every record at or below
//! it is in a registered table. WAL records above the watermark are
//! replayed on open; re-replaying a record that also made it into a
//! table is harmless (same key, same seq), losing one is not.
//!
//! # Quarantine
//!
//! A table that fails a checksum on read is quarantined: excluded from
//! reads and compaction picks until restart. The file stays on disk for
//! inspection.

#[cfg(test)]
pub(crate) mod tests;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::error::{self, ErrorKind};
use crate::sstable::{Table, TableError, TableProperties};
use crate::util::{now_micros, ranges_overlap, thread_num};

/// Subdirectory for table files.
pub const SST_DIR: &str = "sst";

/// Manifest filename.
pub const MANIFEST_NAME: &str = "manifest";

const MANIFEST_MAGIC: [u8; 4] = *b"CMAN";
const MANIFEST_VERSION: u16 = 1;

/// Attempts before file-id allocation gives up.
const ID_ALLOC_ATTEMPTS: usize = 8;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by the level manager.
#[derive(Debug, Error)]
pub enum LevelsError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Error surfaced while opening or reading a table.
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// Manifest failed validation.
    #[error("corrupt manifest: {0}")]
    CorruptManifest(String),

    /// A manifest-listed table file is missing on disk.
    #[error("table file missing: {0}")]
    MissingFile(String),

    /// The referenced table is not tracked at that level.
    #[error("table {0} not found in level {1}")]
    NotFound(FileId, u32),

    /// File-id allocation kept colliding.
    #[error("file-id allocation exhausted after {0} attempts")]
    IdExhausted(usize),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LevelsError {
    /// Maps onto the closed result-code set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) => error::io_kind(e),
            Self::Encoding(_) | Self::CorruptManifest(_) => ErrorKind::Corrupted,
            Self::Table(e) => e.kind(),
            Self::MissingFile(_) | Self::NotFound(_, _) => ErrorKind::NotFound,
            Self::IdExhausted(_) => ErrorKind::Exist,
            Self::Internal(_) => ErrorKind::System,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FileId
// ------------------------------------------------------------------------------------------------

/// Globally unique table file identity: monotonic counter, creating
/// thread, microsecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId {
    /// Monotonic allocation counter (primary uniqueness).
    pub counter: u64,

    /// Numeric id of the allocating thread.
    pub tid: u64,

    /// Allocation time, microseconds since the UNIX epoch.
    pub micros: u64,
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.counter, self.tid, self.micros)
    }
}

impl Encode for FileId {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.counter.encode_to(buf)?;
        self.tid.encode_to(buf)?;
        self.micros.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for FileId {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (counter, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (tid, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (micros, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                counter,
                tid,
                micros,
            },
            off,
        ))
    }
}

/// Table filename for an id at a level: `level-<lvl>-<id>-<tid>-<ts>.sst`.
pub fn table_file_name(level: u32, id: FileId) -> String {
    format!("level-{level}-{id}.sst")
}

// ------------------------------------------------------------------------------------------------
// TableMeta
// ------------------------------------------------------------------------------------------------

/// Metadata the manager tracks per table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    /// Level this file belongs to.
    pub level: u32,

    /// Unique file identity.
    pub id: FileId,

    /// Smallest key in the file.
    pub min_key: Vec<u8>,

    /// Largest key in the file.
    pub max_key: Vec<u8>,

    /// Surviving entries (tombstones included).
    pub entry_count: u64,

    /// File size in bytes.
    pub size_bytes: u64,

    /// Smallest seq in the file.
    pub min_seq: u64,

    /// Largest seq in the file (L0 read ordering).
    pub max_seq: u64,

    /// Creation time, microseconds since the UNIX epoch.
    pub created_micros: u64,
}

impl TableMeta {
    /// Builds metadata from a finished table's properties.
    pub fn from_properties(level: u32, id: FileId, size_bytes: u64, props: &TableProperties) -> Self {
        Self {
            level,
            id,
            min_key: props.min_key.clone(),
            max_key: props.max_key.clone(),
            entry_count: props.entry_count,
            size_bytes,
            min_seq: props.min_seq,
            max_seq: props.max_seq,
            created_micros: props.created_micros,
        }
    }

    /// Whether `key` falls inside this file's key range.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.min_key.as_slice() <= key && key <= self.max_key.as_slice()
    }
}

impl Encode for TableMeta {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.level.encode_to(buf)?;
        self.id.encode_to(buf)?;
        self.min_key.encode_to(buf)?;
        self.max_key.encode_to(buf)?;
        self.entry_count.encode_to(buf)?;
        self.size_bytes.encode_to(buf)?;
        self.min_seq.encode_to(buf)?;
        self.max_seq.encode_to(buf)?;
        self.created_micros.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for TableMeta {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (level, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (id, n) = FileId::decode_from(&buf[off..])?;
        off += n;
        let (min_key, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (max_key, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (entry_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (size_bytes, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (max_seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (created_micros, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                level,
                id,
                min_key,
                max_key,
                entry_count,
                size_bytes,
                min_seq,
                max_seq,
                created_micros,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Compaction pick
// ------------------------------------------------------------------------------------------------

/// A compaction the pick policy decided on.
#[derive(Debug, Clone)]
pub struct CompactionPick {
    /// Level the inputs come from.
    pub source_level: u32,

    /// Source-level input files.
    pub inputs: Vec<TableMeta>,

    /// Level the merged output lands in.
    pub target_level: u32,

    /// Target-level files overlapping the inputs' key range (merged in).
    pub target_overlaps: Vec<TableMeta>,
}

// ------------------------------------------------------------------------------------------------
// LevelManager
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
struct LevelsState {
    /// Per-level file lists; index 0 is L0.
    levels: Vec<Vec<TableMeta>>,

    /// Contiguous recovery low-water mark: every record with
    /// `seq <= replay_watermark` is in a registered table AND absent
    /// from every live memtable. Monotonic; persisted.
    replay_watermark: u64,

    /// Ids excluded from reads and picks after checksum failures.
    quarantined: HashSet<FileId>,

    /// Lazily opened readers, keyed by id.
    open: HashMap<FileId, Arc<Table>>,
}

/// Owns level metadata and every table file. See the [module docs](self).
#[derive(Debug)]
pub struct LevelManager {
    sst_dir: PathBuf,
    manifest_path: PathBuf,
    state: RwLock<LevelsState>,
    id_counter: AtomicU64,
}

impl LevelManager {
    /// Opens the manager under `data_dir`, loading the manifest if one
    /// exists and sweeping orphan `.sst` / `.tmp` files.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, LevelsError> {
        let data_dir = data_dir.as_ref();
        let sst_dir = data_dir.join(SST_DIR);
        fs::create_dir_all(&sst_dir)?;
        let manifest_path = data_dir.join(MANIFEST_NAME);

        let (levels, next_counter, replay_watermark) = if manifest_path.exists() {
            Self::load_manifest(&manifest_path)?
        } else {
            (Vec::new(), 1, 0)
        };

        // Every listed file must exist; orphans (crash leftovers) are
        // swept.
        let mut listed: HashSet<String> = HashSet::new();
        for meta in levels.iter().flatten() {
            let name = table_file_name(meta.level, meta.id);
            if !sst_dir.join(&name).is_file() {
                return Err(LevelsError::MissingFile(name));
            }
            listed.insert(name);
        }
        for entry in fs::read_dir(&sst_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let is_table = name.ends_with(".sst");
            let is_partial = name.ends_with(".tmp");
            if (is_table && !listed.contains(name)) || is_partial {
                warn!(file = name, "removing orphan table file");
                let _ = fs::remove_file(entry.path());
            }
        }

        info!(
            dir = %sst_dir.display(),
            levels = levels.len(),
            files = levels.iter().map(Vec::len).sum::<usize>(),
            replay_watermark,
            "level manager opened"
        );

        Ok(Self {
            sst_dir,
            manifest_path,
            state: RwLock::new(LevelsState {
                levels,
                replay_watermark,
                quarantined: HashSet::new(),
                open: HashMap::new(),
            }),
            id_counter: AtomicU64::new(next_counter),
        })
    }

    /// Directory that holds the table files.
    pub fn sst_dir(&self) -> &Path {
        &self.sst_dir
    }

    /// Allocates a fresh file id for `level` and reserves its filename.
    ///
    /// The reservation (`create_new`) is what detects id collisions
    /// between workers racing under a coarse clock; on `AlreadyExists`
    /// a new id is drawn and the loop retries.
    pub fn allocate_file(&self, level: u32) -> Result<(FileId, PathBuf), LevelsError> {
        for _ in 0..ID_ALLOC_ATTEMPTS {
            let id = FileId {
                counter: self.id_counter.fetch_add(1, Ordering::SeqCst),
                tid: thread_num(),
                micros: now_micros(),
            };
            let path = self.sst_dir.join(table_file_name(level, id));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_reservation) => return Ok((id, path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    warn!(%id, level, "file-id collision, retrying allocation");
                    continue;
                }
                Err(e) => return Err(LevelsError::Io(e)),
            }
        }
        Err(LevelsError::IdExhausted(ID_ALLOC_ATTEMPTS))
    }

    /// Registers a newly built table and persists the manifest.
    pub fn add(&self, meta: TableMeta) -> Result<(), LevelsError> {
        let mut state = self.write_state()?;
        let level = meta.level as usize;
        while state.levels.len() <= level {
            state.levels.push(Vec::new());
        }
        debug!(id = %meta.id, level = meta.level, entries = meta.entry_count, "table registered");
        state.levels[level].push(meta);
        self.persist(&state)
    }

    /// Atomically swaps `removed` for `added` (a compaction commit),
    /// persists the manifest, then deletes the retired files.
    pub fn apply_compaction(
        &self,
        removed: &[TableMeta],
        added: Vec<TableMeta>,
    ) -> Result<(), LevelsError> {
        let mut state = self.write_state()?;

        for meta in removed {
            let level = meta.level as usize;
            let files = state
                .levels
                .get_mut(level)
                .ok_or(LevelsError::NotFound(meta.id, meta.level))?;
            let before = files.len();
            files.retain(|m| m.id != meta.id);
            if files.len() == before {
                return Err(LevelsError::NotFound(meta.id, meta.level));
            }
            state.open.remove(&meta.id);
        }
        for meta in added {
            let level = meta.level as usize;
            while state.levels.len() <= level {
                state.levels.push(Vec::new());
            }
            state.levels[level].push(meta);
        }

        self.persist(&state)?;

        // Metadata is durable; retired files can go.
        for meta in removed {
            let path = self.sst_dir.join(table_file_name(meta.level, meta.id));
            if let Err(e) = fs::remove_file(&path) {
                warn!(id = %meta.id, error = %e, "failed to delete retired table file");
            }
        }
        Ok(())
    }

    /// Files at `level` (unquarantined), in registration order.
    pub fn files(&self, level: u32) -> Result<Vec<TableMeta>, LevelsError> {
        let state = self.read_state()?;
        Ok(state
            .levels
            .get(level as usize)
            .map(|files| {
                files
                    .iter()
                    .filter(|m| !state.quarantined.contains(&m.id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Files at `level` overlapping `[min_key, max_key]`.
    pub fn overlap(
        &self,
        level: u32,
        min_key: &[u8],
        max_key: &[u8],
    ) -> Result<Vec<TableMeta>, LevelsError> {
        Ok(self
            .files(level)?
            .into_iter()
            .filter(|m| ranges_overlap(&m.min_key, &m.max_key, min_key, max_key))
            .collect())
    }

    /// Number of levels with at least one file.
    pub fn level_count(&self) -> usize {
        self.read_state().map(|s| s.levels.len()).unwrap_or(0)
    }

    /// Total bytes at `level`.
    pub fn level_bytes(&self, level: u32) -> u64 {
        self.files(level)
            .map(|files| files.iter().map(|m| m.size_bytes).sum())
            .unwrap_or(0)
    }

    /// The ordered list of tables a point read must consult for `key`:
    /// L0 files containing it (newest first by max seq), then the single
    /// overlapping file per deeper level.
    pub fn read_path(&self, key: &[u8]) -> Result<Vec<(TableMeta, Arc<Table>)>, LevelsError> {
        let mut metas: Vec<TableMeta> = Vec::new();

        let mut l0: Vec<TableMeta> = self
            .files(0)?
            .into_iter()
            .filter(|m| m.contains(key))
            .collect();
        l0.sort_by(|a, b| b.max_seq.cmp(&a.max_seq));
        metas.extend(l0);

        for level in 1..self.level_count() as u32 {
            for meta in self.files(level)? {
                if meta.contains(key) {
                    metas.push(meta);
                    break; // disjoint ranges: at most one per level
                }
            }
        }

        let mut out = Vec::with_capacity(metas.len());
        for meta in metas {
            let table = self.table(&meta)?;
            out.push((meta, table));
        }
        Ok(out)
    }

    /// Opens (or returns the cached) reader for a tracked table.
    pub fn table(&self, meta: &TableMeta) -> Result<Arc<Table>, LevelsError> {
        {
            let state = self.read_state()?;
            if let Some(t) = state.open.get(&meta.id) {
                return Ok(Arc::clone(t));
            }
        }
        let path = self.sst_dir.join(table_file_name(meta.level, meta.id));
        let table = Arc::new(Table::open(&path)?);
        let mut state = self.write_state()?;
        let entry = state
            .open
            .entry(meta.id)
            .or_insert_with(|| Arc::clone(&table));
        Ok(Arc::clone(entry))
    }

    /// Excludes a table from reads and picks after a checksum failure.
    pub fn quarantine(&self, id: FileId) {
        if let Ok(mut state) = self.state.write() {
            warn!(%id, "table quarantined after checksum failure");
            state.quarantined.insert(id);
            state.open.remove(&id);
        }
    }

    /// Decides whether any level needs compaction.
    ///
    /// L0 compacts on file count; deeper levels compact on total size
    /// against `base * ratio^N`, choosing the file whose key range
    /// overlaps the smallest slice of the successor level.
    pub fn pick_compaction(
        &self,
        l0_file_limit: usize,
        level_base_bytes: u64,
        level_size_ratio: u64,
    ) -> Result<Option<CompactionPick>, LevelsError> {
        let l0 = self.files(0)?;
        if l0.len() >= l0_file_limit {
            let min_key = l0.iter().map(|m| m.min_key.clone()).min().unwrap_or_default();
            let max_key = l0.iter().map(|m| m.max_key.clone()).max().unwrap_or_default();
            let target_overlaps = self.overlap(1, &min_key, &max_key)?;
            return Ok(Some(CompactionPick {
                source_level: 0,
                inputs: l0,
                target_level: 1,
                target_overlaps,
            }));
        }

        for level in 1..self.level_count() as u32 {
            let budget = level_base_bytes.saturating_mul(level_size_ratio.saturating_pow(level));
            if self.level_bytes(level) <= budget {
                continue;
            }
            let files = self.files(level)?;
            // Pick the file dragging in the least successor data.
            let mut best: Option<(u64, TableMeta, Vec<TableMeta>)> = None;
            for meta in files {
                let overlaps = self.overlap(level + 1, &meta.min_key, &meta.max_key)?;
                let cost: u64 = overlaps.iter().map(|m| m.size_bytes).sum();
                match &best {
                    Some((best_cost, _, _)) if *best_cost <= cost => {}
                    _ => best = Some((cost, meta, overlaps)),
                }
            }
            if let Some((_, input, target_overlaps)) = best {
                return Ok(Some(CompactionPick {
                    source_level: level,
                    inputs: vec![input],
                    target_level: level + 1,
                    target_overlaps,
                }));
            }
        }
        Ok(None)
    }

    /// Highest seq present in any table.
    ///
    /// This is **not** a recovery low-water mark — flushes register out
    /// of seal order, so seqs below this value may still be unflushed.
    /// Recovery uses [`LevelManager::replay_watermark`] instead.
    pub fn max_flushed_seq(&self) -> u64 {
        self.read_state()
            .map(|s| {
                s.levels
                    .iter()
                    .flatten()
                    .map(|m| m.max_seq)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// The persisted, contiguous recovery low-water mark: every record
    /// with `seq <=` this value is durably in a registered table. WAL
    /// replay starts just above it.
    pub fn replay_watermark(&self) -> u64 {
        self.read_state().map(|s| s.replay_watermark).unwrap_or(0)
    }

    /// Advances the replay watermark to `to` and persists the manifest.
    ///
    /// Monotonic: a lower `to` (a flush worker that lost the
    /// compute-then-advance race) is a no-op. Callers must only pass a
    /// point below which no live memtable holds a record — the flush
    /// path derives it from the memtable manager's minimum live seq
    /// *after* its table is registered and its memtable retired.
    pub fn advance_replay_watermark(&self, to: u64) -> Result<(), LevelsError> {
        let mut state = self.write_state()?;
        if to <= state.replay_watermark {
            return Ok(());
        }
        debug!(from = state.replay_watermark, to, "replay watermark advanced");
        state.replay_watermark = to;
        self.persist(&state)
    }

    /// Per-level `(file_count, byte_total)` pairs.
    pub fn level_stats(&self) -> Vec<(usize, u64)> {
        self.read_state()
            .map(|s| {
                s.levels
                    .iter()
                    .map(|files| (files.len(), files.iter().map(|m| m.size_bytes).sum()))
                    .collect()
            })
            .unwrap_or_default()
    }

    // --------------------------------------------------------------------------------------------
    // Manifest persistence
    // --------------------------------------------------------------------------------------------

    fn persist(&self, state: &LevelsState) -> Result<(), LevelsError> {
        let mut buf = Vec::new();
        MANIFEST_MAGIC.encode_to(&mut buf)?;
        MANIFEST_VERSION.encode_to(&mut buf)?;
        self.id_counter.load(Ordering::SeqCst).encode_to(&mut buf)?;
        state.replay_watermark.encode_to(&mut buf)?;
        (state.levels.len() as u32).encode_to(&mut buf)?;
        for files in &state.levels {
            encoding::encode_vec(files, &mut buf)?;
        }
        let mut hasher = Crc32::new();
        hasher.update(&buf);
        hasher.finalize().encode_to(&mut buf)?;

        let tmp = self.manifest_path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        fs::rename(&tmp, &self.manifest_path)?;
        Ok(())
    }

    fn load_manifest(path: &Path) -> Result<(Vec<Vec<TableMeta>>, u64, u64), LevelsError> {
        let bytes = fs::read(path)?;
        if bytes.len() < 4 {
            return Err(LevelsError::CorruptManifest("file too short".into()));
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes(
            crc_bytes
                .try_into()
                .map_err(|_| LevelsError::CorruptManifest("short checksum".into()))?,
        );
        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != stored {
            return Err(LevelsError::CorruptManifest("checksum mismatch".into()));
        }

        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&body[off..])?;
        off += n;
        if magic != MANIFEST_MAGIC {
            return Err(LevelsError::CorruptManifest("bad magic".into()));
        }
        let (version, n) = u16::decode_from(&body[off..])?;
        off += n;
        if version != MANIFEST_VERSION {
            return Err(LevelsError::CorruptManifest(format!(
                "unsupported version {version}"
            )));
        }
        let (next_counter, n) = u64::decode_from(&body[off..])?;
        off += n;
        let (replay_watermark, n) = u64::decode_from(&body[off..])?;
        off += n;
        let (level_count, n) = u32::decode_from(&body[off..])?;
        off += n;

        let mut levels = Vec::with_capacity(level_count as usize);
        for _ in 0..level_count {
            let (files, n) = encoding::decode_vec::<TableMeta>(&body[off..])?;
            off += n;
            levels.push(files);
        }
        Ok((levels, next_counter, replay_watermark))
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, LevelsState>, LevelsError> {
        self.state
            .read()
            .map_err(|_| LevelsError::Internal("levels lock poisoned".into()))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, LevelsState>, LevelsError> {
        self.state
            .write()
            .map_err(|_| LevelsError::Internal("levels lock poisoned".into()))
    }
}
