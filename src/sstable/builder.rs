//! SSTable writer — builds a complete table file from a sorted entry
//! stream.
//!
//! # Input requirements
//!
//! - Entries must arrive in **strictly ascending key order** — the
//!   upstream (memtable flush or compaction merge) has already reduced
//!   the stream to one surviving version per key. A misordered or
//!   duplicate key is a builder-misuse error, not silent corruption.
//! - The entry count hint sizes the bloom filter; it may overshoot but
//!   must not undershoot badly (the false-positive rate degrades).
//!
//! # Atomicity
//!
//! Everything is written to `<path>.tmp`, flushed, fsynced, and renamed
//! onto the final path in one step. A crash mid-build leaves only a
//! `.tmp` that open-time cleanup removes; a failure unlinks the partial
//! file before returning. A table file is therefore either complete and
//! installed, or absent — never partially registered.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};

use bloomfilter::Bloom;
use tracing::{debug, warn};

use crate::encoding::{self, Encode};
use crate::memtable::Entry;
use crate::util::now_micros;

use super::iterator::encode_cell;
use super::{
    BLOOM_FP_RATE, BlockHandle, DATA_BLOCK_TARGET, FOOTER_SIZE, HEADER_SIZE, IndexEntry,
    TABLE_MAGIC, TABLE_VERSION, TableError, TableProperties, crc32,
};

/// Streaming table builder. See the [module docs](self).
pub struct TableBuilder {
    final_path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    installed: bool,

    bloom: Bloom<[u8]>,
    index: Vec<IndexEntry>,

    block: Vec<u8>,
    block_first_key: Option<Vec<u8>>,

    entry_count: u64,
    tombstone_count: u64,
    min_key: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,
    min_seq: u64,
    max_seq: u64,
}

impl TableBuilder {
    /// Opens a builder targeting `path`, sized for roughly
    /// `entry_count_hint` entries.
    pub fn new(path: impl AsRef<Path>, entry_count_hint: usize) -> Result<Self, TableError> {
        let final_path = path.as_ref().to_path_buf();
        let tmp_path = final_path.with_extension("tmp");

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);

        // Header: magic, version, crc over the first six bytes.
        let mut header = Vec::with_capacity(HEADER_SIZE);
        TABLE_MAGIC.encode_to(&mut header)?;
        TABLE_VERSION.encode_to(&mut header)?;
        let header_crc = crc32(&header);
        header_crc.encode_to(&mut header)?;
        writer.write_all(&header)?;

        let bloom = Bloom::new_for_fp_rate(entry_count_hint.max(1), BLOOM_FP_RATE)
            .map_err(|e| TableError::Builder(e.to_string()))?;

        Ok(Self {
            final_path,
            tmp_path,
            writer,
            offset: HEADER_SIZE as u64,
            installed: false,
            bloom,
            index: Vec::new(),
            block: Vec::new(),
            block_first_key: None,
            entry_count: 0,
            tombstone_count: 0,
            min_key: None,
            last_key: None,
            min_seq: u64::MAX,
            max_seq: 0,
        })
    }

    /// Appends one entry. Keys must be strictly ascending.
    pub fn add(&mut self, entry: &Entry) -> Result<(), TableError> {
        if let Some(last) = &self.last_key
            && entry.key.as_slice() <= last.as_slice()
        {
            return Err(TableError::Builder(
                "entries must be added in strictly ascending key order".into(),
            ));
        }

        if self.block_first_key.is_none() {
            self.block_first_key = Some(entry.key.clone());
        }
        if self.min_key.is_none() {
            self.min_key = Some(entry.key.clone());
        }
        self.last_key = Some(entry.key.clone());

        self.bloom.set(entry.key.as_slice());
        self.entry_count += 1;
        if entry.is_tombstone() {
            self.tombstone_count += 1;
        }
        self.min_seq = self.min_seq.min(entry.seq);
        self.max_seq = self.max_seq.max(entry.seq);

        encode_cell(entry, &mut self.block)?;

        if self.block.len() >= DATA_BLOCK_TARGET {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Writes bloom, properties, index, and footer, fsyncs, and
    /// atomically installs the file. Consumes the builder.
    ///
    /// Returns the finished table's properties.
    pub fn finish(mut self) -> Result<TableProperties, TableError> {
        if self.entry_count == 0 {
            return Err(TableError::Builder("cannot build an empty table".into()));
        }
        if !self.block.is_empty() {
            self.flush_block()?;
        }

        let bloom_bytes = self.bloom.as_slice().to_vec();
        let bloom_handle = self.write_framed(&bloom_bytes)?;

        let properties = TableProperties {
            entry_count: self.entry_count,
            tombstone_count: self.tombstone_count,
            min_key: self.min_key.clone().unwrap_or_default(),
            max_key: self.last_key.clone().unwrap_or_default(),
            min_seq: self.min_seq,
            max_seq: self.max_seq,
            created_micros: now_micros(),
        };
        let props_bytes = encoding::encode_to_vec(&properties)?;
        let props_handle = self.write_framed(&props_bytes)?;

        let mut index_bytes = Vec::new();
        encoding::encode_vec(&self.index, &mut index_bytes)?;
        let index_handle = self.write_framed(&index_bytes)?;

        // Fixed-size footer.
        let file_size = self.offset + FOOTER_SIZE as u64;
        let mut footer = Vec::with_capacity(FOOTER_SIZE);
        index_handle.encode_to(&mut footer)?;
        bloom_handle.encode_to(&mut footer)?;
        props_handle.encode_to(&mut footer)?;
        file_size.encode_to(&mut footer)?;
        TABLE_MAGIC.encode_to(&mut footer)?;
        let footer_crc = crc32(&footer);
        footer_crc.encode_to(&mut footer)?;
        debug_assert_eq!(footer.len(), FOOTER_SIZE);
        self.writer.write_all(&footer)?;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        fs::rename(&self.tmp_path, &self.final_path)?;
        self.installed = true;

        debug!(
            path = %self.final_path.display(),
            entries = properties.entry_count,
            tombstones = properties.tombstone_count,
            bytes = file_size,
            "SSTable built"
        );
        Ok(properties)
    }

    /// Unlinks the partial `.tmp` file. Dropping an unfinished builder
    /// does the same, so every error path cleans up.
    pub fn abandon(mut self) {
        self.cleanup_partial();
        self.installed = true; // nothing left for Drop to do
    }

    fn cleanup_partial(&mut self) {
        let _ = self.writer.flush();
        if let Err(e) = fs::remove_file(&self.tmp_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.tmp_path.display(), error = %e, "failed to remove partial table file");
        }
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    /// Flushes the current data block and records its index entry.
    fn flush_block(&mut self) -> Result<(), TableError> {
        let block = mem::take(&mut self.block);
        let first_key = self
            .block_first_key
            .take()
            .ok_or_else(|| TableError::Builder("flushing a block with no first key".into()))?;
        let handle = self.write_framed(&block)?;
        self.index.push(IndexEntry { first_key, handle });
        Ok(())
    }

    /// Writes `len | bytes | crc32`, returning the block handle.
    fn write_framed(&mut self, bytes: &[u8]) -> Result<BlockHandle, TableError> {
        let offset = self.offset;
        let len = bytes.len() as u32;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(bytes)?;
        self.writer.write_all(&crc32(bytes).to_le_bytes())?;

        let size = (4 + bytes.len() + 4) as u64;
        self.offset += size;
        Ok(BlockHandle { offset, size })
    }
}

impl Drop for TableBuilder {
    fn drop(&mut self) {
        if !self.installed {
            self.cleanup_partial();
        }
    }
}
