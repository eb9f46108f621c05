//! Sorted String Table — immutable, checksummed, bloom-filtered.
//!
//! An SSTable holds one surviving version per key (flush and compaction
//! both deduplicate before writing), sorted ascending, in fixed-target
//! data blocks. Point tombstones are stored as entries with no value so
//! they keep shadowing older levels until compaction retires them.
//!
//! # On-disk layout
//!
//! ```text
//! [MAGIC(4) "CSST"][VERSION(2)][HEADER_CRC32(4)]
//! [BLOCK_LEN(4)][CELLS...][BLOCK_CRC32(4)]          ── data blocks
//! ...
//! [BLOCK_LEN(4)][BLOOM_BYTES][BLOCK_CRC32(4)]       ── bloom filter
//! [BLOCK_LEN(4)][PROPERTIES][BLOCK_CRC32(4)]        ── table metadata
//! [BLOCK_LEN(4)][INDEX_ENTRIES][BLOCK_CRC32(4)]     ── first-key index
//! [INDEX_HANDLE(16)][BLOOM_HANDLE(16)][PROPS_HANDLE(16)]
//! [FILE_SIZE(8)][MAGIC(4)][FOOTER_CRC32(4)]         ── fixed footer
//! ```
//!
//! Every variable-size region is framed `len | bytes | crc32`; the crc
//! covers the bytes only. The footer is fixed-size at end-of-file so a
//! reader can locate everything with two reads.
//!
//! A cell is `seq(8) | op(1) | key_len(4) | key | val_len(4) | val`
//! (value empty for tombstones) — the same shape as a WAL payload, which
//! keeps the two formats mentally interchangeable.
//!
//! # Concurrency & integrity
//!
//! Tables are immutable, so the reader memory-maps the file and serves
//! lookups lock-free. Any CRC mismatch surfaces
//! [`TableError::ChecksumMismatch`]; the level manager quarantines the
//! file id and stops routing reads or compactions at it.

pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

pub use builder::TableBuilder;
pub use iterator::{BlockIterator, TableIterator};

use std::fs::File;
use std::io;
use std::path::Path;

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::error::{self, ErrorKind};
use crate::memtable::Entry;

pub(crate) const TABLE_MAGIC: [u8; 4] = *b"CSST";
pub(crate) const TABLE_VERSION: u16 = 1;
pub(crate) const HEADER_SIZE: usize = 10;
/// index handle + bloom handle + props handle + file size + magic + crc.
pub(crate) const FOOTER_SIZE: usize = 16 * 3 + 8 + 4 + 4;
pub(crate) const DATA_BLOCK_TARGET: usize = 4096;
pub(crate) const BLOOM_FP_RATE: f64 = 0.01;
const FRAME_LEN_SIZE: usize = 4;
const FRAME_CRC_SIZE: usize = 4;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations.
#[derive(Debug, Error)]
pub enum TableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A block or footer failed its CRC.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Malformed structure (bad magic, short file, out-of-range handle).
    #[error("malformed table: {0}")]
    Malformed(String),

    /// Builder contract violation (unsorted input, empty table).
    #[error("builder misuse: {0}")]
    Builder(String),
}

impl TableError {
    /// Maps onto the closed result-code set.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) => error::io_kind(e),
            Self::Encoding(_) | Self::ChecksumMismatch | Self::Malformed(_) => ErrorKind::Corrupted,
            Self::Builder(_) => ErrorKind::Param,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// On-disk structures
// ------------------------------------------------------------------------------------------------

/// Offset + size of a framed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHandle {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

impl Encode for BlockHandle {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.offset.encode_to(buf)?;
        self.size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BlockHandle {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { offset, size }, off))
    }
}

/// Index entry: the first key of a data block and where to find it.
#[derive(Debug, Clone)]
pub(crate) struct IndexEntry {
    pub(crate) first_key: Vec<u8>,
    pub(crate) handle: BlockHandle,
}

impl Encode for IndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.first_key.encode_to(buf)?;
        self.handle.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for IndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (first_key, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (handle, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { first_key, handle }, off))
    }
}

/// Table-level metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableProperties {
    /// Surviving entries (tombstones included).
    pub entry_count: u64,

    /// How many of those are tombstones.
    pub tombstone_count: u64,

    /// Smallest key in the table.
    pub min_key: Vec<u8>,

    /// Largest key in the table.
    pub max_key: Vec<u8>,

    /// Smallest seq in the table.
    pub min_seq: u64,

    /// Largest seq in the table.
    pub max_seq: u64,

    /// Creation time, microseconds since the UNIX epoch.
    pub created_micros: u64,
}

impl Encode for TableProperties {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.entry_count.encode_to(buf)?;
        self.tombstone_count.encode_to(buf)?;
        self.min_key.encode_to(buf)?;
        self.max_key.encode_to(buf)?;
        self.min_seq.encode_to(buf)?;
        self.max_seq.encode_to(buf)?;
        self.created_micros.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for TableProperties {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (entry_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (tombstone_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_key, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (max_key, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (min_seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (max_seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (created_micros, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                entry_count,
                tombstone_count,
                min_key,
                max_key,
                min_seq,
                max_seq,
                created_micros,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Lookup result
// ------------------------------------------------------------------------------------------------

/// Result of a single-table point lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableGetResult {
    /// A live value.
    Found {
        /// Stored value.
        value: Vec<u8>,
        /// Seq of this version.
        seq: u64,
    },

    /// A tombstone — definitive "deleted" for this and older layers.
    Tombstone {
        /// Seq of the delete.
        seq: u64,
    },

    /// This table holds nothing for the key.
    NotFound,
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// A memory-mapped, immutable table reader. See the [module docs](self).
#[derive(Debug)]
pub struct Table {
    mmap: Mmap,
    bloom_bytes: Vec<u8>,
    index: Vec<IndexEntry>,

    /// Decoded properties block.
    pub properties: TableProperties,
}

impl Table {
    /// Opens a table file, validating header, footer, and every metadata
    /// block checksum.
    ///
    /// # Safety
    ///
    /// The `unsafe` mmap is sound because table files are immutable
    /// after the builder's atomic rename: the map is read-only and every
    /// block boundary is validated before slicing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(TableError::Malformed("file shorter than header+footer".into()));
        }

        // Header: magic, version, crc over the first six bytes.
        if mmap[..4] != TABLE_MAGIC {
            return Err(TableError::Malformed("bad header magic".into()));
        }
        let version = u16::from_le_bytes([mmap[4], mmap[5]]);
        if version != TABLE_VERSION {
            return Err(TableError::Malformed(format!("unsupported version {version}")));
        }
        let stored = u32::from_le_bytes([mmap[6], mmap[7], mmap[8], mmap[9]]);
        if crc32(&mmap[..6]) != stored {
            return Err(TableError::ChecksumMismatch);
        }

        // Footer.
        let footer_start = mmap.len() - FOOTER_SIZE;
        let footer = &mmap[footer_start..];
        let (index_handle, n1) = BlockHandle::decode_from(footer)?;
        let (bloom_handle, n2) = BlockHandle::decode_from(&footer[n1..])?;
        let (props_handle, n3) = BlockHandle::decode_from(&footer[n1 + n2..])?;
        let mut off = n1 + n2 + n3;
        let (file_size, n) = u64::decode_from(&footer[off..])?;
        off += n;
        let (magic, n) = <[u8; 4]>::decode_from(&footer[off..])?;
        off += n;
        let (footer_crc, _) = u32::decode_from(&footer[off..])?;

        if magic != TABLE_MAGIC {
            return Err(TableError::Malformed("bad footer magic".into()));
        }
        if crc32(&footer[..off]) != footer_crc {
            return Err(TableError::ChecksumMismatch);
        }
        if file_size != mmap.len() as u64 {
            return Err(TableError::Malformed(format!(
                "footer file size {file_size} != actual {}",
                mmap.len()
            )));
        }

        let bloom_bytes = read_block(&mmap, bloom_handle)?;
        let props_bytes = read_block(&mmap, props_handle)?;
        let (properties, _) = encoding::decode_from_slice::<TableProperties>(&props_bytes)?;
        let index_bytes = read_block(&mmap, index_handle)?;
        let (index, _) = encoding::decode_vec::<IndexEntry>(&index_bytes)?;

        Ok(Self {
            mmap,
            bloom_bytes,
            index,
            properties,
        })
    }

    /// Table file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Whether `key` *might* be present according to the bloom filter.
    ///
    /// `false` is definitive; `true` (or a missing/corrupt filter) means
    /// the data blocks must be consulted.
    pub fn bloom_may_contain(&self, key: &[u8]) -> bool {
        if self.bloom_bytes.is_empty() {
            return true;
        }
        match Bloom::<[u8]>::from_slice(&self.bloom_bytes) {
            Ok(bloom) => bloom.check(key),
            Err(_) => true,
        }
    }

    /// Point lookup.
    ///
    /// Pipeline: key-range check → bloom short-circuit → index binary
    /// search → in-block scan. The table stores one version per key, so
    /// the first cell match is the answer.
    pub fn get(&self, key: &[u8]) -> Result<TableGetResult, TableError> {
        if key < self.properties.min_key.as_slice() || key > self.properties.max_key.as_slice() {
            return Ok(TableGetResult::NotFound);
        }
        if !self.bloom_may_contain(key) {
            return Ok(TableGetResult::NotFound);
        }
        let Some(block_idx) = self.block_for_key(key) else {
            return Ok(TableGetResult::NotFound);
        };

        let bytes = read_block(&self.mmap, self.index[block_idx].handle)?;
        for cell in BlockIterator::new(&bytes) {
            let entry = cell?;
            match entry.key.as_slice().cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => {
                    return Ok(match entry.value {
                        Some(value) => TableGetResult::Found {
                            value,
                            seq: entry.seq,
                        },
                        None => TableGetResult::Tombstone { seq: entry.seq },
                    });
                }
                std::cmp::Ordering::Greater => break,
            }
        }
        Ok(TableGetResult::NotFound)
    }

    /// Streaming iterator over every entry in key order (tombstones
    /// included). Used by compaction merges and range scans.
    pub fn iter(&self) -> TableIterator<'_> {
        TableIterator::new(self)
    }

    /// Entries in `[start, end)`, tombstones included, in key order.
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<Entry>, TableError> {
        let mut out = Vec::new();
        if start >= end {
            return Ok(out);
        }
        for item in self.iter() {
            let entry = item?;
            if entry.key.as_slice() >= end {
                break;
            }
            if entry.key.as_slice() >= start {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Index of the data block that may contain `key`: the last block
    /// whose first key is ≤ `key`.
    fn block_for_key(&self, key: &[u8]) -> Option<usize> {
        let idx = self
            .index
            .partition_point(|e| e.first_key.as_slice() <= key);
        idx.checked_sub(1)
    }

    pub(crate) fn index_len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn block_bytes(&self, idx: usize) -> Result<Vec<u8>, TableError> {
        read_block(&self.mmap, self.index[idx].handle)
    }
}

// ------------------------------------------------------------------------------------------------
// Framed-block helpers (shared with the builder)
// ------------------------------------------------------------------------------------------------

/// Reads and checksum-verifies the framed block at `handle`.
pub(crate) fn read_block(mmap: &Mmap, handle: BlockHandle) -> Result<Vec<u8>, TableError> {
    let start = usize::try_from(handle.offset)
        .map_err(|_| TableError::Malformed("block offset out of range".into()))?;
    let size = usize::try_from(handle.size)
        .map_err(|_| TableError::Malformed("block size out of range".into()))?;

    if size < FRAME_LEN_SIZE + FRAME_CRC_SIZE || start + size > mmap.len() {
        return Err(TableError::Malformed("block handle out of bounds".into()));
    }

    let len_bytes: [u8; 4] = mmap[start..start + FRAME_LEN_SIZE]
        .try_into()
        .map_err(|_| TableError::Malformed("short block length".into()))?;
    let content_len = u32::from_le_bytes(len_bytes) as usize;

    if FRAME_LEN_SIZE + content_len + FRAME_CRC_SIZE != size {
        return Err(TableError::Malformed("block frame length mismatch".into()));
    }

    let content = &mmap[start + FRAME_LEN_SIZE..start + FRAME_LEN_SIZE + content_len];
    let crc_off = start + FRAME_LEN_SIZE + content_len;
    let stored: [u8; 4] = mmap[crc_off..crc_off + FRAME_CRC_SIZE]
        .try_into()
        .map_err(|_| TableError::Malformed("short block checksum".into()))?;

    if crc32(content) != u32::from_le_bytes(stored) {
        return Err(TableError::ChecksumMismatch);
    }
    Ok(content.to_vec())
}

pub(crate) fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}
