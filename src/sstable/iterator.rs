//! Cell and table iterators for the SSTable reader.
//!
//! A data block is a concatenation of cells:
//!
//! ```text
//! [SEQ(8)][OP(1)][KEY_LEN(4)][KEY][VAL_LEN(4)][VAL]
//! ```
//!
//! `OP` is 0 for a Put and 1 for a tombstone (whose `VAL_LEN` is 0).
//! [`BlockIterator`] walks the cells of one decoded block;
//! [`TableIterator`] chains every block of a table, yielding entries in
//! key order for scans and compaction merges.

use crate::encoding::{Decode, Encode, EncodingError};
use crate::memtable::Entry;

use super::{Table, TableError};

const OP_PUT: u8 = 0;
const OP_TOMBSTONE: u8 = 1;

/// Appends the cell encoding of `entry` to `buf`.
pub(crate) fn encode_cell(entry: &Entry, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    entry.seq.encode_to(buf)?;
    let op = if entry.is_tombstone() {
        OP_TOMBSTONE
    } else {
        OP_PUT
    };
    op.encode_to(buf)?;
    entry.key.encode_to(buf)?;
    match &entry.value {
        Some(v) => v.encode_to(buf)?,
        None => 0u32.encode_to(buf)?,
    }
    Ok(())
}

/// Decodes one cell starting at `buf[0]`, returning the entry and bytes
/// consumed.
fn decode_cell(buf: &[u8]) -> Result<(Entry, usize), EncodingError> {
    let mut off = 0;
    let (seq, n) = u64::decode_from(&buf[off..])?;
    off += n;
    let (op, n) = u8::decode_from(&buf[off..])?;
    off += n;
    let (key, n) = Vec::<u8>::decode_from(&buf[off..])?;
    off += n;
    let (raw_value, n) = Vec::<u8>::decode_from(&buf[off..])?;
    off += n;

    let value = match op {
        OP_PUT => Some(raw_value),
        OP_TOMBSTONE => None,
        other => {
            return Err(EncodingError::InvalidTag {
                tag: u32::from(other),
                type_name: "sstable cell op",
            });
        }
    };
    Ok((Entry { key, value, seq }, off))
}

// ------------------------------------------------------------------------------------------------
// BlockIterator
// ------------------------------------------------------------------------------------------------

/// Iterates the cells of one decoded (checksum-verified) data block.
pub struct BlockIterator<'a> {
    bytes: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> BlockIterator<'a> {
    /// Wraps a decoded block's bytes.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: 0,
            failed: false,
        }
    }
}

impl Iterator for BlockIterator<'_> {
    type Item = Result<Entry, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.bytes.len() {
            return None;
        }
        match decode_cell(&self.bytes[self.offset..]) {
            Ok((entry, consumed)) => {
                self.offset += consumed;
                Some(Ok(entry))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(TableError::Encoding(e)))
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TableIterator
// ------------------------------------------------------------------------------------------------

/// Streams every entry of a table in key order, loading (and
/// checksum-verifying) one data block at a time.
pub struct TableIterator<'a> {
    table: &'a Table,
    next_block: usize,
    current: std::vec::IntoIter<Entry>,
    failed: bool,
}

impl<'a> TableIterator<'a> {
    pub(crate) fn new(table: &'a Table) -> Self {
        Self {
            table,
            next_block: 0,
            current: Vec::new().into_iter(),
            failed: false,
        }
    }

    fn load_next_block(&mut self) -> Option<Result<(), TableError>> {
        if self.next_block >= self.table.index_len() {
            return None;
        }
        let bytes = match self.table.block_bytes(self.next_block) {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };
        self.next_block += 1;

        let mut entries = Vec::new();
        for cell in BlockIterator::new(&bytes) {
            match cell {
                Ok(entry) => entries.push(entry),
                Err(e) => return Some(Err(e)),
            }
        }
        self.current = entries.into_iter();
        Some(Ok(()))
    }
}

impl Iterator for TableIterator<'_> {
    type Item = Result<Entry, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(entry) = self.current.next() {
                return Some(Ok(entry));
            }
            match self.load_next_block() {
                Some(Ok(())) => continue,
                Some(Err(e)) => {
                    self.failed = true;
                    return Some(Err(e));
                }
                None => return None,
            }
        }
    }
}
