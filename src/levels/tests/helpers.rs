//! Shared fixtures for level-manager tests.

use crate::levels::{LevelManager, TableMeta};
use crate::memtable::Entry;
use crate::sstable::TableBuilder;

/// Builds a real table file through the manager's id allocation and
/// registers it. Each key gets `base_seq + index` as its seq.
pub(crate) fn make_table(
    manager: &LevelManager,
    level: u32,
    keys: &[&[u8]],
    base_seq: u64,
) -> TableMeta {
    let (id, path) = manager.allocate_file(level).unwrap();
    let mut builder = TableBuilder::new(&path, keys.len()).unwrap();
    for (i, key) in keys.iter().enumerate() {
        builder
            .add(&Entry {
                key: key.to_vec(),
                value: Some(b"v".to_vec()),
                seq: base_seq + i as u64,
            })
            .unwrap();
    }
    let props = builder.finish().unwrap();
    let size = std::fs::metadata(&path).unwrap().len();
    let meta = TableMeta::from_properties(level, id, size, &props);
    manager.add(meta.clone()).unwrap();
    meta
}

/// Like [`make_table`] but pads values so the file lands near
/// `value_bytes` per entry — for size-trigger tests.
pub(crate) fn make_sized_table(
    manager: &LevelManager,
    level: u32,
    keys: &[&[u8]],
    base_seq: u64,
    value_bytes: usize,
) -> TableMeta {
    let (id, path) = manager.allocate_file(level).unwrap();
    let mut builder = TableBuilder::new(&path, keys.len()).unwrap();
    for (i, key) in keys.iter().enumerate() {
        builder
            .add(&Entry {
                key: key.to_vec(),
                value: Some(vec![0x7Au8; value_bytes]),
                seq: base_seq + i as u64,
            })
            .unwrap();
    }
    let props = builder.finish().unwrap();
    let size = std::fs::metadata(&path).unwrap().len();
    let meta = TableMeta::from_properties(level, id, size, &props);
    manager.add(meta.clone()).unwrap();
    meta
}
