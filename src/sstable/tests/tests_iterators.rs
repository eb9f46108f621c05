#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::memtable::Entry;
    use crate::sstable::{Table, TableBuilder};

    fn build_numbered(dir: &TempDir, count: u64) -> Table {
        let path = dir.path().join("table.sst");
        let mut builder = TableBuilder::new(&path, count as usize).unwrap();
        for i in 0..count {
            builder
                .add(&Entry {
                    key: format!("key-{i:05}").into_bytes(),
                    value: if i % 10 == 0 {
                        None
                    } else {
                        Some(vec![0x33; 64])
                    },
                    seq: i + 1,
                })
                .unwrap();
        }
        builder.finish().unwrap();
        Table::open(&path).unwrap()
    }

    #[test]
    fn table_iterator_yields_everything_in_order() {
        let dir = TempDir::new().unwrap();
        let table = build_numbered(&dir, 300);

        let mut prev: Option<Vec<u8>> = None;
        let mut count = 0u64;
        let mut tombstones = 0u64;
        for item in table.iter() {
            let entry = item.unwrap();
            if let Some(prev) = &prev {
                assert!(entry.key > *prev, "iteration must be sorted");
            }
            if entry.is_tombstone() {
                tombstones += 1;
            }
            prev = Some(entry.key);
            count += 1;
        }
        assert_eq!(count, 300);
        assert_eq!(tombstones, 30);
    }

    #[test]
    fn scan_respects_bounds_and_keeps_tombstones() {
        let dir = TempDir::new().unwrap();
        let table = build_numbered(&dir, 100);

        let hits = table.scan(b"key-00010", b"key-00020").unwrap();
        assert_eq!(hits.len(), 10);
        assert_eq!(hits[0].key, b"key-00010");
        assert!(hits[0].is_tombstone(), "raw scans keep delete markers");
        assert_eq!(hits[9].key, b"key-00019");
    }

    #[test]
    fn scan_with_inverted_bounds_is_empty() {
        let dir = TempDir::new().unwrap();
        let table = build_numbered(&dir, 10);
        assert!(table.scan(b"key-00009", b"key-00001").unwrap().is_empty());
    }
}
