#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::config::StoreConfig;
    use crate::engine::Engine;
    use crate::engine::tests::helpers::{small_config, wait_until};

    #[test]
    fn scan_returns_sorted_live_entries() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), StoreConfig::default()).unwrap();

        engine.put(b"c".to_vec(), b"3".to_vec()).unwrap();
        engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();

        let hits = engine.scan(b"a", b"z").unwrap();
        assert_eq!(
            hits,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ]
        );
        engine.close().unwrap();
    }

    #[test]
    fn scan_excludes_deleted_and_out_of_range() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), StoreConfig::default()).unwrap();

        for key in [b"a", b"b", b"c", b"d"] {
            engine.put(key.to_vec(), b"v".to_vec()).unwrap();
        }
        engine.delete(b"b".to_vec()).unwrap();

        let hits = engine.scan(b"a", b"d").unwrap();
        let keys: Vec<&[u8]> = hits.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"a".as_slice(), b"c".as_slice()]);
        engine.close().unwrap();
    }

    #[test]
    fn scan_merges_memtables_and_tables() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), small_config()).unwrap();

        // First wave ends up in tables, second stays in memory.
        for i in 0..100u64 {
            engine
                .put(format!("disk-{i:03}").into_bytes(), vec![0x44; 64])
                .unwrap();
        }
        engine.flush_all().unwrap();
        wait_until(10_000, || engine.stats().unwrap().immutable_count == 0);
        for i in 0..10u64 {
            engine
                .put(format!("mem-{i:03}").into_bytes(), b"m".to_vec())
                .unwrap();
        }

        let hits = engine.scan(&[], &[]).unwrap();
        assert_eq!(hits.len(), 110);
        // Sorted merge: "disk-*" sorts before "mem-*".
        assert!(hits[0].0.starts_with(b"disk-"));
        assert!(hits[109].0.starts_with(b"mem-"));
        engine.close().unwrap();
    }

    #[test]
    fn scan_prefers_newest_version_across_layers() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), StoreConfig::default()).unwrap();

        engine.put(b"k".to_vec(), b"old".to_vec()).unwrap();
        engine.flush_all().unwrap();
        engine.put(b"k".to_vec(), b"new".to_vec()).unwrap();

        let hits = engine.scan(b"k", b"l").unwrap();
        assert_eq!(hits, vec![(b"k".to_vec(), b"new".to_vec())]);
        engine.close().unwrap();
    }
}
