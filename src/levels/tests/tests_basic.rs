#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tempfile::TempDir;

    use crate::levels::LevelManager;
    use crate::levels::tests::helpers::make_table;

    #[test]
    fn allocate_file_yields_unique_reserved_ids() {
        let dir = TempDir::new().unwrap();
        let manager = LevelManager::open(dir.path()).unwrap();

        let mut seen = HashSet::new();
        for _ in 0..32 {
            let (id, path) = manager.allocate_file(0).unwrap();
            assert!(seen.insert(id), "duplicate id {id}");
            assert!(path.exists(), "reservation file must exist");
        }
    }

    #[test]
    fn add_and_files_round_trip() {
        let dir = TempDir::new().unwrap();
        let manager = LevelManager::open(dir.path()).unwrap();

        let meta = make_table(&manager, 0, &[b"a", b"m", b"z"], 1);
        let files = manager.files(0).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, meta.id);
        assert_eq!(files[0].min_key, b"a");
        assert_eq!(files[0].max_key, b"z");
        assert_eq!(files[0].entry_count, 3);
    }

    #[test]
    fn overlap_filters_by_key_range() {
        let dir = TempDir::new().unwrap();
        let manager = LevelManager::open(dir.path()).unwrap();

        make_table(&manager, 1, &[b"a", b"f"], 1);
        make_table(&manager, 1, &[b"g", b"p"], 10);
        make_table(&manager, 1, &[b"q", b"z"], 20);

        let hits = manager.overlap(1, b"h", b"r").unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().any(|m| m.min_key == b"g"));
        assert!(hits.iter().any(|m| m.min_key == b"q"));
    }

    #[test]
    fn read_path_orders_l0_newest_first() {
        let dir = TempDir::new().unwrap();
        let manager = LevelManager::open(dir.path()).unwrap();

        let older = make_table(&manager, 0, &[b"k"], 1);
        let newer = make_table(&manager, 0, &[b"k"], 100);
        make_table(&manager, 1, &[b"k"], 50);

        let path = manager.read_path(b"k").unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path[0].0.id, newer.id, "newest L0 first");
        assert_eq!(path[1].0.id, older.id);
        assert_eq!(path[2].0.level, 1);
    }

    #[test]
    fn quarantined_files_leave_the_read_path() {
        let dir = TempDir::new().unwrap();
        let manager = LevelManager::open(dir.path()).unwrap();

        let meta = make_table(&manager, 0, &[b"k"], 1);
        assert_eq!(manager.read_path(b"k").unwrap().len(), 1);

        manager.quarantine(meta.id);
        assert!(manager.read_path(b"k").unwrap().is_empty());
        assert!(manager.files(0).unwrap().is_empty());
    }

    #[test]
    fn apply_compaction_swaps_files_atomically() {
        let dir = TempDir::new().unwrap();
        let manager = LevelManager::open(dir.path()).unwrap();

        let a = make_table(&manager, 0, &[b"a", b"m"], 1);
        let b = make_table(&manager, 0, &[b"b", b"z"], 10);
        let merged = make_table(&manager, 1, &[b"a", b"z"], 20);
        // `merged` is already registered at L1; the swap removes the L0
        // inputs and unlinks their files.
        manager
            .apply_compaction(&[a.clone(), b.clone()], Vec::new())
            .unwrap();

        assert!(manager.files(0).unwrap().is_empty());
        assert_eq!(manager.files(1).unwrap().len(), 1);
        assert_eq!(manager.files(1).unwrap()[0].id, merged.id);

        let sst_files = std::fs::read_dir(manager.sst_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_str().is_some_and(|n| n.ends_with(".sst")))
            .count();
        assert_eq!(sst_files, 1);
    }

    #[test]
    fn max_flushed_seq_tracks_registered_tables() {
        let dir = TempDir::new().unwrap();
        let manager = LevelManager::open(dir.path()).unwrap();
        assert_eq!(manager.max_flushed_seq(), 0);

        make_table(&manager, 0, &[b"a", b"b"], 40);
        assert_eq!(manager.max_flushed_seq(), 41);
    }
}
