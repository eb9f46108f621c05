#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::batch::{EntryStatus, WriteBatch};
    use crate::config::StoreConfig;
    use crate::shard::ShardedStore;

    fn two_shard_config() -> StoreConfig {
        let mut config = StoreConfig::default();
        config.shard.count = 2;
        config
    }

    #[test]
    fn kv_surface_dispatches_across_shards() {
        let dir = TempDir::new().unwrap();
        let store = ShardedStore::open(dir.path(), two_shard_config()).unwrap();

        for i in 0..50u64 {
            store
                .put(format!("k{i}").into_bytes(), format!("v{i}").into_bytes())
                .unwrap();
        }
        for i in 0..50u64 {
            assert_eq!(
                store.get(format!("k{i}").as_bytes()).unwrap(),
                Some(format!("v{i}").into_bytes())
            );
        }
        store.delete(b"k7".to_vec()).unwrap();
        assert_eq!(store.get(b"k7").unwrap(), None);
        store.close().unwrap();
    }

    #[test]
    fn shard_directories_are_created_per_shard() {
        let dir = TempDir::new().unwrap();
        let store = ShardedStore::open(dir.path(), two_shard_config()).unwrap();
        assert_eq!(store.shard_count(), 2);
        assert!(dir.path().join("shard-0").is_dir());
        assert!(dir.path().join("shard-1").is_dir());
        store.close().unwrap();
    }

    #[test]
    fn reads_are_served_from_the_shard_cache_after_first_hit() {
        let dir = TempDir::new().unwrap();
        let store = ShardedStore::open(dir.path(), two_shard_config()).unwrap();

        store.put(b"hot".to_vec(), b"v".to_vec()).unwrap();
        assert_eq!(store.get(b"hot").unwrap(), Some(b"v".to_vec())); // fill
        assert_eq!(store.get(b"hot").unwrap(), Some(b"v".to_vec())); // cached

        let stats = store.stats().unwrap();
        let cache_hits: u64 = stats.iter().map(|s| s.cache.hits).sum();
        assert!(cache_hits >= 1, "second read must come from the cache");
        store.close().unwrap();
    }

    #[test]
    fn writes_invalidate_the_shard_cache() {
        let dir = TempDir::new().unwrap();
        let store = ShardedStore::open(dir.path(), two_shard_config()).unwrap();

        store.put(b"k".to_vec(), b"v1".to_vec()).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v1".to_vec()));
        store.put(b"k".to_vec(), b"v2".to_vec()).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v2".to_vec()));

        store.delete(b"k".to_vec()).unwrap();
        assert_eq!(store.get(b"k").unwrap(), None);
        store.close().unwrap();
    }

    #[test]
    fn batch_statuses_come_back_in_add_order() {
        let dir = TempDir::new().unwrap();
        let store = ShardedStore::open(dir.path(), two_shard_config()).unwrap();

        let mut batch = WriteBatch::new(8192);
        batch.add_put(b"a".to_vec(), b"1".to_vec()).unwrap();
        batch.add_put(b"b".to_vec(), b"2".to_vec()).unwrap();
        batch.add_delete(b"a".to_vec()).unwrap();
        batch.add_put(b"a".to_vec(), b"3".to_vec()).unwrap();
        batch.add_put(b"c".to_vec(), b"4".to_vec()).unwrap();

        let statuses = store.batch_submit(batch).unwrap();
        assert_eq!(statuses.len(), 5);
        assert_eq!(statuses[0], EntryStatus::Superseded);
        assert_eq!(statuses[1], EntryStatus::Applied);
        assert_eq!(statuses[2], EntryStatus::Superseded);
        assert_eq!(statuses[3], EntryStatus::Applied);
        assert_eq!(statuses[4], EntryStatus::Applied);

        assert_eq!(store.get(b"a").unwrap(), Some(b"3".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.get(b"c").unwrap(), Some(b"4".to_vec()));
        store.close().unwrap();
    }

    #[test]
    fn reconfigure_with_same_count_keeps_data_visible() {
        let dir = TempDir::new().unwrap();
        let store = ShardedStore::open(dir.path(), two_shard_config()).unwrap();

        for i in 0..20u64 {
            store
                .put(format!("k{i}").into_bytes(), b"v".to_vec())
                .unwrap();
        }
        store.reconfigure(2).unwrap();

        assert_eq!(store.shard_count(), 2);
        for i in 0..20u64 {
            assert_eq!(
                store.get(format!("k{i}").as_bytes()).unwrap(),
                Some(b"v".to_vec()),
                "same shard count: routes unchanged, data must remain"
            );
        }
        store.close().unwrap();
    }

    #[test]
    fn reconfigure_rejects_zero_shards() {
        let dir = TempDir::new().unwrap();
        let store = ShardedStore::open(dir.path(), two_shard_config()).unwrap();
        assert!(store.reconfigure(0).is_err());
        store.close().unwrap();
    }
}
