#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::compaction::{CompactionScheduler, TaskPriority};
    use crate::config::{CompactionConfig, MemtableConfig, StoreConfig, WalConfig};
    use crate::engine::tests::helpers::{small_config, wait_until};
    use crate::engine::{Engine, WAL_DIR};
    use crate::levels::LevelManager;
    use crate::memtable::manager::MemtableManager;
    use crate::wal::{Wal, WalRecord};

    #[test]
    fn crash_and_recover_restores_synced_state() {
        let dir = TempDir::new().unwrap();
        {
            let engine = Engine::open(dir.path(), StoreConfig::default()).unwrap();
            for i in 0..100u64 {
                engine
                    .put(format!("k{i}").into_bytes(), format!("v{i}").into_bytes())
                    .unwrap();
            }
            engine.sync().unwrap();
            // Crash: drop without close.
        }

        let engine = Engine::open(dir.path(), StoreConfig::default()).unwrap();
        for i in 0..100u64 {
            assert_eq!(
                engine.get(format!("k{i}").as_bytes()).unwrap(),
                Some(format!("v{i}").into_bytes()),
                "k{i} lost in recovery"
            );
        }
        engine.close().unwrap();
    }

    #[test]
    fn deletes_survive_recovery() {
        let dir = TempDir::new().unwrap();
        {
            let engine = Engine::open(dir.path(), StoreConfig::default()).unwrap();
            engine.put(b"keep".to_vec(), b"v".to_vec()).unwrap();
            engine.put(b"drop".to_vec(), b"v".to_vec()).unwrap();
            engine.delete(b"drop".to_vec()).unwrap();
            engine.sync().unwrap();
        }

        let engine = Engine::open(dir.path(), StoreConfig::default()).unwrap();
        assert_eq!(engine.get(b"keep").unwrap(), Some(b"v".to_vec()));
        assert_eq!(engine.get(b"drop").unwrap(), None);
        engine.close().unwrap();
    }

    #[test]
    fn seq_counter_resumes_above_recovered_state() {
        let dir = TempDir::new().unwrap();
        let seq_before = {
            let engine = Engine::open(dir.path(), StoreConfig::default()).unwrap();
            for i in 0..10u64 {
                engine.put(format!("k{i}").into_bytes(), b"v".to_vec()).unwrap();
            }
            engine.sync().unwrap();
            engine.current_seq()
        };

        let engine = Engine::open(dir.path(), StoreConfig::default()).unwrap();
        assert_eq!(engine.current_seq(), seq_before);
        engine.put(b"next".to_vec(), b"v".to_vec()).unwrap();
        assert_eq!(engine.current_seq(), seq_before + 1);
        engine.close().unwrap();
    }

    #[test]
    fn recovery_skips_records_already_flushed_to_tables() {
        let dir = TempDir::new().unwrap();
        {
            let engine = Engine::open(dir.path(), StoreConfig::default()).unwrap();
            engine.put(b"flushed".to_vec(), b"v1".to_vec()).unwrap();
            engine.flush_all().unwrap();
            engine.put(b"unflushed".to_vec(), b"v2".to_vec()).unwrap();
            engine.sync().unwrap();
        }

        let engine = Engine::open(dir.path(), StoreConfig::default()).unwrap();
        // Both visible: one from its table, one replayed from the WAL.
        assert_eq!(engine.get(b"flushed").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(engine.get(b"unflushed").unwrap(), Some(b"v2".to_vec()));

        // The flushed record must not be double-applied into the
        // memtable: the active table only holds the replayed one.
        let stats = engine.stats().unwrap();
        assert!(stats.levels.first().map(|(c, _)| *c >= 1).unwrap_or(false));
        engine.close().unwrap();
    }

    #[test]
    fn close_then_reopen_preserves_everything() {
        let dir = TempDir::new().unwrap();
        {
            let engine = Engine::open(dir.path(), small_config()).unwrap();
            for i in 0..300u64 {
                engine
                    .put(format!("key-{i:04}").into_bytes(), vec![0x42; 32])
                    .unwrap();
            }
            wait_until(10_000, || engine.stats().unwrap().immutable_count == 0);
            engine.close().unwrap();
        }

        let engine = Engine::open(dir.path(), small_config()).unwrap();
        for i in (0..300u64).step_by(29) {
            assert_eq!(
                engine.get(format!("key-{i:04}").as_bytes()).unwrap(),
                Some(vec![0x42; 32])
            );
        }
        engine.close().unwrap();
    }

    /// Two sealed memtables, two workers, and the *newer* one's flush
    /// completing first — then a crash before the older flush ever
    /// runs. The replay watermark must stay pinned below the older
    /// memtable's first seq, so recovery replays its records instead of
    /// skipping them because a higher-seq table happens to be
    /// registered. (Trusting max-seq-over-tables here silently loses
    /// the older memtable.)
    #[test]
    fn out_of_order_flush_completion_does_not_lose_data_on_crash() {
        let dir = TempDir::new().unwrap();
        {
            // Assemble the engine's on-disk layout by hand so the flush
            // race is exact: only the NEWER memtable's flush reaches a
            // worker before the crash.
            let wal = Wal::open(dir.path().join(WAL_DIR), WalConfig::default()).unwrap();
            wal.replay(|_| Ok(())).unwrap();
            let levels = Arc::new(LevelManager::open(dir.path()).unwrap());
            let memtables = Arc::new(MemtableManager::new(MemtableConfig::default()));

            // Older memtable: seqs 1..=50, WAL-first like the engine.
            for seq in 1..=50u64 {
                let key = format!("old-{seq:03}").into_bytes();
                wal.append(&WalRecord::put(seq, key.clone(), b"a".to_vec()))
                    .unwrap();
                memtables.insert(key, Some(b"a".to_vec()), seq).unwrap();
            }
            let older = memtables.rotate_now().unwrap().unwrap();

            // Newer memtable: seqs 51..=60.
            for seq in 51..=60u64 {
                let key = format!("new-{seq:03}").into_bytes();
                wal.append(&WalRecord::put(seq, key.clone(), b"b".to_vec()))
                    .unwrap();
                memtables.insert(key, Some(b"b".to_vec()), seq).unwrap();
            }
            let newer = memtables.rotate_now().unwrap().unwrap();
            assert!(older.max_seq() < newer.min_seq());

            let scheduler = CompactionScheduler::start(
                CompactionConfig {
                    worker_count: 2,
                    l0_file_limit: 100,
                    ..CompactionConfig::default()
                },
                Arc::clone(&memtables),
                Arc::clone(&levels),
            );
            scheduler.schedule_flush(newer, TaskPriority::Flush);

            // The newer table registers; the older memtable stays queued.
            wait_until(5000, || memtables.immutable_count() == 1);
            assert_eq!(levels.files(0).unwrap().len(), 1);
            assert!(
                levels.max_flushed_seq() >= 60,
                "the newer table's seqs are registered"
            );
            assert!(
                levels.replay_watermark() < older.min_seq(),
                "watermark must not jump over the unflushed older memtable"
            );

            scheduler.shutdown();
            wal.force_sync().unwrap();
            // Crash: the older memtable's flush never ran.
        }

        let engine = Engine::open(dir.path(), StoreConfig::default()).unwrap();
        for seq in 1..=50u64 {
            assert_eq!(
                engine.get(format!("old-{seq:03}").as_bytes()).unwrap(),
                Some(b"a".to_vec()),
                "old-{seq:03} lost: WAL-synced but unflushed data must replay"
            );
        }
        for seq in 51..=60u64 {
            assert_eq!(
                engine.get(format!("new-{seq:03}").as_bytes()).unwrap(),
                Some(b"b".to_vec())
            );
        }
        // Seq counter resumed past everything recovered.
        assert!(engine.current_seq() >= 60);
        engine.close().unwrap();
    }

    #[test]
    fn wal_is_pruned_once_tables_cover_it() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::open(dir.path(), small_config()).unwrap();

        for i in 0..200u64 {
            engine
                .put(format!("key-{i:04}").into_bytes(), vec![0x55; 64])
                .unwrap();
        }
        engine.flush_all().unwrap();
        engine.maintain().unwrap();

        // Everything durable in tables: compaction of the WAL down to
        // live state must leave the log small.
        let stats = engine.stats().unwrap();
        assert!(stats.levels.first().map(|(c, _)| *c >= 1).unwrap_or(false));
        engine.close().unwrap();
    }
}
