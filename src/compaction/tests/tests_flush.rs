#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use tempfile::TempDir;

    use crate::compaction::{CompactionScheduler, TaskPriority};
    use crate::config::{CompactionConfig, MemtableConfig};
    use crate::levels::LevelManager;
    use crate::memtable::manager::MemtableManager;

    fn setup(dir: &TempDir, workers: usize) -> (Arc<MemtableManager>, Arc<LevelManager>, CompactionScheduler) {
        let memtables = Arc::new(MemtableManager::new(MemtableConfig {
            max_bytes: 1024,
            immutable_queue_depth: 8,
            rotation_wait_ms: 1000,
        }));
        let levels = Arc::new(LevelManager::open(dir.path()).unwrap());
        let scheduler = CompactionScheduler::start(
            CompactionConfig {
                worker_count: workers,
                l0_file_limit: 100, // keep L0 merges out of flush tests
                ..CompactionConfig::default()
            },
            Arc::clone(&memtables),
            Arc::clone(&levels),
        );
        (memtables, levels, scheduler)
    }

    fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Fills the manager until one rotation happens, returning the
    /// sealed handle.
    fn force_rotation(memtables: &MemtableManager, seq_base: u64) -> Arc<crate::memtable::Memtable> {
        let mut seq = seq_base;
        loop {
            seq += 1;
            match memtables
                .insert(format!("key-{seq:06}").into_bytes(), Some(vec![0u8; 128]), seq)
                .unwrap()
            {
                crate::memtable::manager::InsertOutcome::Inserted => {}
                crate::memtable::manager::InsertOutcome::Rotated(sealed) => return sealed,
            }
        }
    }

    #[test]
    fn flush_produces_one_l0_table_and_drains_the_queue() {
        let dir = TempDir::new().unwrap();
        let (memtables, levels, scheduler) = setup(&dir, 2);

        let sealed = force_rotation(&memtables, 0);
        scheduler.schedule_flush(sealed, TaskPriority::Flush);

        wait_until(5000, || memtables.immutable_count() == 0);
        assert_eq!(levels.files(0).unwrap().len(), 1);

        let stats = scheduler.stats();
        assert_eq!(stats.flushes_completed, 1);
        assert!(stats.bytes_written > 0);
        scheduler.shutdown();
    }

    #[test]
    fn duplicate_triggers_for_one_memtable_yield_one_table() {
        let dir = TempDir::new().unwrap();
        let (memtables, levels, scheduler) = setup(&dir, 2);

        let sealed = force_rotation(&memtables, 0);
        // Hammer the scheduler with the same target from several
        // "trigger" sites; dedup plus the remove_specific contract must
        // collapse them to exactly one on-disk table.
        for _ in 0..5 {
            scheduler.schedule_flush(Arc::clone(&sealed), TaskPriority::Flush);
        }
        scheduler.schedule_flush(Arc::clone(&sealed), TaskPriority::UserInitiated);

        wait_until(5000, || memtables.immutable_count() == 0);
        // Give any straggler tasks time to resolve as already-handled.
        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(
            levels.files(0).unwrap().len(),
            1,
            "one immutable memtable ⇒ exactly one L0 table"
        );
        scheduler.shutdown();
    }

    #[test]
    fn two_rotations_give_two_l0_tables() {
        let dir = TempDir::new().unwrap();
        let (memtables, levels, scheduler) = setup(&dir, 2);

        let first = force_rotation(&memtables, 0);
        let second = force_rotation(&memtables, 10_000);
        scheduler.schedule_flush(first, TaskPriority::Flush);
        scheduler.schedule_flush(second, TaskPriority::Flush);

        wait_until(5000, || memtables.immutable_count() == 0);
        assert_eq!(levels.files(0).unwrap().len(), 2);

        let stats = scheduler.stats();
        assert_eq!(stats.flushes_completed, 2);
        scheduler.shutdown();
    }

    #[test]
    fn already_handled_flush_is_not_a_failure() {
        let dir = TempDir::new().unwrap();
        let (memtables, levels, scheduler) = setup(&dir, 1);

        let sealed = force_rotation(&memtables, 0);
        // Simulate the race winner having removed the memtable first.
        memtables.remove_specific(sealed.id()).unwrap();
        scheduler.schedule_flush(Arc::clone(&sealed), TaskPriority::Flush);

        wait_until(5000, || scheduler.stats().tasks_already_handled >= 1);
        let stats = scheduler.stats();
        assert_eq!(stats.tasks_failed, 0, "already-handled is not an error");
        assert!(
            levels.files(0).unwrap().len() <= 1,
            "no duplicate table may survive the race"
        );
        scheduler.shutdown();
    }

    #[test]
    fn probe_workers_is_a_noop_on_healthy_pool() {
        let dir = TempDir::new().unwrap();
        let (memtables, levels, scheduler) = setup(&dir, 2);

        scheduler.probe_workers();
        let sealed = force_rotation(&memtables, 0);
        scheduler.schedule_flush(sealed, TaskPriority::Flush);
        wait_until(5000, || memtables.immutable_count() == 0);
        assert_eq!(levels.files(0).unwrap().len(), 1);
        scheduler.shutdown();
    }
}
