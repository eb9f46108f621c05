//! Shared fixtures for engine tests.

use std::time::{Duration, Instant};

use crate::config::StoreConfig;

/// Config with a tiny memtable so rotations and flushes trigger fast,
/// and a high L0 limit so flush tests are not disturbed by merges.
pub(crate) fn small_config() -> StoreConfig {
    let mut config = StoreConfig::default();
    config.memtable.max_bytes = 2048;
    config.memtable.immutable_queue_depth = 8;
    config.compaction.worker_count = 2;
    config.compaction.l0_file_limit = 100;
    config
}

/// Polls `done` until it holds or `deadline_ms` elapses.
pub(crate) fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_millis(deadline_ms);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(10));
    }
}
