#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::locks::{LockMode, SegmentedLockManager};

    #[test]
    fn multi_lock_sorts_and_dedups_segments() {
        let m = SegmentedLockManager::new(16, Duration::from_secs(5), true);
        let keys: Vec<&[u8]> = vec![b"zz", b"aa", b"mm", b"aa"];
        let guard = m.multi_lock(&keys, LockMode::Write, None).unwrap();

        let segs = guard.segments();
        assert!(segs.windows(2).all(|w| w[0] < w[1]), "ascending, deduped");
    }

    #[test]
    fn overlapping_multi_locks_never_deadlock() {
        // Two threads repeatedly lock overlapping key sets in opposite
        // textual order. The ascending-segment acquisition order makes
        // this safe regardless of how the caller lists the keys.
        let m = Arc::new(SegmentedLockManager::new(32, Duration::from_secs(5), true));

        let mut handles = Vec::new();
        for flip in [false, true] {
            let m = Arc::clone(&m);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let a = format!("shared-{}", i % 7).into_bytes();
                    let b = format!("shared-{}", (i + 3) % 7).into_bytes();
                    let keys: Vec<&[u8]> = if flip {
                        vec![&a, &b]
                    } else {
                        vec![&b, &a]
                    };
                    let guard = m.multi_lock(&keys, LockMode::Write, None).unwrap();
                    drop(guard);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn multi_lock_failure_releases_everything() {
        let m = Arc::new(SegmentedLockManager::new(16, Duration::from_secs(5), true));

        // Hold one segment hostage so the multi_lock times out.
        let hostage = m.lock(b"hostage", LockMode::Write, None).unwrap();

        let m2 = Arc::clone(&m);
        let res = thread::spawn(move || {
            let keys: Vec<&[u8]> = vec![b"free-1", b"free-2", b"hostage"];
            m2.multi_lock(&keys, LockMode::Write, Some(Duration::from_millis(50)))
                .map(|_| ())
        })
        .join()
        .unwrap();
        assert!(res.is_err());
        drop(hostage);

        // Every segment the failed multi_lock touched must be free again.
        let keys: Vec<&[u8]> = vec![b"free-1", b"free-2", b"hostage"];
        let _guard = m
            .multi_lock(&keys, LockMode::Write, Some(Duration::from_millis(200)))
            .unwrap();
    }
}
