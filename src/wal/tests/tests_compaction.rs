#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::config::WalConfig;
    use crate::wal::{CompactOutcome, OpKind, Wal, WalRecord};

    fn config() -> WalConfig {
        WalConfig {
            segment_size_mb: 64,
            sync_on_append: true,
            compact_ratio: 0.3,
            ..WalConfig::default()
        }
    }

    #[test]
    fn forced_compaction_keeps_latest_record_per_key() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), config()).unwrap();
        wal.replay(|_| Ok(())).unwrap();

        // Overwrite three keys many times, delete one of them last.
        let mut seq = 0u64;
        for round in 0..20u64 {
            for key in [b"alpha".as_slice(), b"beta".as_slice(), b"gamma".as_slice()] {
                seq += 1;
                wal.append(&WalRecord::put(
                    seq,
                    key.to_vec(),
                    format!("round-{round}").into_bytes(),
                ))
                .unwrap();
            }
        }
        seq += 1;
        wal.append(&WalRecord::delete(seq, b"beta".to_vec())).unwrap();

        let outcome = wal.compact(true).unwrap();
        assert_eq!(
            outcome,
            CompactOutcome::Compacted {
                before: 61,
                after: 3
            }
        );

        // Replaying the compacted log yields exactly the live state:
        // the latest Put per key, plus the tombstone for beta.
        let mut replayed = Vec::new();
        wal.replay(|record| {
            replayed.push(record);
            Ok(())
        })
        .unwrap();

        assert_eq!(replayed.len(), 3);
        let alpha = replayed.iter().find(|r| r.key == b"alpha").unwrap();
        assert_eq!(alpha.kind, OpKind::Put);
        assert_eq!(alpha.value, b"round-19");
        let beta = replayed.iter().find(|r| r.key == b"beta").unwrap();
        assert_eq!(beta.kind, OpKind::Delete);
        let gamma = replayed.iter().find(|r| r.key == b"gamma").unwrap();
        assert_eq!(gamma.value, b"round-19");
    }

    #[test]
    fn compaction_skips_when_mostly_live() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), config()).unwrap();
        wal.replay(|_| Ok(())).unwrap();

        // All-distinct keys: live ratio is 1.0, far above the threshold.
        for i in 0..50u64 {
            wal.append(&WalRecord::put(
                i + 1,
                format!("unique-{i}").into_bytes(),
                b"v".to_vec(),
            ))
            .unwrap();
        }
        assert_eq!(wal.compact(false).unwrap(), CompactOutcome::Skipped);
    }

    #[test]
    fn compaction_retires_old_segment_files() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open(dir.path(), config()).unwrap();
        wal.replay(|_| Ok(())).unwrap();

        for i in 0..30u64 {
            wal.append(&WalRecord::put(i + 1, b"same-key".to_vec(), vec![i as u8]))
                .unwrap();
        }
        wal.compact(true).unwrap();

        // Only the freshly written compacted segment remains on disk.
        let segments: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with("segment-"))
            })
            .collect();
        assert_eq!(segments.len(), 1);
        assert_eq!(wal.stats().unwrap().total_records, 1);
    }
}
