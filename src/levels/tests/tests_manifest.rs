#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    use tempfile::TempDir;

    use crate::levels::tests::helpers::make_table;
    use crate::levels::{LevelManager, LevelsError, MANIFEST_NAME};

    #[test]
    fn state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let (l0_id, l1_id) = {
            let manager = LevelManager::open(dir.path()).unwrap();
            let l0 = make_table(&manager, 0, &[b"a", b"m"], 1);
            let l1 = make_table(&manager, 1, &[b"n", b"z"], 10);
            (l0.id, l1.id)
        };

        let manager = LevelManager::open(dir.path()).unwrap();
        assert_eq!(manager.files(0).unwrap()[0].id, l0_id);
        assert_eq!(manager.files(1).unwrap()[0].id, l1_id);
    }

    #[test]
    fn id_counter_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let first = {
            let manager = LevelManager::open(dir.path()).unwrap();
            make_table(&manager, 0, &[b"a"], 1).id
        };

        let manager = LevelManager::open(dir.path()).unwrap();
        let second = make_table(&manager, 0, &[b"b"], 2).id;
        assert!(
            second.counter > first.counter,
            "counter must be monotonic across restarts"
        );
    }

    #[test]
    fn replay_watermark_persists_and_is_monotonic() {
        let dir = TempDir::new().unwrap();
        {
            let manager = LevelManager::open(dir.path()).unwrap();
            assert_eq!(manager.replay_watermark(), 0);

            manager.advance_replay_watermark(42).unwrap();
            assert_eq!(manager.replay_watermark(), 42);

            // A lower value (a flush worker losing the compute/advance
            // race) must never move the mark backwards.
            manager.advance_replay_watermark(17).unwrap();
            assert_eq!(manager.replay_watermark(), 42);
        }

        let manager = LevelManager::open(dir.path()).unwrap();
        assert_eq!(manager.replay_watermark(), 42);
    }

    #[test]
    fn orphan_table_files_are_swept_on_open() {
        let dir = TempDir::new().unwrap();
        {
            let manager = LevelManager::open(dir.path()).unwrap();
            make_table(&manager, 0, &[b"a"], 1);
            // A reservation that never got registered (crashed flush).
            let (_, path) = manager.allocate_file(0).unwrap();
            assert!(path.exists());
            // A leftover partial build.
            std::fs::write(manager.sst_dir().join("level-0-9-9-9.tmp"), b"junk").unwrap();
        }

        let manager = LevelManager::open(dir.path()).unwrap();
        let on_disk = std::fs::read_dir(manager.sst_dir()).unwrap().count();
        assert_eq!(on_disk, 1, "only the registered table should remain");
    }

    #[test]
    fn missing_listed_file_fails_open() {
        let dir = TempDir::new().unwrap();
        let meta = {
            let manager = LevelManager::open(dir.path()).unwrap();
            make_table(&manager, 0, &[b"a"], 1)
        };
        std::fs::remove_file(
            dir.path()
                .join("sst")
                .join(crate::levels::table_file_name(0, meta.id)),
        )
        .unwrap();

        assert!(matches!(
            LevelManager::open(dir.path()).unwrap_err(),
            LevelsError::MissingFile(_)
        ));
    }

    #[test]
    fn corrupt_manifest_fails_open() {
        let dir = TempDir::new().unwrap();
        {
            let manager = LevelManager::open(dir.path()).unwrap();
            make_table(&manager, 0, &[b"a"], 1);
        }

        let path = dir.path().join(MANIFEST_NAME);
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(8)).unwrap();
        file.write_all(&[0xEE, 0xEE]).unwrap();
        file.sync_all().unwrap();

        assert!(matches!(
            LevelManager::open(dir.path()).unwrap_err(),
            LevelsError::CorruptManifest(_)
        ));
    }
}
