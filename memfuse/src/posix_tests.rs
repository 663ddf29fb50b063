#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;

    use rand::Rng;

    use crate::fs::errors::FsError;
    use crate::fs::types::{InodeId, ROOT_INO, S_IFDIR, S_IFREG};
    use crate::fs::{BackendFs, MemFs};

    fn create_test_fs() -> Arc<MemFs> {
        Arc::new(MemFs::new())
    }

    fn file_mode() -> u32 {
        S_IFREG | 0o644
    }

    fn dir_mode() -> u32 {
        S_IFDIR | 0o755
    }

    fn entry_names(fs: &MemFs, dir: InodeId) -> Vec<Vec<u8>> {
        let (entries, _) = fs.readdir(dir, None, 0).unwrap();
        entries.into_iter().map(|d| d.name).collect()
    }

    #[test]
    fn test_concurrent_mkdir_rmdir() {
        let fs = create_test_fs();
        let testdir = fs.mkdir(ROOT_INO, b"testdir", dir_mode()).unwrap();

        // 16 threads create disjoint halves of 32 subdirectories.
        let mut workers = Vec::new();
        for t in 0..16u32 {
            let fs = Arc::clone(&fs);
            workers.push(thread::spawn(move || {
                for i in (t * 2)..(t * 2 + 2) {
                    let name = format!("subdir-{i}");
                    fs.mkdir(testdir.ino, name.as_bytes(), dir_mode()).unwrap();
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        let names = entry_names(&fs, testdir.ino);
        assert_eq!(names.len(), 34); // . and .. plus the 32 subdirectories
        for i in 0..32 {
            let name = format!("subdir-{i}");
            assert!(names.contains(&name.as_bytes().to_vec()));
        }
        assert_eq!(fs.stat(testdir.ino).unwrap().nlink, 2 + 32);

        // And 16 threads remove their own subsets again.
        let mut workers = Vec::new();
        for t in 0..16u32 {
            let fs = Arc::clone(&fs);
            workers.push(thread::spawn(move || {
                for i in (t * 2)..(t * 2 + 2) {
                    let name = format!("subdir-{i}");
                    fs.rmdir(testdir.ino, name.as_bytes()).unwrap();
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        let names = entry_names(&fs, testdir.ino);
        assert_eq!(names, vec![b".".to_vec(), b"..".to_vec()]);
        assert_eq!(fs.stat(testdir.ino).unwrap().nlink, 2);

        fs.rmdir(ROOT_INO, b"testdir").unwrap();
        assert_eq!(fs.stat(testdir.ino), Err(FsError::NotFound));
    }

    #[test]
    fn test_concurrent_readdirs() {
        let fs = create_test_fs();
        let testdir = fs.mkdir(ROOT_INO, b"testdir", dir_mode()).unwrap();
        let subdirs = [b"d1".as_slice(), b"d2", b"d6", b"d3", b"d5", b"d4"];
        for name in subdirs {
            fs.mkdir(testdir.ino, name, dir_mode()).unwrap();
        }

        let mut readers = Vec::new();
        for _ in 0..16 {
            let fs = Arc::clone(&fs);
            readers.push(thread::spawn(move || {
                let names = entry_names(&fs, testdir.ino);
                // Snapshot order is creation order, every time.
                let expected: Vec<Vec<u8>> = [b".".as_slice(), b".."]
                    .iter()
                    .chain(subdirs.iter())
                    .map(|n| n.to_vec())
                    .collect();
                assert_eq!(names, expected);
            }));
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_concurrent_reads_of_same_file() {
        let fs = create_test_fs();
        let mut rng = rand::thread_rng();
        let content: Vec<u8> = (0..8000).map(|_| rng.gen()).collect();

        let stat = fs.create(ROOT_INO, b"testfile", 0, file_mode()).unwrap();
        assert_eq!(fs.write(stat.ino, 0, &content).unwrap(), content.len());

        let mut readers = Vec::new();
        for _ in 0..4 {
            let fs = Arc::clone(&fs);
            let expected = content.clone();
            readers.push(thread::spawn(move || {
                let data = fs.read(stat.ino, 0, -1).unwrap();
                assert_eq!(&data[..], &expected[..]);
            }));
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_concurrent_writers_distinct_files() {
        let fs = create_test_fs();

        let mut writers = Vec::new();
        for w in 0..8u32 {
            let fs = Arc::clone(&fs);
            writers.push(thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let content: Vec<u8> = (0..4096).map(|_| rng.gen()).collect();
                let name = format!("testfile-{w}");

                let stat = fs.create(ROOT_INO, name.as_bytes(), 0, file_mode()).unwrap();
                fs.write(stat.ino, 0, &content).unwrap();

                let data = fs.read(stat.ino, 0, -1).unwrap();
                assert_eq!(&data[..], &content[..]);
                fs.release(stat.ino, 0).unwrap();
            }));
        }
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(entry_names(&fs, ROOT_INO).len(), 2 + 8);
    }

    #[test]
    fn test_concurrent_renames_single_winner() {
        let fs = create_test_fs();
        let stat = fs.create(ROOT_INO, b"old", 0, file_mode()).unwrap();

        let wins = Arc::new(AtomicU32::new(0));
        let mut racers = Vec::new();
        for _ in 0..16 {
            let fs = Arc::clone(&fs);
            let wins = Arc::clone(&wins);
            racers.push(thread::spawn(move || {
                match fs.rename(ROOT_INO, b"old", ROOT_INO, b"new") {
                    Ok(()) => {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => assert_eq!(e, FsError::NotFound),
                }
            }));
        }
        for racer in racers {
            racer.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(fs.lookup(ROOT_INO, b"old"), Err(FsError::NotFound));
        assert_eq!(fs.lookup(ROOT_INO, b"new").unwrap().ino, stat.ino);
    }

    #[test]
    fn test_rename_round_trip_restores_layout() {
        let fs = create_test_fs();
        let a = fs.mkdir(ROOT_INO, b"a", dir_mode()).unwrap();
        let b = fs.mkdir(ROOT_INO, b"b", dir_mode()).unwrap();
        let f = fs.create(a.ino, b"x", 0, file_mode()).unwrap();
        fs.write(f.ino, 0, b"payload").unwrap();

        fs.rename(a.ino, b"x", b.ino, b"y").unwrap();
        fs.rename(b.ino, b"y", a.ino, b"x").unwrap();

        assert_eq!(fs.lookup(a.ino, b"x").unwrap().ino, f.ino);
        assert_eq!(entry_names(&fs, b.ino), vec![b".".to_vec(), b"..".to_vec()]);
        assert_eq!(&fs.read(f.ino, 0, -1).unwrap()[..], b"payload");
    }

    #[test]
    fn test_mkdir_rmdir_returns_to_initial_entries() {
        let fs = create_test_fs();
        let d = fs.mkdir(ROOT_INO, b"d", dir_mode()).unwrap();
        let before = entry_names(&fs, d.ino);
        let nlink_before = fs.stat(d.ino).unwrap().nlink;

        fs.mkdir(d.ino, b"e1", dir_mode()).unwrap();
        fs.mkdir(d.ino, b"e2", dir_mode()).unwrap();
        fs.rmdir(d.ino, b"e1").unwrap();
        fs.rmdir(d.ino, b"e2").unwrap();

        assert_eq!(entry_names(&fs, d.ino), before);
        assert_eq!(fs.stat(d.ino).unwrap().nlink, nlink_before);
    }

    #[test]
    fn test_path_prefixes_resolve() {
        let fs = create_test_fs();
        let a = fs.mkdir(ROOT_INO, b"a", dir_mode()).unwrap();
        let b = fs.mkdir(a.ino, b"b", dir_mode()).unwrap();
        let c = fs.mkdir(b.ino, b"c", dir_mode()).unwrap();
        let f = fs.create(c.ino, b"f", 0, file_mode()).unwrap();

        // Walk /a/b/c/f one component at a time; every prefix resolves
        // and the terminal inode matches the dirent that named it.
        let mut dir = ROOT_INO;
        for (name, expected) in [
            (b"a".as_slice(), a.ino),
            (b"b", b.ino),
            (b"c", c.ino),
            (b"f", f.ino),
        ] {
            let stat = fs.lookup(dir, name).unwrap();
            assert_eq!(stat.ino, expected);
            dir = stat.ino;
        }
    }

    #[test]
    fn test_directory_nlink_tracks_subdirectories() {
        let fs = create_test_fs();
        let d = fs.mkdir(ROOT_INO, b"d", dir_mode()).unwrap();

        for i in 0..5 {
            let name = format!("sub-{i}");
            fs.mkdir(d.ino, name.as_bytes(), dir_mode()).unwrap();
            // Files must not contribute to the directory link count.
            let fname = format!("file-{i}");
            fs.create(d.ino, fname.as_bytes(), 0, file_mode()).unwrap();
            assert_eq!(fs.stat(d.ino).unwrap().nlink, 2 + (i as u32 + 1));
        }
    }

    #[test]
    fn test_write_offsets_last_writer_wins() {
        let fs = create_test_fs();
        let stat = fs.create(ROOT_INO, b"f", 0, file_mode()).unwrap();

        fs.write(stat.ino, 0, b"aaaa").unwrap();
        fs.write(stat.ino, 2, b"bb").unwrap();
        fs.write(stat.ino, 6, b"cc").unwrap();

        let data = fs.read(stat.ino, 0, -1).unwrap();
        assert_eq!(&data[..], b"aabb\0\0cc");
        assert_eq!(fs.stat(stat.ino).unwrap().size, 8);
    }
}
