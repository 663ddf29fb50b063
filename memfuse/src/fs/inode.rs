use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};

use super::errors::{FsError, FsResult};
use super::listmap::ListMap;
use super::types::{Dirent, FileKind, FileStat, InodeId, SetAttributes, BLOCK_SIZE, S_IFMT};
use super::MemFs;

/// One file or directory. The inode number is fixed at creation; all
/// mutable state sits behind a single mutex so operations on the same
/// inode serialise while operations on different inodes run in parallel.
pub struct MemInode {
    ino: InodeId,
    state: Mutex<InodeState>,
}

pub struct InodeState {
    pub(super) mode: u32,

    /// Number of directory entries referring to this inode.
    pub(super) nlink: u32,

    /// Number of live open handles. An unlinked inode stays in the table
    /// while this is non-zero, so reads and writes through an already
    /// open handle keep working after unlink.
    pub(super) count: u32,

    // atime >= mtime and ctime >= mtime at all times; crtime is fixed.
    pub(super) atime: SystemTime,
    pub(super) mtime: SystemTime,
    pub(super) ctime: SystemTime,
    pub(super) crtime: SystemTime,

    /// Directory entries, in creation order. Only meaningful for
    /// directories.
    pub(super) dirents: ListMap<Vec<u8>, Dirent>,

    /// File content. Only meaningful for regular files.
    pub(super) data: Vec<u8>,
}

impl MemInode {
    /// A regular file inode: one link (the parent's entry), no handles.
    pub fn new_file(ino: InodeId, mode: u32) -> Self {
        Self {
            ino,
            state: Mutex::new(InodeState::new(mode)),
        }
    }

    /// A directory inode with its `.` and `..` entries in place. The
    /// link count starts at 2: the parent's entry for this directory
    /// plus its own `.`. The caller bumps the parent's nlink for the
    /// `..` reference; the root points `..` at itself.
    pub fn new_dir(ino: InodeId, mode: u32, parent_ino: InodeId) -> Self {
        let mut state = InodeState::new(mode);
        state.nlink = 2;
        state.dirents.put(
            b".".to_vec(),
            Dirent {
                ino,
                name: b".".to_vec(),
                kind: FileKind::Directory,
            },
        );
        state.dirents.put(
            b"..".to_vec(),
            Dirent {
                ino: parent_ino,
                name: b"..".to_vec(),
                kind: FileKind::Directory,
            },
        );
        Self {
            ino,
            state: Mutex::new(state),
        }
    }

    pub fn ino(&self) -> InodeId {
        self.ino
    }

    /// Acquires the inode lock. Taking the lock stamps atime, a coarse
    /// approximation of Unix access-time semantics.
    pub fn lock(&self) -> MutexGuard<'_, InodeState> {
        let mut state = self.state.lock();
        state.atime = SystemTime::now();
        state
    }
}

impl InodeState {
    fn new(mode: u32) -> Self {
        let crtime = SystemTime::now();
        Self {
            mode,
            nlink: 1,
            count: 0,
            atime: crtime,
            mtime: crtime,
            ctime: crtime,
            crtime,
            dirents: ListMap::new(),
            data: Vec::new(),
        }
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    pub fn is_dir(&self) -> bool {
        self.kind().is_dir()
    }

    /// Adds a directory entry. With `ino == 0` a fresh inode number is
    /// drawn from the store (the `create`/`mkdir` path); a non-zero
    /// `ino` reuses an existing inode (the `link`/`rename` path).
    pub fn add_dirent(
        &mut self,
        fs: &MemFs,
        ino: InodeId,
        name: &[u8],
        kind: FileKind,
    ) -> FsResult<InodeId> {
        if self.dirents.contains(name) {
            return Err(FsError::Exists);
        }

        let ino = if ino == 0 { fs.allocate_ino() } else { ino };
        self.dirents.put(
            name.to_vec(),
            Dirent {
                ino,
                name: name.to_vec(),
                kind,
            },
        );

        self.mtime = SystemTime::now();
        self.ctime = self.mtime;
        Ok(ino)
    }

    pub fn get_dirent(&self, name: &[u8]) -> FsResult<Dirent> {
        self.dirents.get(name).cloned().ok_or(FsError::NotFound)
    }

    pub fn remove_dirent(&mut self, name: &[u8]) -> FsResult<InodeId> {
        let dirent = self.dirents.remove(name).ok_or(FsError::NotFound)?;
        self.mtime = SystemTime::now();
        self.ctime = self.mtime;
        Ok(dirent.ino)
    }

    /// A snapshot of all entries in creation order.
    pub fn readdir(&self) -> Vec<Dirent> {
        self.dirents.values().cloned().collect()
    }

    /// Reads `[offset, offset + n)` clipped to the file size. `n <= 0`
    /// or `n` reaching past the end both mean "to the end".
    pub fn read(&self, offset: u64, n: i64) -> Bytes {
        let len = self.data.len();
        let start = offset as usize;
        if start >= len {
            return Bytes::new();
        }
        let avail = len - start;
        let take = if n <= 0 || n as usize >= avail {
            avail
        } else {
            n as usize
        };
        Bytes::copy_from_slice(&self.data[start..start + take])
    }

    /// Writes `data` at `offset`. A gap between the current end of file
    /// and `offset` is zero-filled; bytes beyond the written range are
    /// left untouched. Returns the number of bytes written.
    pub fn write(&mut self, offset: u64, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }

        let start = offset as usize;
        let end = start + data.len();
        if self.data.len() < start {
            self.data.resize(start, 0);
        }
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);

        self.mtime = SystemTime::now();
        self.ctime = self.mtime;
        data.len()
    }

    /// Applies the given attribute subset. `uid`/`gid` are rejected
    /// before anything else is touched, so a rejected request leaves the
    /// inode unchanged.
    pub fn setattr(&mut self, ino: InodeId, attrs: &SetAttributes) -> FsResult<FileStat> {
        if attrs.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        if attrs.uid.is_some() || attrs.gid.is_some() {
            return Err(FsError::NotSupported);
        }

        if let Some(mode) = attrs.mode {
            self.mode = (self.mode & S_IFMT) | (mode & !S_IFMT);
            self.ctime = SystemTime::now();
        }

        if let Some(atime) = attrs.atime {
            self.atime = atime;
            self.ctime = SystemTime::now();
        }

        if let Some(mtime) = attrs.mtime {
            self.mtime = mtime;
            self.ctime = SystemTime::now();
        }

        if let Some(size) = attrs.size {
            if self.is_dir() {
                return Err(FsError::IsDirectory);
            }
            self.data.resize(size as usize, 0);
            self.mtime = SystemTime::now();
            self.ctime = self.mtime;
        }

        Ok(self.stat(ino))
    }

    /// Records a new open handle.
    pub fn reference(&mut self) {
        self.count += 1;
    }

    /// Drops one open handle (the count never goes below zero). Returns
    /// true when the inode has become unreachable and should leave the
    /// table.
    pub fn release_one(&mut self) -> bool {
        if self.count > 0 {
            self.count -= 1;
        }
        self.nlink == 0 && self.count == 0
    }

    pub fn stat(&self, ino: InodeId) -> FileStat {
        let size = self.data.len() as u64;
        FileStat {
            ino,
            mode: self.mode,
            nlink: self.nlink,
            uid: 0,
            gid: 0,
            size,
            blksize: BLOCK_SIZE as u32,
            blocks: size.div_ceil(BLOCK_SIZE),
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            crtime: self.crtime,
        }
    }
}
