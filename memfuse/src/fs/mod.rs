pub mod errors;
pub mod inode;
pub mod listmap;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use self::errors::{FsError, FsResult};
use self::inode::{InodeState, MemInode};
use self::types::{
    Dirent, FileKind, FileStat, InodeId, SetAttributes, ROOT_INO, S_IFDIR, S_IFMT, S_IFREG,
};

/// The backend filesystem contract consumed by the protocol adapter.
/// The in-memory store below is the only implementation today; a disk
/// backend would slot in behind the same trait.
pub trait BackendFs: Send + Sync {
    fn stat(&self, ino: InodeId) -> FsResult<FileStat>;
    fn open(&self, ino: InodeId, flags: i32) -> FsResult<()>;
    fn create(&self, parent: InodeId, name: &[u8], flags: i32, mode: u32) -> FsResult<FileStat>;
    fn mkdir(&self, parent: InodeId, name: &[u8], mode: u32) -> FsResult<FileStat>;
    fn rmdir(&self, parent: InodeId, name: &[u8]) -> FsResult<()>;
    fn unlink(&self, parent: InodeId, name: &[u8]) -> FsResult<()>;
    fn rename(
        &self,
        src_parent: InodeId,
        src_name: &[u8],
        dst_parent: InodeId,
        dst_name: &[u8],
    ) -> FsResult<()>;
    fn link(&self, old_ino: InodeId, new_parent: InodeId, new_name: &[u8]) -> FsResult<FileStat>;
    fn setattr(&self, ino: InodeId, attrs: &SetAttributes) -> FsResult<FileStat>;
    fn lookup(&self, parent: InodeId, name: &[u8]) -> FsResult<FileStat>;
    #[allow(clippy::type_complexity)]
    fn readdir(
        &self,
        ino: InodeId,
        marker: Option<&[u8]>,
        n: usize,
    ) -> FsResult<(Vec<Dirent>, Option<Vec<u8>>)>;
    fn read(&self, ino: InodeId, offset: u64, n: i64) -> FsResult<Bytes>;
    fn write(&self, ino: InodeId, offset: u64, data: &[u8]) -> FsResult<usize>;
    fn fsync(&self, ino: InodeId, datasync: bool, is_dir: bool) -> FsResult<()>;
    fn flush(&self, ino: InodeId) -> FsResult<()>;
    fn release(&self, ino: InodeId, flags: i32) -> FsResult<()>;
}

/// The in-memory backend store. Owns the inode table and the inode
/// number allocator; the table lock is held only to insert, remove or
/// look up an inode, never across an inode operation.
pub struct MemFs {
    table: Mutex<InodeTable>,
}

struct InodeTable {
    next_ino: InodeId,
    inodes: HashMap<InodeId, Arc<MemInode>>,
}

impl MemFs {
    pub fn new() -> Self {
        let mut inodes = HashMap::new();
        inodes.insert(
            ROOT_INO,
            Arc::new(MemInode::new_dir(ROOT_INO, S_IFDIR | 0o777, ROOT_INO)),
        );
        Self {
            table: Mutex::new(InodeTable {
                // 0 is reserved for signalling errors, 1 is the root.
                next_ino: 2,
                inodes,
            }),
        }
    }

    pub(super) fn allocate_ino(&self) -> InodeId {
        let mut table = self.table.lock();
        let ino = table.next_ino;
        table.next_ino += 1;
        ino
    }

    fn load_inode(&self, ino: InodeId) -> FsResult<Arc<MemInode>> {
        self.table
            .lock()
            .inodes
            .get(&ino)
            .cloned()
            .ok_or(FsError::NotFound)
    }

    fn store_inode(&self, inode: Arc<MemInode>) {
        self.table.lock().inodes.insert(inode.ino(), inode);
    }

    fn remove_inode(&self, ino: InodeId) {
        self.table.lock().inodes.remove(&ino);
    }

    /// The common removal step shared by unlink, rmdir and the
    /// destination-replacement half of rename. Drops the parent's entry,
    /// decrements the child's link count, and removes the child from the
    /// table once neither a link nor an open handle keeps it alive.
    fn remove_child_locked(
        &self,
        pstate: &mut InodeState,
        child: &MemInode,
        cstate: &mut InodeState,
        name: &[u8],
    ) -> FsResult<()> {
        pstate.remove_dirent(name)?;

        if cstate.nlink == 0 {
            warn!(
                "remove {}: nlink of inode {} is already 0",
                String::from_utf8_lossy(name),
                child.ino()
            );
        } else {
            cstate.nlink -= 1;
            cstate.ctime = std::time::SystemTime::now();
        }

        if cstate.nlink == 0 && cstate.count == 0 {
            self.remove_inode(child.ino());
        }
        Ok(())
    }

    /// Unlink with the parent already locked. Used by `unlink` and by
    /// rename when it replaces a regular file.
    fn unlink_locked(&self, pstate: &mut InodeState, name: &[u8]) -> FsResult<()> {
        let dirent = pstate.get_dirent(name)?;
        let child = self.load_inode(dirent.ino)?;
        let mut cstate = child.lock();
        self.remove_child_locked(pstate, &child, &mut cstate, name)
    }

    /// Rmdir with the parent already locked. Used by `rmdir` and by
    /// rename when it replaces a directory. Removing the child's `..`
    /// gives back the link it held on the parent.
    fn rmdir_locked(&self, pstate: &mut InodeState, name: &[u8]) -> FsResult<()> {
        let dirent = pstate.get_dirent(name)?;
        if !dirent.kind.is_dir() {
            return Err(FsError::NotDirectory);
        }

        let child = self.load_inode(dirent.ino)?;
        let mut cstate = child.lock();
        if cstate.dirents.len() > 2 {
            // The directory contains entries other than . and ..
            return Err(FsError::NotEmpty);
        }

        cstate.dirents.remove(b"..".as_slice());
        pstate.nlink = pstate.nlink.saturating_sub(1);
        cstate.dirents.remove(b".".as_slice());
        cstate.nlink = cstate.nlink.saturating_sub(1);

        self.remove_child_locked(pstate, &child, &mut cstate, name)
    }

    /// The dirent-level rename steps, with every involved directory lock
    /// already held. `dst` is `None` when source and destination are the
    /// same directory.
    fn rename_locked(
        &self,
        src: &mut InodeState,
        mut dst: Option<&mut InodeState>,
        src_name: &[u8],
        dst_name: &[u8],
    ) -> FsResult<()> {
        let sdirent = src.get_dirent(src_name)?;

        let ddirent = {
            let d: &InodeState = dst.as_deref().unwrap_or(&*src);
            match d.get_dirent(dst_name) {
                Ok(dirent) => Some(dirent),
                Err(FsError::NotFound) => None,
                Err(e) => return Err(e),
            }
        };

        if let Some(ref ddirent) = ddirent {
            if ddirent.ino == sdirent.ino {
                // Both paths are hard links to the same file; rename
                // does nothing and reports success.
                return Ok(());
            }
            if !sdirent.kind.is_dir() && ddirent.kind.is_dir() {
                return Err(FsError::IsDirectory);
            }
            if sdirent.kind.is_dir() && !ddirent.kind.is_dir() {
                return Err(FsError::NotDirectory);
            }

            let d: &mut InodeState = dst.as_deref_mut().unwrap_or(&mut *src);
            if ddirent.kind.is_dir() {
                self.rmdir_locked(d, dst_name)?;
            } else {
                self.unlink_locked(d, dst_name)?;
            }
        }

        {
            let d: &mut InodeState = dst.as_deref_mut().unwrap_or(&mut *src);
            d.add_dirent(self, sdirent.ino, dst_name, sdirent.kind)?;
        }
        src.remove_dirent(src_name)?;
        Ok(())
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendFs for MemFs {
    fn stat(&self, ino: InodeId) -> FsResult<FileStat> {
        let inode = self.load_inode(ino)?;
        let state = inode.lock();
        Ok(state.stat(ino))
    }

    fn open(&self, ino: InodeId, _flags: i32) -> FsResult<()> {
        let inode = self.load_inode(ino)?;
        let mut state = inode.lock();
        state.reference();
        Ok(())
    }

    fn create(&self, parent: InodeId, name: &[u8], _flags: i32, mode: u32) -> FsResult<FileStat> {
        let mode = (mode & !S_IFMT) | S_IFREG;
        let dir = self.load_inode(parent)?;
        let mut pstate = dir.lock();

        let child_ino = pstate.add_dirent(self, 0, name, FileKind::Regular)?;
        let child = Arc::new(MemInode::new_file(child_ino, mode));
        let stat = {
            let mut cstate = child.lock();
            cstate.reference();
            cstate.stat(child_ino)
        };
        self.store_inode(child);
        Ok(stat)
    }

    fn mkdir(&self, parent: InodeId, name: &[u8], mode: u32) -> FsResult<FileStat> {
        let mode = (mode & !S_IFMT) | S_IFDIR;
        let dir = self.load_inode(parent)?;
        let mut pstate = dir.lock();

        let child_ino = pstate.add_dirent(self, 0, name, FileKind::Directory)?;
        let child = Arc::new(MemInode::new_dir(child_ino, mode, parent));
        // The new directory's `..` holds a link on the parent.
        pstate.nlink += 1;
        let stat = child.lock().stat(child_ino);
        self.store_inode(child);
        Ok(stat)
    }

    fn rmdir(&self, parent: InodeId, name: &[u8]) -> FsResult<()> {
        if name == b"." || name == b".." {
            return Err(FsError::InvalidArgument);
        }
        let dir = self.load_inode(parent)?;
        let mut pstate = dir.lock();
        self.rmdir_locked(&mut pstate, name)
    }

    fn unlink(&self, parent: InodeId, name: &[u8]) -> FsResult<()> {
        if name == b"." || name == b".." {
            return Err(FsError::InvalidArgument);
        }
        let dir = self.load_inode(parent)?;
        let mut pstate = dir.lock();
        self.unlink_locked(&mut pstate, name)
    }

    fn rename(
        &self,
        src_parent: InodeId,
        src_name: &[u8],
        dst_parent: InodeId,
        dst_name: &[u8],
    ) -> FsResult<()> {
        if src_name.is_empty() || dst_name.is_empty() {
            return Err(FsError::InvalidArgument);
        }
        if src_name == b"." || src_name == b".." {
            return Err(FsError::InvalidArgument);
        }
        if dst_name == b"." || dst_name == b".." {
            return Err(FsError::Exists);
        }

        debug!(
            "rename: <{}, {}> -> <{}, {}>",
            src_parent,
            String::from_utf8_lossy(src_name),
            dst_parent,
            String::from_utf8_lossy(dst_name)
        );

        let src_dir = self.load_inode(src_parent)?;
        let dst_dir = self.load_inode(dst_parent)?;

        // Lock order is dictated by the inode numbers so concurrent
        // renames in opposite directions cannot deadlock. Equal numbers
        // mean a single directory and a single lock.
        if src_parent == dst_parent {
            let mut state = src_dir.lock();
            self.rename_locked(&mut state, None, src_name, dst_name)
        } else if src_parent < dst_parent {
            let mut sstate = src_dir.lock();
            let mut dstate = dst_dir.lock();
            self.rename_locked(&mut sstate, Some(&mut *dstate), src_name, dst_name)
        } else {
            let mut dstate = dst_dir.lock();
            let mut sstate = src_dir.lock();
            self.rename_locked(&mut sstate, Some(&mut *dstate), src_name, dst_name)
        }
    }

    fn link(&self, old_ino: InodeId, new_parent: InodeId, new_name: &[u8]) -> FsResult<FileStat> {
        // Linking a directory inside itself would self-deadlock below;
        // directory links are otherwise left to the kernel to police.
        if old_ino == new_parent {
            return Err(FsError::InvalidArgument);
        }

        let dir = self.load_inode(new_parent)?;
        let old = self.load_inode(old_ino)?;
        let mut pstate = dir.lock();
        if pstate.dirents.contains(new_name) {
            return Err(FsError::Exists);
        }

        let mut ostate = old.lock();
        let kind = ostate.kind();
        pstate.add_dirent(self, old_ino, new_name, kind)?;
        ostate.nlink += 1;
        ostate.ctime = std::time::SystemTime::now();
        Ok(ostate.stat(old_ino))
    }

    fn setattr(&self, ino: InodeId, attrs: &SetAttributes) -> FsResult<FileStat> {
        let inode = self.load_inode(ino)?;
        let mut state = inode.lock();
        state.setattr(ino, attrs)
    }

    fn lookup(&self, parent: InodeId, name: &[u8]) -> FsResult<FileStat> {
        let dir = self.load_inode(parent)?;
        let pstate = dir.lock();
        let dirent = pstate.get_dirent(name)?;

        // `.`, and `..` on the root, resolve to the directory we already
        // hold locked; taking its lock again would deadlock.
        if dirent.ino == parent {
            return Ok(pstate.stat(parent));
        }

        let child = self.load_inode(dirent.ino)?;
        let cstate = child.lock();
        Ok(cstate.stat(dirent.ino))
    }

    fn readdir(
        &self,
        ino: InodeId,
        marker: Option<&[u8]>,
        n: usize,
    ) -> FsResult<(Vec<Dirent>, Option<Vec<u8>>)> {
        if marker.is_some_and(|m| !m.is_empty()) || n > 0 {
            // Pagination is an extension point for larger backends; the
            // in-memory store always returns the full snapshot.
            return Err(FsError::NotSupported);
        }

        let inode = self.load_inode(ino)?;
        let state = inode.lock();
        Ok((state.readdir(), None))
    }

    fn read(&self, ino: InodeId, offset: u64, n: i64) -> FsResult<Bytes> {
        let inode = self.load_inode(ino)?;
        let state = inode.lock();
        Ok(state.read(offset, n))
    }

    fn write(&self, ino: InodeId, offset: u64, data: &[u8]) -> FsResult<usize> {
        let inode = self.load_inode(ino)?;
        let mut state = inode.lock();
        Ok(state.write(offset, data))
    }

    fn fsync(&self, _ino: InodeId, _datasync: bool, _is_dir: bool) -> FsResult<()> {
        Ok(())
    }

    fn flush(&self, _ino: InodeId) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    fn release(&self, ino: InodeId, _flags: i32) -> FsResult<()> {
        let inode = self.load_inode(ino)?;
        let mut state = inode.lock();
        if state.release_one() {
            self.remove_inode(ino);
        }
        Ok(())
    }
}
