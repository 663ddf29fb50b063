pub mod errors;
pub mod handle;
pub mod node;

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use tracing::{debug, info, warn};

use self::errors::{FuseError, FuseResult};
use self::handle::{HandleTable, OpenHandle};
use self::node::NodeCache;
use crate::fs::types::{FileKind, FileStat, SetAttributes, ROOT_INO};
use crate::fs::BackendFs;

/// Validity hint on attribute replies so the kernel caches them.
const ATTR_TTL: Duration = Duration::from_secs(60);

/// Inode numbers are never reused, so a single generation suffices.
const GENERATION: u64 = 0;

/// The protocol adapter: translates FUSE requests into backend calls and
/// backend results into typed replies. Node-addressed requests resolve
/// through the node cache; read/write/release go through the open-handle
/// table.
pub struct FuseFs {
    back: Arc<dyn BackendFs>,
    nodes: NodeCache,
    handles: HandleTable,
}

impl FuseFs {
    pub fn new(back: Arc<dyn BackendFs>) -> Self {
        let nodes = NodeCache::new();
        // The kernel addresses the root without a prior lookup and never
        // forgets it; seed its node up front.
        nodes.load_node(ROOT_INO, None);
        Self {
            back,
            nodes,
            handles: HandleTable::new(),
        }
    }

    fn do_read(&self, fh: u64, offset: i64, size: u32) -> FuseResult<Bytes> {
        let handle = self.handles.get(fh).ok_or(FuseError::BadHandle)?;
        if !handle.readable() {
            return Err(FuseError::BadHandle);
        }
        Ok(self.back.read(handle.ino, offset.max(0) as u64, size as i64)?)
    }

    fn do_write(&self, fh: u64, pid: u32, offset: i64, data: &[u8]) -> FuseResult<usize> {
        let handle = self.handles.get(fh).ok_or(FuseError::BadHandle)?;
        if !handle.writable() {
            return Err(FuseError::BadHandle);
        }
        if pid != handle.pid {
            // A handle only accepts writes from the process that opened
            // it; see the design notes on handle authorship.
            warn!(
                "write denied: writer pid {} is not the handle creator pid {}",
                pid, handle.pid
            );
            return Err(FuseError::NotHandleOwner);
        }
        Ok(self.back.write(handle.ino, offset.max(0) as u64, data)?)
    }

    fn do_flush(&self, fh: u64) -> FuseResult<()> {
        let handle = self.handles.get(fh).ok_or(FuseError::BadHandle)?;
        Ok(self.back.flush(handle.ino)?)
    }

    fn do_release(&self, fh: u64, flags: i32) -> FuseResult<()> {
        let handle = self.handles.remove(fh).ok_or(FuseError::BadHandle)?;
        let access = flags & libc::O_ACCMODE;
        if access != handle.flags {
            warn!(
                "release: access bits {:#o} differ from the open-time bits {:#o}",
                access, handle.flags
            );
        }
        Ok(self.back.release(handle.ino, handle.flags)?)
    }

    fn do_fsync(&self, fh: u64, datasync: bool, is_dir: bool) -> FuseResult<()> {
        let handle = self.handles.get(fh).ok_or(FuseError::BadHandle)?;
        Ok(self.back.fsync(handle.ino, datasync, is_dir)?)
    }

    fn reply_entry(&self, stat: &FileStat, reply: ReplyEntry) {
        self.nodes.load_node(stat.ino, Some(stat));
        reply.entry(&ATTR_TTL, &to_file_attr(stat), GENERATION);
    }
}

fn name_bytes(name: &OsStr) -> &[u8] {
    name.as_bytes()
}

fn to_file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::Regular => FileType::RegularFile,
        FileKind::Directory => FileType::Directory,
    }
}

fn to_file_attr(stat: &FileStat) -> FileAttr {
    FileAttr {
        ino: stat.ino,
        size: stat.size,
        blocks: stat.blocks,
        atime: stat.atime,
        mtime: stat.mtime,
        ctime: stat.ctime,
        crtime: stat.crtime,
        kind: to_file_type(stat.kind()),
        perm: (stat.mode & 0o7777) as u16,
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        rdev: 0,
        blksize: stat.blksize,
        flags: 0,
    }
}

fn set_attributes(
    mode: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    size: Option<u64>,
    atime: Option<TimeOrNow>,
    mtime: Option<TimeOrNow>,
) -> SetAttributes {
    SetAttributes {
        mode,
        uid,
        gid,
        size,
        atime: atime.map(resolve_time),
        mtime: mtime.map(resolve_time),
    }
}

fn resolve_time(t: TimeOrNow) -> SystemTime {
    match t {
        TimeOrNow::SpecificTime(t) => t,
        TimeOrNow::Now => SystemTime::now(),
    }
}

impl Filesystem for FuseFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        info!("filesystem ready");
        Ok(())
    }

    fn destroy(&mut self) {
        info!("filesystem stopped");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup: parent={}, name={:?}", parent, name);
        match self.back.lookup(parent, name_bytes(name)) {
            Ok(stat) => self.reply_entry(&stat, reply),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        debug!("forget: ino={}, nlookup={}", ino, nlookup);
        self.nodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!("getattr: ino={}", ino);
        match self.back.stat(ino) {
            Ok(stat) => {
                if let Some(node) = self.nodes.get(ino) {
                    node.update(&stat);
                }
                reply.attr(&ATTR_TTL, &to_file_attr(&stat));
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("setattr: ino={}", ino);
        let attrs = set_attributes(mode, uid, gid, size, atime, mtime);
        match self.back.setattr(ino, &attrs) {
            Ok(stat) => {
                if let Some(node) = self.nodes.get(ino) {
                    node.update(&stat);
                }
                reply.attr(&ATTR_TTL, &to_file_attr(&stat));
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir: parent={}, name={:?}, mode={:#o}", parent, name, mode);
        match self.back.mkdir(parent, name_bytes(name), mode) {
            Ok(stat) => self.reply_entry(&stat, reply),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink: parent={}, name={:?}", parent, name);
        match self.back.unlink(parent, name_bytes(name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir: parent={}, name={:?}", parent, name);
        match self.back.rmdir(parent, name_bytes(name)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!(
            "rename: <{}, {:?}> -> <{}, {:?}>",
            parent, name, newparent, newname
        );
        if flags != 0 {
            // RENAME_NOREPLACE and friends are not supported.
            reply.error(libc::EINVAL);
            return;
        }
        match self
            .back
            .rename(parent, name_bytes(name), newparent, name_bytes(newname))
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        debug!("link: ino={} -> <{}, {:?}>", ino, newparent, newname);
        match self.back.link(ino, newparent, name_bytes(newname)) {
            Ok(stat) => self.reply_entry(&stat, reply),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open: ino={}, flags={:#o}", ino, flags);
        match self.back.open(ino, flags) {
            Ok(()) => {
                let fh = self.handles.insert(OpenHandle::new(ino, flags, req.pid()));
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!(
            "create: parent={}, name={:?}, mode={:#o}, flags={:#o}",
            parent, name, mode, flags
        );
        match self.back.create(parent, name_bytes(name), flags, mode) {
            Ok(stat) => {
                self.nodes.load_node(stat.ino, Some(&stat));
                let fh = self
                    .handles
                    .insert(OpenHandle::new(stat.ino, flags, req.pid()));
                reply.created(&ATTR_TTL, &to_file_attr(&stat), GENERATION, fh, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read: ino={}, fh={}, offset={}, size={}", ino, fh, offset, size);
        match self.do_read(fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(
            "write: ino={}, fh={}, offset={}, size={}",
            ino,
            fh,
            offset,
            data.len()
        );
        match self.do_write(fh, req.pid(), offset, data) {
            Ok(n) => reply.written(n as u32),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        debug!("flush: ino={}, fh={}", ino, fh);
        match self.do_flush(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release: ino={}, fh={}", ino, fh);
        match self.do_release(fh, flags) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        debug!("fsync: ino={}, fh={}, datasync={}", ino, fh, datasync);
        match self.do_fsync(fh, datasync, false) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn opendir(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("opendir: ino={}, flags={:#o}", ino, flags);
        match self.back.open(ino, flags) {
            Ok(()) => {
                let fh = self.handles.insert(OpenHandle::new(ino, flags, req.pid()));
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir: ino={}, fh={}, offset={}", ino, fh, offset);
        let handle = match self.handles.get(fh) {
            Some(handle) => handle,
            None => {
                reply.error(libc::EBADF);
                return;
            }
        };

        match self.back.readdir(handle.ino, None, 0) {
            Ok((entries, _)) => {
                // The backend hands over the full snapshot; the kernel's
                // offset just windows into it.
                for (i, dirent) in entries.iter().enumerate().skip(offset.max(0) as usize) {
                    let full = reply.add(
                        dirent.ino,
                        (i + 1) as i64,
                        to_file_type(dirent.kind),
                        OsStr::from_bytes(&dirent.name),
                    );
                    if full {
                        break;
                    }
                }
                reply.ok();
            }
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn releasedir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, flags: i32, reply: ReplyEmpty) {
        debug!("releasedir: ino={}, fh={}", ino, fh);
        match self.do_release(fh, flags) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn fsyncdir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        debug!("fsyncdir: ino={}, fh={}, datasync={}", ino, fh, datasync);
        match self.do_fsync(fh, datasync, true) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        debug!("statfs");
        reply.statfs(4096, 4096, 0, 0, 0, 4096, 255, 1);
    }
}
