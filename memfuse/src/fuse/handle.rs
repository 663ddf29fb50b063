use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::fs::types::InodeId;

/// State for one open file or directory: the inode it refers to, the
/// access-mode bits it was opened with, and the process that opened it.
/// Only the inode *number* is held; the inode itself is resolved through
/// the backend on every call, so a handle never pins stale state.
#[derive(Debug, Clone, Copy)]
pub struct OpenHandle {
    pub ino: InodeId,
    pub flags: i32,
    pub pid: u32,
}

impl OpenHandle {
    pub fn new(ino: InodeId, flags: i32, pid: u32) -> Self {
        Self {
            ino,
            flags: flags & libc::O_ACCMODE,
            pid,
        }
    }

    pub fn readable(&self) -> bool {
        self.flags != libc::O_WRONLY
    }

    pub fn writable(&self) -> bool {
        self.flags != libc::O_RDONLY
    }
}

/// Allocates handle ids and maps them to open handles. Ids start at 1;
/// 0 never names a live handle.
pub struct HandleTable {
    next_fh: AtomicU64,
    handles: DashMap<u64, OpenHandle>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_fh: AtomicU64::new(1),
            handles: DashMap::new(),
        }
    }

    pub fn insert(&self, handle: OpenHandle) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(fh, handle);
        fh
    }

    pub fn get(&self, fh: u64) -> Option<OpenHandle> {
        self.handles.get(&fh).map(|entry| *entry)
    }

    pub fn remove(&self, fh: u64) -> Option<OpenHandle> {
        self.handles.remove(&fh).map(|(_, handle)| handle)
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode_bits() {
        let read = OpenHandle::new(2, libc::O_RDONLY, 100);
        assert!(read.readable());
        assert!(!read.writable());

        let write = OpenHandle::new(2, libc::O_WRONLY, 100);
        assert!(!write.readable());
        assert!(write.writable());

        let both = OpenHandle::new(2, libc::O_RDWR, 100);
        assert!(both.readable());
        assert!(both.writable());
    }

    #[test]
    fn test_flags_keep_only_access_bits() {
        let handle = OpenHandle::new(2, libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC, 100);
        assert_eq!(handle.flags, libc::O_WRONLY);
    }

    #[test]
    fn test_insert_get_remove() {
        let table = HandleTable::new();
        let fh = table.insert(OpenHandle::new(7, libc::O_RDONLY, 42));
        assert!(fh > 0);

        let handle = table.get(fh).unwrap();
        assert_eq!(handle.ino, 7);
        assert_eq!(handle.pid, 42);

        assert!(table.remove(fh).is_some());
        assert!(table.get(fh).is_none());
        assert!(table.remove(fh).is_none());
    }

    #[test]
    fn test_handle_ids_are_unique() {
        let table = HandleTable::new();
        let a = table.insert(OpenHandle::new(1, libc::O_RDONLY, 1));
        let b = table.insert(OpenHandle::new(1, libc::O_RDONLY, 1));
        assert_ne!(a, b);
    }
}
