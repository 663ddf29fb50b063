use std::time::SystemTime;

pub type InodeId = u64;

/// Inode number of the root directory. `0` is reserved for signalling
/// errors; freshly allocated numbers start at `2` and are never reused.
pub const ROOT_INO: InodeId = 1;

/// Block size reported in stat records.
pub const BLOCK_SIZE: u64 = 512;

// File mode type bits (S_IF* constants)
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
}

impl FileKind {
    pub fn from_mode(mode: u32) -> Self {
        if mode & S_IFMT == S_IFDIR {
            FileKind::Directory
        } else {
            FileKind::Regular
        }
    }

    pub fn is_dir(self) -> bool {
        matches!(self, FileKind::Directory)
    }

    /// The file-type bits this kind contributes to a mode word.
    pub fn type_bits(self) -> u32 {
        match self {
            FileKind::Regular => S_IFREG,
            FileKind::Directory => S_IFDIR,
        }
    }
}

/// The stat record handed back to callers of the backend contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileStat {
    pub ino: InodeId,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blksize: u32,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
}

impl FileStat {
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }
}

/// A single directory entry. Names are byte strings exactly as the
/// kernel hands them over; they never contain `/` or NUL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dirent {
    pub ino: InodeId,
    pub name: Vec<u8>,
    pub kind: FileKind,
}

/// The attribute subset a `setattr` request may carry. Unset fields are
/// left untouched; `uid`/`gid` are recognised but unsupported.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetAttributes {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
}

impl SetAttributes {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.uid.is_none()
            && self.gid.is_none()
            && self.size.is_none()
            && self.atime.is_none()
            && self.mtime.is_none()
    }
}
