use std::io;

use thiserror::Error;

/// Typed error codes returned by backend filesystems. Each maps onto a
/// single errno so the protocol adapter can surface it unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    Exists,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("is a directory")]
    IsDirectory,
    #[error("not a directory")]
    NotDirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("operation not supported")]
    NotSupported,
    #[error("operation not permitted")]
    OperationNotPermitted,
    #[error("I/O error")]
    IoError,
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    pub fn to_errno(self) -> libc::c_int {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::Exists => libc::EEXIST,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::IsDirectory => libc::EISDIR,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::NotSupported => libc::ENOSYS,
            FsError::OperationNotPermitted => libc::EPERM,
            FsError::IoError => libc::EIO,
        }
    }
}

/// Lets backends that touch real I/O (a future disk store) fold wrapped
/// OS errors into the typed set. Unrecognised kinds collapse to `IoError`.
impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => FsError::NotFound,
            io::ErrorKind::AlreadyExists => FsError::Exists,
            io::ErrorKind::PermissionDenied => FsError::OperationNotPermitted,
            io::ErrorKind::InvalidInput => FsError::InvalidArgument,
            _ => FsError::IoError,
        }
    }
}
