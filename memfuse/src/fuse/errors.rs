use std::io;

use crate::fs::errors::FsError;

/// Adapter-level errors. Backend errors pass through with their own
/// errno; anything foreign is mapped here, with EIO as the fallback for
/// errors nothing recognises.
#[derive(Debug)]
pub enum FuseError {
    /// The request named a handle the adapter does not know, or drove
    /// I/O in a direction the handle was not opened for.
    BadHandle,
    /// A write arrived through a handle opened by a different process.
    NotHandleOwner,
    Fs(FsError),
    Io(io::Error),
}

pub type FuseResult<T> = Result<T, FuseError>;

impl FuseError {
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            FuseError::BadHandle => libc::EBADF,
            FuseError::NotHandleOwner => libc::EACCES,
            FuseError::Fs(e) => e.to_errno(),
            // Raw OS codes pass through untouched; synthetic errors are
            // matched by category, and anything unrecognised is EIO.
            FuseError::Io(e) => e.raw_os_error().unwrap_or_else(|| match e.kind() {
                io::ErrorKind::NotFound => libc::ENOENT,
                io::ErrorKind::AlreadyExists => libc::EEXIST,
                io::ErrorKind::PermissionDenied => libc::EPERM,
                io::ErrorKind::InvalidInput => libc::EINVAL,
                _ => libc::EIO,
            }),
        }
    }
}

impl From<FsError> for FuseError {
    fn from(e: FsError) -> Self {
        FuseError::Fs(e)
    }
}

impl From<io::Error> for FuseError {
    fn from(e: io::Error) -> Self {
        FuseError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FuseError::BadHandle.to_errno(), libc::EBADF);
        assert_eq!(FuseError::NotHandleOwner.to_errno(), libc::EACCES);
        assert_eq!(FuseError::Fs(FsError::NotFound).to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_io_errors_pass_raw_codes_through() {
        let err = FuseError::Io(io::Error::from_raw_os_error(libc::EPERM));
        assert_eq!(err.to_errno(), libc::EPERM);

        // A synthetic error maps by category.
        let err = FuseError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert_eq!(err.to_errno(), libc::EPERM);

        // An error with no OS code and no known category falls back to EIO.
        let err = FuseError::Io(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(err.to_errno(), libc::EIO);
    }
}
