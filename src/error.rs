//! Error taxonomy shared by every operation handler.

use thiserror::Error;

/// The ways an operation handler can fail.
///
/// Validation failures carry their own variant; failures of the underlying
/// syscalls are wrapped in [`FsError::Io`] so the original errno survives to
/// the host boundary.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("entry not found")]
    NotFound,

    #[error("entry already exists")]
    Exists,

    #[error("entry is a directory")]
    IsDirectory,

    #[error("entry is not a directory")]
    NotDirectory,

    #[error("directory is not empty")]
    NotEmpty,

    #[error("entry kind does not support this operation")]
    InvalidKind,

    #[error("operation not permitted")]
    NotPermitted,

    #[error("no open file handle")]
    InvalidHandle,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FsError> for i32 {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound => libc::ENOENT,
            FsError::Exists => libc::EEXIST,
            FsError::IsDirectory => libc::EISDIR,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::InvalidKind => libc::EINVAL,
            FsError::NotPermitted => libc::EPERM,
            FsError::InvalidHandle => libc::EBADF,
            FsError::Io(ref io_err) => io_err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<nix::errno::Errno> for FsError {
    fn from(e: nix::errno::Errno) -> Self {
        Self::Io(std::io::Error::from_raw_os_error(e as i32))
    }
}

pub type FsResult<T> = Result<T, FsError>;
