//! Error kinds shared by every driver operation.
//!
//! Logical failures (`NotFound`, `AlreadyExists`, ...) are definitive: the
//! driver never retries them internally. `Io` wraps a storage-collaborator
//! failure and is surfaced as-is.

use thiserror::Error;

/// Result alias used across the crate.
pub type FsResult<T> = Result<T, FsError>;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    AlreadyExists,
    #[error("directory not empty")]
    NotEmpty,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("permission denied")]
    PermissionDenied,
    #[error("no space left on device")]
    NoSpace,
    #[error("resource busy")]
    Busy,
    #[error("operation not supported")]
    NotSupported,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    /// Map the error kind to the host's errno convention.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::PermissionDenied => libc::EACCES,
            FsError::NoSpace => libc::ENOSPC,
            FsError::Busy => libc::EBUSY,
            FsError::NotSupported => libc::ENOTTY,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}
