//! POSIX errno mapping for the engine.
//!
//! `sqlfs.c` returns negative `errno` values directly from every
//! `sqlfs_proc_*` entry point (see the `CHECK_*` macros and the per-function
//! `result = -EXXX` assignments). We keep that contract at the FFI/CLI
//! boundary but use a typed error internally so call sites can match on
//! `SqlfsError` variants instead of magic ints.

use std::fmt;

use libc::{EACCES, EBUSY, EEXIST, EINVAL, EIO, EISDIR, ENOENT, ENOSYS, ENOTDIR, ENOTEMPTY};

#[derive(Debug)]
pub enum SqlfsError {
    NotFound,
    PermissionDenied,
    IsDir,
    NotDir,
    Invalid,
    Exists,
    NotEmpty,
    Busy,
    Unsupported,
    Io(String),
}

impl SqlfsError {
    /// Negative Linux errno, matching the Linux-convention return values
    /// every `proc_*` operation in spec.md §7 must surface.
    pub fn to_errno(&self) -> i32 {
        -(match self {
            SqlfsError::NotFound => ENOENT,
            SqlfsError::PermissionDenied => EACCES,
            SqlfsError::IsDir => EISDIR,
            SqlfsError::NotDir => ENOTDIR,
            SqlfsError::Invalid => EINVAL,
            SqlfsError::Exists => EEXIST,
            SqlfsError::NotEmpty => ENOTEMPTY,
            SqlfsError::Busy => EBUSY,
            SqlfsError::Unsupported => ENOSYS,
            SqlfsError::Io(_) => EIO,
        })
    }
}

impl fmt::Display for SqlfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlfsError::NotFound => write!(f, "no such file or directory"),
            SqlfsError::PermissionDenied => write!(f, "permission denied"),
            SqlfsError::IsDir => write!(f, "is a directory"),
            SqlfsError::NotDir => write!(f, "not a directory"),
            SqlfsError::Invalid => write!(f, "invalid argument"),
            SqlfsError::Exists => write!(f, "file exists"),
            SqlfsError::NotEmpty => write!(f, "directory not empty"),
            SqlfsError::Busy => write!(f, "database is busy"),
            SqlfsError::Unsupported => write!(f, "operation not supported"),
            SqlfsError::Io(msg) => write!(f, "i/o error: {}", msg),
        }
    }
}

impl std::error::Error for SqlfsError {}

impl From<rusqlite::Error> for SqlfsError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => SqlfsError::NotFound,
            rusqlite::Error::SqliteFailure(err, ref msg)
                if err.code == rusqlite::ErrorCode::DatabaseBusy =>
            {
                log::warn!("store busy: {:?}", msg);
                SqlfsError::Busy
            }
            other => {
                log::error!("store error: {}", other);
                SqlfsError::Io(other.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, SqlfsError>;
