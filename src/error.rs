use thiserror::Error;

/// Errors surfaced by the core across [`crate::manager::StorageManager`].
///
/// `Invariant` denotes an internal consistency check that should be
/// unreachable in correct operation; callers must not swallow it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("file not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("write offset {offset} exceeds current size {size}")]
    OutOfRange { offset: u64, size: u64 },

    #[error("truncate to a smaller size is not supported")]
    Unsupported,

    #[error("version tag not found: {0}")]
    VersionNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

/// Wraps whatever the concrete metadata or object-store backend reports,
/// so [`Error::Storage`] does not need to know about either crate directly.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Object(#[from] object_store::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Error::Storage(StorageError::Sqlite(value))
    }
}

impl From<object_store::Error> for Error {
    fn from(value: object_store::Error) -> Self {
        Error::Storage(StorageError::Object(value))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
