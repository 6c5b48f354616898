use thiserror::Error;

/// Failures reported by a storage backend behind the [`StorageView`].
///
/// [`StorageView`]: crate::storage::StorageView
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Operation not permitted on '{path}'")]
    NotPermitted { path: String },

    #[error("Content for '{path}' exceeds the backend limit of {limit} bytes")]
    EntityTooLarge { path: String, limit: u64 },

    #[error("Content for '{path}' was rejected: {reason}")]
    InvalidContent { path: String, reason: String },

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("Could not acquire a write lock on '{path}'")]
    LockNotAcquired { path: String },

    #[error("Encryption failure on '{path}': {reason}")]
    Encryption { path: String, reason: String },

    #[error("Storage not available: {reason}")]
    NotAvailable { reason: String },

    #[error("Storage for '{path}' is invalid or detached")]
    Invalid { path: String },

    #[error("No such file or directory: {path}")]
    NotFound { path: String },

    #[error("Write to '{path}' failed")]
    WriteFailed { path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn not_available<S: Into<String>>(reason: S) -> Self {
        Self::NotAvailable { reason: reason.into() }
    }

    pub fn not_found<S: Into<String>>(path: S) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn is_not_available(&self) -> bool {
        matches!(self, StorageError::NotAvailable { .. })
    }

    /// Classify an I/O error raised for `path` by a disk-backed storage.
    pub fn from_io(path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(path),
            std::io::ErrorKind::PermissionDenied => Self::NotPermitted { path: path.to_string() },
            std::io::ErrorKind::InvalidInput => Self::InvalidPath { path: path.to_string() },
            _ => Self::Io(err),
        }
    }
}
