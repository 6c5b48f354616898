//! The storage view contract consumed by the DAV layer.
//!
//! A [`StorageView`] is a virtual filesystem facade over one or more
//! mounted backends. The DAV nodes never touch a backend directly; every
//! read, write, rename and metadata lookup goes through this trait so that
//! backend failures arrive as a typed [`crate::errors::StorageError`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::StorageResult;
use crate::models::{NodeInfo, Permissions};
use crate::utils::filename::DEFAULT_MAX_NAME_LENGTH;

pub mod local;
pub mod lock;
pub mod memory;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Readable byte stream passed into writes and handed out by reads
pub type DataStream = Box<dyn tokio::io::AsyncRead + Send + Unpin>;

/// Free space reported for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeSpace {
    /// No quota applies or the backend cannot tell
    Unknown,
    Bytes(u64),
}

/// Mount a path belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    /// The mount point itself may be relocated as a unit
    pub moveable: bool,
    /// Path of the entry relative to the mount root; empty at the root
    pub internal_path: String,
}

#[async_trait]
pub trait StorageView: Send + Sync {
    /// Metadata from the backend's cache. Staging `.part` files are never
    /// returned from here.
    async fn file_info(&self, path: &str) -> StorageResult<Option<NodeInfo>>;

    /// Metadata read live from the backend, bypassing any cache
    async fn scan_info(&self, path: &str) -> StorageResult<Option<NodeInfo>>;

    async fn file_exists(&self, path: &str) -> StorageResult<bool>;

    async fn is_file(&self, path: &str) -> StorageResult<bool>;

    async fn read(&self, path: &str) -> StorageResult<DataStream>;

    /// Store the whole stream at `path`, holding the path's write lock for
    /// the duration. Returns the number of bytes written.
    async fn write(&self, path: &str, data: DataStream) -> StorageResult<u64>;

    async fn filesize(&self, path: &str) -> StorageResult<u64>;

    async fn rename(&self, from: &str, to: &str) -> StorageResult<bool>;

    async fn copy(&self, from: &str, to: &str) -> StorageResult<bool>;

    async fn mkdir(&self, path: &str) -> StorageResult<bool>;

    /// Names of the direct children of a directory
    async fn read_dir(&self, path: &str) -> StorageResult<Vec<String>>;

    async fn unlink(&self, path: &str) -> StorageResult<bool>;

    /// Remove a directory and everything below it
    async fn rmdir(&self, path: &str) -> StorageResult<bool>;

    async fn touch(&self, path: &str, mtime: DateTime<Utc>) -> StorageResult<bool>;

    async fn free_space(&self, path: &str) -> StorageResult<FreeSpace>;

    /// Effective permissions; empty for paths that do not exist
    async fn permissions(&self, path: &str) -> StorageResult<Permissions>;

    async fn mount_point(&self, path: &str) -> StorageResult<MountPoint>;

    /// True when encryption was switched off while encrypted content is
    /// still present, in which case content must not be served or replaced.
    async fn encrypted_files_pending(&self) -> bool {
        false
    }

    fn max_name_length(&self) -> usize {
        DEFAULT_MAX_NAME_LENGTH
    }
}
