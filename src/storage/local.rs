use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::lock::LockSet;
use super::{DataStream, FreeSpace, MountPoint, StorageView};
use crate::errors::{StorageError, StorageResult};
use crate::models::{EntryKind, NodeInfo, Permissions};
use crate::utils::filename::DEFAULT_MAX_NAME_LENGTH;
use crate::utils::mime::{detect_mime_type, DIRECTORY_MIME};
use crate::utils::path::{is_part_file, split_path, trim_path};

/// [`StorageView`] over a directory on the local disk
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    quota: Option<u64>,
    max_name_length: usize,
    locks: LockSet,
}

fn sum_file_sizes(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

fn join_error(err: tokio::task::JoinError) -> StorageError {
    StorageError::Io(std::io::Error::other(err))
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            quota: None,
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
            locks: LockSet::new(),
        }
    }

    pub fn with_quota(mut self, quota: Option<u64>) -> Self {
        self.quota = quota;
        self
    }

    pub fn with_max_name_length(mut self, max_name_length: usize) -> Self {
        self.max_name_length = max_name_length;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make sure the storage root exists
    pub async fn initialize(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::not_available(format!("cannot create {:?}: {}", self.root, e)))?;
        info!("Serving files from {:?}", self.root);
        Ok(())
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(trim_path(path));
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(StorageError::InvalidPath { path: path.to_string() });
                }
            }
        }
        Ok(self.root.join(relative))
    }

    async fn used_bytes(&self) -> StorageResult<u64> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || sum_file_sizes(&root))
            .await
            .map_err(join_error)
    }

    async fn is_dir(&self, path: &str) -> StorageResult<bool> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(path, e)),
        }
    }

    fn permissions_for(meta: &std::fs::Metadata) -> Permissions {
        let readonly = meta.permissions().readonly();
        match (meta.is_dir(), readonly) {
            (_, true) => Permissions::READ | Permissions::SHARE,
            (true, false) => Permissions::all(),
            (false, false) => Permissions::all().difference(Permissions::CREATE),
        }
    }

    async fn stat(&self, path: &str) -> StorageResult<Option<NodeInfo>> {
        let trimmed = trim_path(path).to_string();
        let full = self.resolve(&trimmed)?;
        let meta = match fs::metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::from_io(&trimmed, e)),
        };

        let (kind, size, mime_type) = if meta.is_dir() {
            let dir = full.clone();
            let size = tokio::task::spawn_blocking(move || sum_file_sizes(&dir))
                .await
                .map_err(join_error)?;
            (EntryKind::Dir, size, DIRECTORY_MIME.to_string())
        } else {
            (EntryKind::File, meta.len(), detect_mime_type(&trimmed))
        };

        let mtime: DateTime<Utc> = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let id_digest = Sha256::digest(trimmed.as_bytes());
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&id_digest[..8]);

        let etag_source = format!(
            "{}:{}:{}",
            trimmed,
            size,
            mtime.timestamp_nanos_opt().unwrap_or_default()
        );
        let etag = format!("{:x}", Sha256::digest(etag_source.as_bytes()));

        Ok(Some(NodeInfo {
            name: split_path(&trimmed).1,
            path: trimmed,
            kind,
            size,
            mime_type,
            file_id: u64::from_be_bytes(id_bytes),
            etag: etag[..16].to_string(),
            permissions: Self::permissions_for(&meta),
            mtime,
            mounted: false,
            shared: false,
        }))
    }
}

#[async_trait]
impl StorageView for LocalStorage {
    async fn file_info(&self, path: &str) -> StorageResult<Option<NodeInfo>> {
        if is_part_file(path) {
            return Ok(None);
        }
        self.stat(path).await
    }

    async fn scan_info(&self, path: &str) -> StorageResult<Option<NodeInfo>> {
        self.stat(path).await
    }

    async fn file_exists(&self, path: &str) -> StorageResult<bool> {
        let full = self.resolve(path)?;
        Ok(fs::try_exists(&full).await.unwrap_or(false))
    }

    async fn is_file(&self, path: &str) -> StorageResult<bool> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(path, e)),
        }
    }

    async fn read(&self, path: &str) -> StorageResult<DataStream> {
        let full = self.resolve(path)?;
        let file = fs::File::open(&full)
            .await
            .map_err(|e| StorageError::from_io(path, e))?;
        Ok(Box::new(file))
    }

    async fn write(&self, path: &str, mut data: DataStream) -> StorageResult<u64> {
        let (parent, _) = split_path(path);
        if !self.is_dir(&parent).await? {
            return Err(StorageError::not_found(parent));
        }
        let full = self.resolve(path)?;
        let _lock = self.locks.try_acquire(path)?;

        let mut file = fs::File::create(&full)
            .await
            .map_err(|e| StorageError::from_io(path, e))?;
        let written = tokio::io::copy(&mut data, &mut file)
            .await
            .map_err(|e| StorageError::from_io(path, e))?;
        file.flush().await.map_err(|e| StorageError::from_io(path, e))?;
        debug!(path = %path, bytes = written, "local write");
        Ok(written)
    }

    async fn filesize(&self, path: &str) -> StorageResult<u64> {
        match self.stat(path).await? {
            Some(info) => Ok(info.size),
            None => Err(StorageError::not_found(path)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<bool> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if !fs::try_exists(&source).await.unwrap_or(false) || self.is_dir(to).await? {
            return Ok(false);
        }
        let _lock = self.locks.try_acquire(to)?;
        match fs::rename(&source, &target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(to, e)),
        }
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<bool> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if !self.is_file(from).await? {
            return Ok(false);
        }
        let _lock = self.locks.try_acquire(to)?;
        fs::copy(&source, &target)
            .await
            .map(|_| true)
            .map_err(|e| StorageError::from_io(to, e))
    }

    async fn mkdir(&self, path: &str) -> StorageResult<bool> {
        let full = self.resolve(path)?;
        match fs::create_dir(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StorageError::from_io(path, e)),
        }
    }

    async fn read_dir(&self, path: &str) -> StorageResult<Vec<String>> {
        let full = self.resolve(path)?;
        let mut entries = fs::read_dir(&full)
            .await
            .map_err(|e| StorageError::from_io(path, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            } else {
                warn!("Skipping non UTF-8 entry in {:?}", full);
            }
        }
        names.sort();
        Ok(names)
    }

    async fn unlink(&self, path: &str) -> StorageResult<bool> {
        let full = self.resolve(path)?;
        let _lock = self.locks.try_acquire(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(path, e)),
        }
    }

    async fn rmdir(&self, path: &str) -> StorageResult<bool> {
        if trim_path(path).is_empty() {
            return Ok(false);
        }
        let full = self.resolve(path)?;
        match fs::remove_dir_all(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io(path, e)),
        }
    }

    async fn touch(&self, path: &str, mtime: DateTime<Utc>) -> StorageResult<bool> {
        let full = self.resolve(path)?;
        let modified = SystemTime::from(mtime);
        let result = tokio::task::spawn_blocking(move || {
            std::fs::File::options()
                .write(true)
                .open(&full)
                .and_then(|file| file.set_modified(modified))
        })
        .await
        .map_err(join_error)?;
        match result {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Failed to set mtime on {}: {}", path, e);
                Ok(false)
            }
        }
    }

    async fn free_space(&self, _path: &str) -> StorageResult<FreeSpace> {
        match self.quota {
            Some(quota) => Ok(FreeSpace::Bytes(quota.saturating_sub(self.used_bytes().await?))),
            None => Ok(FreeSpace::Unknown),
        }
    }

    async fn permissions(&self, path: &str) -> StorageResult<Permissions> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(meta) => Ok(Self::permissions_for(&meta)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Permissions::empty()),
            Err(e) => Err(StorageError::from_io(path, e)),
        }
    }

    async fn mount_point(&self, path: &str) -> StorageResult<MountPoint> {
        Ok(MountPoint {
            moveable: false,
            internal_path: trim_path(path).to_string(),
        })
    }

    fn max_name_length(&self) -> usize {
        self.max_name_length
    }
}
