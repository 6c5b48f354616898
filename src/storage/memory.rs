use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::lock::{LockSet, WriteLock};
use super::{DataStream, FreeSpace, MountPoint, StorageView};
use crate::errors::{StorageError, StorageResult};
use crate::models::{EntryKind, NodeInfo, Permissions};
use crate::utils::mime::{detect_mime_type, DIRECTORY_MIME};
use crate::utils::path::{extension, is_part_file, is_same_or_descendant, split_path, trim_path};

#[derive(Debug, Clone)]
enum Content {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug, Clone)]
struct Entry {
    content: Content,
    file_id: u64,
    etag: String,
    mtime: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: BTreeMap<String, Entry>,
    next_id: u64,
    permissions: HashMap<String, Permissions>,
    moveable_mounts: HashSet<String>,
    undecryptable: HashSet<String>,
    rejected_extensions: HashSet<String>,
    broken_rename_targets: HashSet<String>,
    quota: Option<u64>,
    max_file_size: Option<u64>,
}

fn new_etag() -> String {
    Uuid::new_v4().simple().to_string()
}

impl MemoryState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_dir(&self, path: &str) -> bool {
        matches!(self.entries.get(path), Some(Entry { content: Content::Dir, .. }))
    }

    fn used_bytes(&self) -> u64 {
        self.entries
            .values()
            .map(|e| match &e.content {
                Content::File(data) => data.len() as u64,
                Content::Dir => 0,
            })
            .sum()
    }

    fn size_of(&self, path: &str, entry: &Entry) -> u64 {
        match &entry.content {
            Content::File(data) => data.len() as u64,
            Content::Dir => self
                .entries
                .iter()
                .filter(|(p, _)| p.as_str() != path && is_same_or_descendant(p, path))
                .map(|(_, e)| match &e.content {
                    Content::File(data) => data.len() as u64,
                    Content::Dir => 0,
                })
                .sum(),
        }
    }

    fn effective_permissions(&self, path: &str, entry: &Entry) -> Permissions {
        if let Some(perms) = self.permissions.get(path) {
            return *perms;
        }
        match entry.content {
            Content::File(_) => Permissions::all().difference(Permissions::CREATE),
            Content::Dir => Permissions::all(),
        }
    }

    fn info(&self, path: &str) -> Option<NodeInfo> {
        let entry = self.entries.get(path)?;
        let (_, name) = split_path(path);
        let (kind, mime_type) = match entry.content {
            Content::File(_) => (EntryKind::File, detect_mime_type(&name)),
            Content::Dir => (EntryKind::Dir, DIRECTORY_MIME.to_string()),
        };
        Some(NodeInfo {
            path: path.to_string(),
            name,
            kind,
            size: self.size_of(path, entry),
            mime_type,
            file_id: entry.file_id,
            etag: entry.etag.clone(),
            permissions: self.effective_permissions(path, entry),
            mtime: entry.mtime,
            mounted: self.moveable_mounts.contains(path),
            shared: false,
        })
    }

    /// New etags for every ancestor of `path`, the way a changed child
    /// invalidates the listings above it
    fn propagate_etag(&mut self, path: &str) {
        let mut current = split_path(path).0;
        loop {
            if let Some(entry) = self.entries.get_mut(&current) {
                entry.etag = new_etag();
                entry.mtime = Utc::now();
            }
            if current.is_empty() {
                break;
            }
            current = split_path(&current).0;
        }
    }
}

/// In-memory [`StorageView`] with fault injection hooks.
///
/// Used by the test-suite and by embedders that want a scratch
/// filesystem. Paths are keyed without leading or trailing slashes; the
/// root directory is the empty path.
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
    locks: LockSet,
    available: AtomicBool,
    encrypted_pending: AtomicBool,
    metadata_queries: AtomicUsize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        let mut state = MemoryState::default();
        let root_id = state.allocate_id();
        state.entries.insert(
            String::new(),
            Entry {
                content: Content::Dir,
                file_id: root_id,
                etag: new_etag(),
                mtime: Utc::now(),
            },
        );
        Self {
            state: RwLock::new(state),
            locks: LockSet::new(),
            available: AtomicBool::new(true),
            encrypted_pending: AtomicBool::new(false),
            metadata_queries: AtomicUsize::new(0),
        }
    }

    fn ensure_available(&self) -> StorageResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::not_available("memory backend switched off"))
        }
    }

    /// Create a directory and all missing parents
    pub async fn create_dir_all(&self, path: &str) {
        let path = trim_path(path);
        let mut state = self.state.write().await;
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = if current.is_empty() {
                segment.to_string()
            } else {
                format!("{}/{}", current, segment)
            };
            if !state.entries.contains_key(&current) {
                let file_id = state.allocate_id();
                state.entries.insert(
                    current.clone(),
                    Entry {
                        content: Content::Dir,
                        file_id,
                        etag: new_etag(),
                        mtime: Utc::now(),
                    },
                );
            }
        }
    }

    /// Seed a file, creating missing parent directories
    pub async fn put_file(&self, path: &str, data: &[u8]) {
        let path = trim_path(path).to_string();
        let (parent, _) = split_path(&path);
        self.create_dir_all(&parent).await;
        let mut state = self.state.write().await;
        let file_id = match state.entries.get(&path) {
            Some(existing) => existing.file_id,
            None => state.allocate_id(),
        };
        state.entries.insert(
            path.clone(),
            Entry {
                content: Content::File(data.to_vec()),
                file_id,
                etag: new_etag(),
                mtime: Utc::now(),
            },
        );
        state.propagate_etag(&path);
    }

    pub async fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.state.read().await.entries.get(trim_path(path)) {
            Some(Entry { content: Content::File(data), .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub async fn exists(&self, path: &str) -> bool {
        self.state.read().await.entries.contains_key(trim_path(path))
    }

    /// All stored paths, including staging files
    pub async fn paths(&self) -> Vec<String> {
        self.state.read().await.entries.keys().cloned().collect()
    }

    pub async fn mtime(&self, path: &str) -> Option<DateTime<Utc>> {
        self.state.read().await.entries.get(trim_path(path)).map(|e| e.mtime)
    }

    pub async fn set_permissions(&self, path: &str, permissions: Permissions) {
        self.state
            .write()
            .await
            .permissions
            .insert(trim_path(path).to_string(), permissions);
    }

    pub async fn add_moveable_mount(&self, path: &str) {
        self.state
            .write()
            .await
            .moveable_mounts
            .insert(trim_path(path).to_string());
    }

    pub async fn set_quota(&self, quota: Option<u64>) {
        self.state.write().await.quota = quota;
    }

    pub async fn set_max_file_size(&self, limit: Option<u64>) {
        self.state.write().await.max_file_size = limit;
    }

    /// Writes of files with this extension fail as invalid content
    pub async fn reject_extension(&self, ext: &str) {
        self.state
            .write()
            .await
            .rejected_extensions
            .insert(ext.to_ascii_lowercase());
    }

    /// Renames onto this path fail as if the backend rejected it
    pub async fn break_renames_to(&self, path: &str) {
        self.state
            .write()
            .await
            .broken_rename_targets
            .insert(trim_path(path).to_string());
    }

    /// Reads of this path fail with a decryption error
    pub async fn set_undecryptable(&self, path: &str) {
        self.state
            .write()
            .await
            .undecryptable
            .insert(trim_path(path).to_string());
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_encrypted_files_pending(&self, pending: bool) {
        self.encrypted_pending.store(pending, Ordering::SeqCst);
    }

    /// Take the write lock on `path` as if another writer were active
    pub fn hold_lock(&self, path: &str) -> StorageResult<WriteLock> {
        self.locks.try_acquire(path)
    }

    /// Number of metadata-cache lookups served so far
    pub fn metadata_queries(&self) -> usize {
        self.metadata_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageView for MemoryStorage {
    async fn file_info(&self, path: &str) -> StorageResult<Option<NodeInfo>> {
        self.ensure_available()?;
        self.metadata_queries.fetch_add(1, Ordering::SeqCst);
        let path = trim_path(path);
        if is_part_file(path) {
            return Ok(None);
        }
        Ok(self.state.read().await.info(path))
    }

    async fn scan_info(&self, path: &str) -> StorageResult<Option<NodeInfo>> {
        self.ensure_available()?;
        Ok(self.state.read().await.info(trim_path(path)))
    }

    async fn file_exists(&self, path: &str) -> StorageResult<bool> {
        self.ensure_available()?;
        Ok(self.state.read().await.entries.contains_key(trim_path(path)))
    }

    async fn is_file(&self, path: &str) -> StorageResult<bool> {
        self.ensure_available()?;
        Ok(matches!(
            self.state.read().await.entries.get(trim_path(path)),
            Some(Entry { content: Content::File(_), .. })
        ))
    }

    async fn read(&self, path: &str) -> StorageResult<DataStream> {
        self.ensure_available()?;
        let path = trim_path(path);
        let state = self.state.read().await;
        if state.undecryptable.contains(path) {
            return Err(StorageError::Encryption {
                path: path.to_string(),
                reason: "missing private key".to_string(),
            });
        }
        match state.entries.get(path) {
            Some(Entry { content: Content::File(data), .. }) => Ok(Box::new(Cursor::new(data.clone()))),
            Some(_) => Err(StorageError::InvalidPath { path: path.to_string() }),
            None => Err(StorageError::not_found(path)),
        }
    }

    async fn write(&self, path: &str, mut data: DataStream) -> StorageResult<u64> {
        self.ensure_available()?;
        let path = trim_path(path).to_string();
        let (parent, name) = split_path(&path);
        {
            let state = self.state.read().await;
            if !state.is_dir(&parent) {
                return Err(StorageError::not_found(parent));
            }
            if state.is_dir(&path) {
                return Err(StorageError::InvalidPath { path });
            }
            let logical = name.split(".ocTransferId").next().unwrap_or(&name);
            if let Some(ext) = extension(logical) {
                if state.rejected_extensions.contains(&ext.to_ascii_lowercase()) {
                    return Err(StorageError::InvalidContent {
                        path: path.clone(),
                        reason: format!("files of type .{} are not accepted", ext),
                    });
                }
            }
        }

        let _lock = self.locks.try_acquire(&path)?;
        let mut buffer = Vec::new();
        data.read_to_end(&mut buffer).await?;
        let written = buffer.len() as u64;

        let mut state = self.state.write().await;
        if let Some(limit) = state.max_file_size {
            if written > limit {
                return Err(StorageError::EntityTooLarge { path, limit });
            }
        }
        let file_id = match state.entries.get(&path) {
            Some(existing) => existing.file_id,
            None => state.allocate_id(),
        };
        state.entries.insert(
            path.clone(),
            Entry {
                content: Content::File(buffer),
                file_id,
                etag: new_etag(),
                mtime: Utc::now(),
            },
        );
        state.propagate_etag(&path);
        debug!(path = %path, bytes = written, "memory write");
        Ok(written)
    }

    async fn filesize(&self, path: &str) -> StorageResult<u64> {
        self.ensure_available()?;
        let path = trim_path(path);
        let state = self.state.read().await;
        match state.entries.get(path) {
            Some(entry) => Ok(state.size_of(path, entry)),
            None => Err(StorageError::not_found(path)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> StorageResult<bool> {
        self.ensure_available()?;
        let from = trim_path(from).to_string();
        let to = trim_path(to).to_string();
        if from.is_empty() || to.is_empty() || is_same_or_descendant(&to, &from) {
            return Ok(false);
        }
        let _lock = self.locks.try_acquire(&to)?;

        let mut state = self.state.write().await;
        if state.broken_rename_targets.contains(&to) {
            return Err(StorageError::InvalidPath { path: to });
        }
        let Some(source) = state.entries.get(&from).cloned() else {
            return Ok(false);
        };
        if !state.is_dir(&split_path(&to).0) {
            return Ok(false);
        }
        match (&source.content, state.entries.get(&to)) {
            (_, Some(Entry { content: Content::Dir, .. })) => return Ok(false),
            (Content::Dir, Some(_)) => return Ok(false),
            _ => {}
        }

        let moved: Vec<String> = state
            .entries
            .keys()
            .filter(|p| is_same_or_descendant(p, &from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(entry) = state.entries.remove(&old) {
                let new_path = format!("{}{}", to, &old[from.len()..]);
                state.entries.insert(new_path, entry);
            }
            if let Some(perms) = state.permissions.remove(&old) {
                let new_path = format!("{}{}", to, &old[from.len()..]);
                state.permissions.insert(new_path, perms);
            }
        }
        state.propagate_etag(&from);
        state.propagate_etag(&to);
        Ok(true)
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<bool> {
        self.ensure_available()?;
        let from = trim_path(from);
        let to = trim_path(to).to_string();
        let _lock = self.locks.try_acquire(&to)?;

        let mut state = self.state.write().await;
        let data = match state.entries.get(from) {
            Some(Entry { content: Content::File(data), .. }) => data.clone(),
            _ => return Ok(false),
        };
        if !state.is_dir(&split_path(&to).0) || state.is_dir(&to) {
            return Ok(false);
        }
        let file_id = match state.entries.get(&to) {
            Some(existing) => existing.file_id,
            None => state.allocate_id(),
        };
        state.entries.insert(
            to.clone(),
            Entry {
                content: Content::File(data),
                file_id,
                etag: new_etag(),
                mtime: Utc::now(),
            },
        );
        state.propagate_etag(&to);
        Ok(true)
    }

    async fn mkdir(&self, path: &str) -> StorageResult<bool> {
        self.ensure_available()?;
        let path = trim_path(path).to_string();
        let mut state = self.state.write().await;
        if state.entries.contains_key(&path) || !state.is_dir(&split_path(&path).0) {
            return Ok(false);
        }
        let file_id = state.allocate_id();
        state.entries.insert(
            path.clone(),
            Entry {
                content: Content::Dir,
                file_id,
                etag: new_etag(),
                mtime: Utc::now(),
            },
        );
        state.propagate_etag(&path);
        Ok(true)
    }

    async fn read_dir(&self, path: &str) -> StorageResult<Vec<String>> {
        self.ensure_available()?;
        let path = trim_path(path);
        let state = self.state.read().await;
        if !state.is_dir(path) {
            return Err(StorageError::not_found(path));
        }
        Ok(state
            .entries
            .keys()
            .filter(|p| !p.is_empty() && p.as_str() != path)
            .filter(|p| split_path(p).0 == path)
            .map(|p| split_path(p).1)
            .collect())
    }

    async fn unlink(&self, path: &str) -> StorageResult<bool> {
        self.ensure_available()?;
        let path = trim_path(path).to_string();
        let _lock = self.locks.try_acquire(&path)?;
        let mut state = self.state.write().await;
        match state.entries.get(&path) {
            Some(Entry { content: Content::File(_), .. }) => {
                state.entries.remove(&path);
                state.propagate_etag(&path);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rmdir(&self, path: &str) -> StorageResult<bool> {
        self.ensure_available()?;
        let path = trim_path(path).to_string();
        let mut state = self.state.write().await;
        if path.is_empty() || !state.is_dir(&path) {
            return Ok(false);
        }
        state.entries.retain(|p, _| !is_same_or_descendant(p, &path));
        state.propagate_etag(&path);
        Ok(true)
    }

    async fn touch(&self, path: &str, mtime: DateTime<Utc>) -> StorageResult<bool> {
        self.ensure_available()?;
        let mut state = self.state.write().await;
        match state.entries.get_mut(trim_path(path)) {
            Some(entry) => {
                entry.mtime = mtime;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn free_space(&self, _path: &str) -> StorageResult<FreeSpace> {
        self.ensure_available()?;
        let state = self.state.read().await;
        Ok(match state.quota {
            Some(quota) => FreeSpace::Bytes(quota.saturating_sub(state.used_bytes())),
            None => FreeSpace::Unknown,
        })
    }

    async fn permissions(&self, path: &str) -> StorageResult<Permissions> {
        self.ensure_available()?;
        let path = trim_path(path);
        let state = self.state.read().await;
        Ok(state
            .entries
            .get(path)
            .map(|entry| state.effective_permissions(path, entry))
            .unwrap_or_else(Permissions::empty))
    }

    async fn mount_point(&self, path: &str) -> StorageResult<MountPoint> {
        self.ensure_available()?;
        let path = trim_path(path);
        let state = self.state.read().await;
        let mount = state
            .moveable_mounts
            .iter()
            .filter(|m| is_same_or_descendant(path, m))
            .max_by_key(|m| m.len());
        Ok(match mount {
            Some(mount) => MountPoint {
                moveable: true,
                internal_path: trim_path(&path[mount.len()..]).to_string(),
            },
            None => MountPoint {
                moveable: false,
                internal_path: path.to_string(),
            },
        })
    }

    async fn encrypted_files_pending(&self) -> bool {
        self.encrypted_pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(bytes: &'static [u8]) -> DataStream {
        Box::new(Cursor::new(bytes))
    }

    #[tokio::test]
    async fn test_part_files_are_hidden_from_the_metadata_cache() {
        let storage = MemoryStorage::new();
        storage.put_file("docs/a.txt.ocTransferId42.part", b"abc").await;

        assert!(storage.file_info("docs/a.txt.ocTransferId42.part").await.unwrap().is_none());
        let live = storage.scan_info("docs/a.txt.ocTransferId42.part").await.unwrap().unwrap();
        assert_eq!(live.size, 3);
    }

    #[tokio::test]
    async fn test_directory_size_is_aggregate() {
        let storage = MemoryStorage::new();
        storage.put_file("docs/a.txt", b"12345").await;
        storage.put_file("docs/sub/b.txt", b"123").await;
        storage.put_file("other.txt", b"1").await;

        let info = storage.file_info("docs").await.unwrap().unwrap();
        assert!(info.is_dir());
        assert_eq!(info.size, 8);
    }

    #[tokio::test]
    async fn test_write_refused_while_locked() {
        let storage = MemoryStorage::new();
        let _held = storage.hold_lock("a.txt").unwrap();
        let err = storage.write("a.txt", stream(b"x")).await.unwrap_err();
        assert!(matches!(err, StorageError::LockNotAcquired { .. }));
    }

    #[tokio::test]
    async fn test_rename_moves_descendants_and_keeps_ids() {
        let storage = MemoryStorage::new();
        storage.put_file("a/x/1.txt", b"1").await;
        let before = storage.file_info("a/x/1.txt").await.unwrap().unwrap();

        assert!(storage.rename("a/x", "a/y").await.unwrap());
        assert!(!storage.exists("a/x/1.txt").await);
        let after = storage.file_info("a/y/1.txt").await.unwrap().unwrap();
        assert_eq!(before.file_id, after.file_id);
    }

    #[tokio::test]
    async fn test_unavailable_backend() {
        let storage = MemoryStorage::new();
        storage.set_available(false);
        assert!(storage.file_info("a").await.unwrap_err().is_not_available());
        assert!(storage.free_space("").await.unwrap_err().is_not_available());
    }

    #[tokio::test]
    async fn test_mount_point_of_moveable_mount_root() {
        let storage = MemoryStorage::new();
        storage.create_dir_all("shared/ext").await;
        storage.add_moveable_mount("shared/ext").await;

        let root = storage.mount_point("/shared/ext").await.unwrap();
        assert!(root.moveable);
        assert_eq!(root.internal_path, "");

        let inner = storage.mount_point("shared/ext/file.txt").await.unwrap();
        assert_eq!(inner.internal_path, "file.txt");
    }
}
