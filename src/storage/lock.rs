use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::errors::{StorageError, StorageResult};
use crate::utils::path::trim_path;

/// Exclusive per-path write locks.
///
/// Acquisition never waits: if another writer holds the path the caller
/// gets [`StorageError::LockNotAcquired`] and decides itself whether to
/// retry.
#[derive(Debug, Default, Clone)]
pub struct LockSet {
    held: Arc<Mutex<HashSet<String>>>,
}

impl LockSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, path: &str) -> StorageResult<WriteLock> {
        let key = trim_path(path).to_string();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(key.clone()) {
            debug!(path = %key, "write lock already held");
            return Err(StorageError::LockNotAcquired { path: key });
        }
        Ok(WriteLock {
            locks: self.clone(),
            path: key,
        })
    }

    pub fn is_locked(&self, path: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(trim_path(path))
    }

    fn release(&self, path: &str) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }
}

/// Held write lock; released on drop
#[derive(Debug)]
pub struct WriteLock {
    locks: LockSet,
    path: String,
}

impl WriteLock {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        self.locks.release(&self.path);
    }
}
