//! Per-file reader/writer locks.
//!
//! Every stored file is guarded by one `FileLock`. Locks are handed out by a
//! [`LockRegistry`] keyed on absolute path, so two handles for the same path
//! always share a lock. The registry only holds weak references: a lock lives
//! as long as some handle (a content handle, a pending writer) holds it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

use crate::defaults::LOCK_REGISTRY_PRUNE_THRESHOLD;

/// Shared reader/writer lock for a single file.
///
/// Guards are owned, so they can be held across steps of a pipeline and are
/// released when dropped on every exit path.
#[derive(Clone, Debug, Default)]
pub struct FileLock {
    inner: Arc<RwLock<()>>,
}

impl FileLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for reading.
    pub async fn read(&self) -> OwnedRwLockReadGuard<()> {
        self.inner.clone().read_owned().await
    }

    /// Acquire the lock for writing.
    pub async fn write(&self) -> OwnedRwLockWriteGuard<()> {
        self.inner.clone().write_owned().await
    }

    /// True when both handles guard the same file.
    pub fn same_lock(&self, other: &FileLock) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Registry handing out one [`FileLock`] per path.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<PathBuf, Weak<RwLock<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the lock for `path`, creating it if no live handle exists.
    pub fn lock_for(&self, path: &Path) -> FileLock {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(inner) = locks.get(path).and_then(Weak::upgrade) {
            return FileLock { inner };
        }

        if locks.len() >= LOCK_REGISTRY_PRUNE_THRESHOLD {
            let before = locks.len();
            locks.retain(|_, weak| weak.strong_count() > 0);
            debug!(
                subsystem = "store",
                component = "lock_registry",
                removed = before - locks.len(),
                "Pruned dead lock entries"
            );
        }

        let inner = Arc::new(RwLock::new(()));
        locks.insert(path.to_path_buf(), Arc::downgrade(&inner));
        FileLock { inner }
    }

    /// Number of registry entries, live or dead.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_same_path_shares_lock() {
        let registry = LockRegistry::new();
        let a = registry.lock_for(Path::new("/store/a"));
        let b = registry.lock_for(Path::new("/store/a"));
        let c = registry.lock_for(Path::new("/store/c"));
        assert!(a.same_lock(&b));
        assert!(!a.same_lock(&c));
    }

    #[test]
    fn test_lock_recreated_after_all_handles_dropped() {
        let registry = LockRegistry::new();
        let first = registry.lock_for(Path::new("/store/a"));
        let weak = Arc::downgrade(&first.inner);
        drop(first);
        assert!(weak.upgrade().is_none());

        let second = registry.lock_for(Path::new("/store/a"));
        assert_eq!(Arc::strong_count(&second.inner), 1);
    }

    #[test]
    fn test_dead_entries_pruned() {
        let registry = LockRegistry::new();
        for i in 0..LOCK_REGISTRY_PRUNE_THRESHOLD {
            let _ = registry.lock_for(&PathBuf::from(format!("/store/{i}")));
        }
        assert_eq!(registry.len(), LOCK_REGISTRY_PRUNE_THRESHOLD);
        let _live = registry.lock_for(Path::new("/store/live"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_writer_excludes_readers() {
        let lock = FileLock::new();
        let write_guard = lock.write().await;

        let reader = lock.clone();
        let handle = tokio::spawn(async move {
            let _g = reader.read().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(write_guard);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_readers_share() {
        let lock = FileLock::new();
        let _a = lock.read().await;
        let b = tokio::time::timeout(Duration::from_millis(100), lock.read()).await;
        assert!(b.is_ok());
    }
}
