//! Lazy handle to attachment bytes stored on disk.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::lock::FileLock;

/// Reference to a stored content file.
///
/// Reads take the file's read lock, so a reader never observes a partially
/// replaced file. The bytes seen are those present when the read lock was
/// acquired.
#[derive(Clone)]
pub struct FileContent {
    path: PathBuf,
    lock: FileLock,
}

impl FileContent {
    pub fn new(path: impl Into<PathBuf>, lock: FileLock) -> Self {
        Self {
            path: path.into(),
            lock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock(&self) -> &FileLock {
        &self.lock
    }

    /// Read the full content.
    pub async fn read(&self) -> Result<Vec<u8>> {
        let _guard = self.lock.read().await;
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::file_io(&self.path, e))
    }

    /// Size of the content in bytes.
    pub async fn size(&self) -> Result<u64> {
        let _guard = self.lock.read().await;
        let meta = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| Error::file_io(&self.path, e))?;
        Ok(meta.len())
    }
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileContent")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_and_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let content = FileContent::new(&path, FileLock::new());
        assert_eq!(content.read().await.unwrap(), b"hello");
        assert_eq!(content.size().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_read_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let content = FileContent::new(dir.path().join("missing"), FileLock::new());
        let err = content.read().await.unwrap_err();
        assert!(err.is_not_found());
    }
}
