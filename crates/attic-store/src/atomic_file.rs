//! Atomic single-file replacement and removal.
//!
//! [`AtomicFileWriter`] writes new bytes to a temporary file, copies the
//! current target to a backup, then renames the temporary file over the
//! target. Readers holding the file's read lock see either the old or the new
//! bytes, never a partial file. [`AtomicFileRemover`] moves the target to a
//! holding path and only deletes it once the pipeline commits.
//! [`DirectoryCleanup`] removes a directory at commit time.
//!
//! Backup and holding paths already in use (a stale copy, or one owned by an
//! earlier step of the same transaction) are never overwritten: the step
//! claims the first free numbered variant instead.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use attic_core::{AmbientTransaction, Error, FileLock, Result};

use crate::pipeline::TransactionStep;

/// Pending replacement of one file's content.
pub struct AtomicFileWriter {
    target: PathBuf,
    temp: PathBuf,
    backup: PathBuf,
    lock: FileLock,
    content: Vec<u8>,
    fsync: bool,
    /// The previous target was copied to `backup` by this writer.
    backed_up: bool,
    /// `temp` was renamed over `target` by this writer.
    replaced: bool,
}

impl AtomicFileWriter {
    pub fn new(
        target: impl Into<PathBuf>,
        temp: impl Into<PathBuf>,
        backup: impl Into<PathBuf>,
        lock: FileLock,
        content: Vec<u8>,
    ) -> Self {
        Self {
            target: target.into(),
            temp: temp.into(),
            backup: backup.into(),
            lock,
            content,
            fsync: true,
            backed_up: false,
            replaced: false,
        }
    }

    /// Whether to `sync_all` the temporary file before renaming it.
    pub fn fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Replace the target under its write lock.
    pub async fn apply(&mut self) -> Result<()> {
        let _guard = self.lock.write().await;

        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "atomic_file: create_dir_all failed");
                Error::file_io(parent, e)
            })?;
        }

        self.write_temp().await?;

        if fs::try_exists(&self.target)
            .await
            .map_err(|e| Error::file_io(&self.target, e))?
        {
            self.backup = unused_variant(&self.backup).await?;
            fs::copy(&self.target, &self.backup).await.map_err(|e| {
                warn!(from = %self.target.display(), to = %self.backup.display(), error = %e, "atomic_file: backup copy failed");
                Error::file_io(&self.backup, e)
            })?;
            self.backed_up = true;
        }

        fs::rename(&self.temp, &self.target).await.map_err(|e| {
            warn!(from = %self.temp.display(), to = %self.target.display(), error = %e, "atomic_file: rename failed");
            Error::file_io(&self.target, e)
        })?;
        self.replaced = true;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.target, std::fs::Permissions::from_mode(0o644))
                .await
                .map_err(|e| Error::file_io(&self.target, e))?;
        }

        debug!(
            subsystem = "store",
            component = "atomic_file",
            path = %self.target.display(),
            size = self.content.len(),
            "File replaced"
        );
        Ok(())
    }

    async fn write_temp(&self) -> Result<()> {
        let mut file = fs::File::create(&self.temp).await.map_err(|e| {
            warn!(temp_path = %self.temp.display(), error = %e, "atomic_file: File::create failed");
            Error::file_io(&self.temp, e)
        })?;
        file.write_all(&self.content)
            .await
            .map_err(|e| Error::file_io(&self.temp, e))?;
        if self.fsync {
            file.sync_all()
                .await
                .map_err(|e| Error::file_io(&self.temp, e))?;
        }
        Ok(())
    }

    /// Drop the backup once the replacement is final.
    pub async fn discard_backup(&mut self) -> Result<()> {
        if self.backed_up {
            let _guard = self.lock.write().await;
            remove_if_exists(&self.backup).await?;
            self.backed_up = false;
        }
        self.replaced = false;
        Ok(())
    }

    /// Undo `apply`: restore the backup, or remove a target this writer
    /// created. Leftover temporary files are deleted. The backup is kept.
    pub async fn revert(&mut self) -> Result<()> {
        let _guard = self.lock.write().await;

        if self.replaced {
            if self.backed_up {
                fs::copy(&self.backup, &self.temp)
                    .await
                    .map_err(|e| Error::file_io(&self.temp, e))?;
                fs::rename(&self.temp, &self.target)
                    .await
                    .map_err(|e| Error::file_io(&self.target, e))?;
            } else {
                remove_if_exists(&self.target).await?;
            }
            self.replaced = false;
        }
        self.backed_up = false;

        remove_if_exists(&self.temp).await
    }
}

#[async_trait]
impl<Tx: AmbientTransaction> TransactionStep<Tx> for AtomicFileWriter {
    fn describe(&self) -> String {
        format!("write {}", self.target.display())
    }

    async fn run(&mut self, _tx: &mut Tx) -> Result<()> {
        self.apply().await
    }

    async fn commit(&mut self) -> Result<()> {
        self.discard_backup().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.revert().await
    }
}

/// Pending removal of one file.
pub struct AtomicFileRemover {
    target: PathBuf,
    holding: PathBuf,
    lock: FileLock,
    moved: bool,
}

impl AtomicFileRemover {
    pub fn new(target: impl Into<PathBuf>, holding: impl Into<PathBuf>, lock: FileLock) -> Self {
        Self {
            target: target.into(),
            holding: holding.into(),
            lock,
            moved: false,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Move the target aside so it appears absent.
    pub async fn apply(&mut self) -> Result<()> {
        let _guard = self.lock.write().await;

        self.holding = unused_variant(&self.holding).await?;
        match fs::rename(&self.target, &self.holding).await {
            Ok(()) => {
                self.moved = true;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(
                    subsystem = "store",
                    component = "atomic_file",
                    path = %self.target.display(),
                    "Nothing to remove"
                );
                Ok(())
            }
            Err(e) => Err(Error::file_io(&self.target, e)),
        }
    }

    /// Delete the held file.
    pub async fn finalize(&mut self) -> Result<()> {
        if self.moved {
            remove_if_exists(&self.holding).await?;
            self.moved = false;
        }
        Ok(())
    }

    /// Move the held file back onto the target.
    pub async fn revert(&mut self) -> Result<()> {
        if !self.moved {
            return Ok(());
        }
        let _guard = self.lock.write().await;
        fs::rename(&self.holding, &self.target)
            .await
            .map_err(|e| Error::file_io(&self.target, e))?;
        self.moved = false;
        Ok(())
    }
}

#[async_trait]
impl<Tx: AmbientTransaction> TransactionStep<Tx> for AtomicFileRemover {
    fn describe(&self) -> String {
        format!("remove {}", self.target.display())
    }

    async fn run(&mut self, _tx: &mut Tx) -> Result<()> {
        self.apply().await
    }

    async fn commit(&mut self) -> Result<()> {
        self.finalize().await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.revert().await
    }
}

/// Removes a directory once the transaction commits.
///
/// Only the commit does anything: file steps registered after this one hold
/// their backups and held files inside the directory until then.
pub struct DirectoryCleanup {
    dir: PathBuf,
    recursive: bool,
}

impl DirectoryCleanup {
    /// Remove `dir` only if nothing is left in it.
    pub fn if_empty(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            recursive: false,
        }
    }

    /// Remove `dir` with everything in it.
    pub fn all(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            recursive: true,
        }
    }

    pub async fn finalize(&self) {
        let result = if self.recursive {
            fs::remove_dir_all(&self.dir).await
        } else {
            fs::remove_dir(&self.dir).await
        };
        match result {
            Ok(()) => debug!(
                subsystem = "store",
                component = "atomic_file",
                path = %self.dir.display(),
                "Directory removed"
            ),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::DirectoryNotEmpty) => {}
            Err(e) => debug!(
                subsystem = "store",
                component = "atomic_file",
                path = %self.dir.display(),
                error = %e,
                "Directory cleanup failed"
            ),
        }
    }
}

#[async_trait]
impl<Tx: AmbientTransaction> TransactionStep<Tx> for DirectoryCleanup {
    fn describe(&self) -> String {
        format!("clean up {}", self.dir.display())
    }

    async fn run(&mut self, _tx: &mut Tx) -> Result<()> {
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.finalize().await;
        Ok(())
    }
}

/// First of `base`, `base1`, `base2`, ... that does not exist yet. Callers
/// hold the target's write lock, so no other writer claims the same path.
async fn unused_variant(base: &Path) -> Result<PathBuf> {
    let mut candidate = base.to_path_buf();
    let mut n = 0u32;
    while fs::try_exists(&candidate)
        .await
        .map_err(|e| Error::file_io(&candidate, e))?
    {
        n += 1;
        candidate = with_suffix(base, &n.to_string());
    }
    Ok(candidate)
}

/// Remove a file, treating "already gone" as success.
pub(crate) async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::file_io(path, e)),
    }
}

/// `path` with `suffix` appended to its final component.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
