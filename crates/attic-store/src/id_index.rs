//! Index from deleted-attachment identifiers to trash directories.
//!
//! The map lives in memory for lookups and is mirrored to a persisted copy.
//! Every insert or remove rewrites the persisted copy before returning, while
//! still holding the map's write lock, so memory and disk never diverge past a
//! single call. A failed rewrite reverts the in-memory change.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use attic_core::defaults::DELETED_ATTACHMENT_ID_MAPPINGS_NAME;
use attic_core::{AmbientTransaction, Error, FileLock, Result};

use crate::atomic_file::AtomicFileWriter;
use crate::layout::StorageLayout;
use crate::pipeline::TransactionStep;
use crate::serializer::MetadataSerializer;

/// Identifier → path relative to the storage root.
pub type IdMappings = BTreeMap<i64, String>;

/// Durable backing store for the index.
#[async_trait]
pub trait IndexPersistence: Send + Sync {
    /// Load all mappings. An absent backing store is an empty index.
    async fn load(&self) -> Result<IdMappings>;

    /// Replace the persisted mappings.
    async fn store(&self, mappings: &IdMappings) -> Result<()>;
}

/// Index persisted as a single global file, replaced atomically.
pub struct FileIndexPersistence {
    path: PathBuf,
    temp: PathBuf,
    backup: PathBuf,
    lock: FileLock,
    serializer: Arc<dyn MetadataSerializer>,
    fsync: bool,
}

impl FileIndexPersistence {
    pub fn new(
        layout: &dyn StorageLayout,
        serializer: Arc<dyn MetadataSerializer>,
        fsync: bool,
    ) -> Self {
        let path = layout.global_file(DELETED_ATTACHMENT_ID_MAPPINGS_NAME);
        Self {
            temp: layout.temp_file(&path),
            backup: layout.backup_file(&path),
            lock: layout.lock_for(&path),
            path,
            serializer,
            fsync,
        }
    }
}

#[async_trait]
impl IndexPersistence for FileIndexPersistence {
    async fn load(&self) -> Result<IdMappings> {
        let bytes = {
            let _guard = self.lock.read().await;
            match tokio::fs::read(&self.path).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %self.path.display(), "id_index: no persisted index, starting empty");
                    return Ok(IdMappings::new());
                }
                Err(e) => return Err(Error::file_io(&self.path, e)),
            }
        };
        self.serializer.parse_index(&bytes)
    }

    async fn store(&self, mappings: &IdMappings) -> Result<()> {
        let bytes = self.serializer.serialize_index(mappings)?;
        let mut writer = AtomicFileWriter::new(
            &self.path,
            &self.temp,
            &self.backup,
            self.lock.clone(),
            bytes,
        )
        .fsync(self.fsync);

        if let Err(e) = writer.apply().await {
            if let Err(revert_err) = writer.revert().await {
                warn!(path = %self.path.display(), error = %revert_err, "id_index: revert after failed write failed");
            }
            return Err(e);
        }
        writer.discard_backup().await
    }
}

/// In-memory id→path map with a synchronously persisted mirror.
pub struct DeletedAttachmentIndex {
    mappings: RwLock<IdMappings>,
    persistence: Arc<dyn IndexPersistence>,
}

impl DeletedAttachmentIndex {
    /// Load the index from its persisted form.
    pub async fn load(persistence: Arc<dyn IndexPersistence>) -> Result<Self> {
        let mappings = persistence.load().await?;
        info!(
            subsystem = "store",
            component = "id_index",
            op = "load",
            result_count = mappings.len(),
            "Deleted attachment index loaded"
        );
        Ok(Self {
            mappings: RwLock::new(mappings),
            persistence,
        })
    }

    pub async fn get(&self, id: i64) -> Option<String> {
        self.mappings.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: i64) -> bool {
        self.mappings.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.mappings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.mappings.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> IdMappings {
        self.mappings.read().await.clone()
    }

    /// Map `id` to `path` and persist. Returns the previous path, if any.
    pub async fn insert(&self, id: i64, path: String) -> Result<Option<String>> {
        let mut mappings = self.mappings.write().await;
        let previous = mappings.insert(id, path);

        if let Err(e) = self.persistence.store(&mappings).await {
            match &previous {
                Some(old) => mappings.insert(id, old.clone()),
                None => mappings.remove(&id),
            };
            return Err(e);
        }

        debug!(subsystem = "store", component = "id_index", trash_id = id, "Index entry added");
        Ok(previous)
    }

    /// Remove `id` and persist. Returns the removed path, if any.
    pub async fn remove(&self, id: i64) -> Result<Option<String>> {
        let mut mappings = self.mappings.write().await;
        let Some(previous) = mappings.remove(&id) else {
            return Ok(None);
        };

        if let Err(e) = self.persistence.store(&mappings).await {
            mappings.insert(id, previous);
            return Err(e);
        }

        debug!(subsystem = "store", component = "id_index", trash_id = id, "Index entry removed");
        Ok(Some(previous))
    }

    /// Put back the state an insert or remove replaced.
    async fn restore_entry(&self, id: i64, previous: Option<String>) -> Result<()> {
        match previous {
            Some(path) => self.insert(id, path).await.map(|_| ()),
            None => self.remove(id).await.map(|_| ()),
        }
    }
}

/// Pipeline step adding an index entry. Rollback restores the prior entry.
pub struct IndexInsertStep {
    index: Arc<DeletedAttachmentIndex>,
    id: i64,
    path: String,
    /// `Some(previous)` once the insert has been applied.
    applied: Option<Option<String>>,
}

impl IndexInsertStep {
    pub fn new(index: Arc<DeletedAttachmentIndex>, id: i64, path: String) -> Self {
        Self {
            index,
            id,
            path,
            applied: None,
        }
    }
}

#[async_trait]
impl<Tx: AmbientTransaction> TransactionStep<Tx> for IndexInsertStep {
    fn describe(&self) -> String {
        format!("index insert {}", self.id)
    }

    async fn run(&mut self, _tx: &mut Tx) -> Result<()> {
        let previous = self.index.insert(self.id, self.path.clone()).await?;
        self.applied = Some(previous);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.applied.take() {
            Some(previous) => self.index.restore_entry(self.id, previous).await,
            None => Ok(()),
        }
    }
}

/// Pipeline step removing an index entry. Rollback re-adds it.
pub struct IndexRemoveStep {
    index: Arc<DeletedAttachmentIndex>,
    id: i64,
    removed: Option<String>,
}

impl IndexRemoveStep {
    pub fn new(index: Arc<DeletedAttachmentIndex>, id: i64) -> Self {
        Self {
            index,
            id,
            removed: None,
        }
    }
}

#[async_trait]
impl<Tx: AmbientTransaction> TransactionStep<Tx> for IndexRemoveStep {
    fn describe(&self) -> String {
        format!("index remove {}", self.id)
    }

    async fn run(&mut self, _tx: &mut Tx) -> Result<()> {
        self.removed = self.index.remove(self.id).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.removed.take() {
            Some(path) => self.index.insert(self.id, path).await.map(|_| ()),
            None => Ok(()),
        }
    }
}
