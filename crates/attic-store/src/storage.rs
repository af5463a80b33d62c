//! Entry point wiring the layout, content store, and recycle bin together.

use std::sync::Arc;

use tracing::info;

use attic_core::{DocumentStore, Result, StoreConfig};

use crate::content_store::FilesystemAttachmentStore;
use crate::layout::{DefaultStorageLayout, StorageLayout};
use crate::recycle_bin::FilesystemRecycleBin;
use crate::serializer::JsonArchiveSerializer;

/// Attachment storage rooted at one work directory.
pub struct AttachmentStorage<D: DocumentStore> {
    /// Path layout and lock registry shared by both stores.
    pub layout: Arc<DefaultStorageLayout>,
    /// Live attachment content and archives.
    pub attachments: FilesystemAttachmentStore<D>,
    /// Deleted attachments.
    pub recycle_bin: FilesystemRecycleBin,
}

impl<D: DocumentStore> AttachmentStorage<D> {
    /// Validate the config, initialize the layout, and load the recycle bin index.
    pub async fn open(config: &StoreConfig, documents: Arc<D>) -> Result<Self> {
        config.validate()?;

        let layout = Arc::new(DefaultStorageLayout::from_config(config));
        layout.initialize().await?;
        let shared: Arc<dyn StorageLayout> = layout.clone();

        let attachments = FilesystemAttachmentStore::new(
            shared.clone(),
            Arc::new(JsonArchiveSerializer),
            documents,
        )
        .fsync(config.fsync);
        let recycle_bin = FilesystemRecycleBin::open(shared, config.fsync).await?;

        info!(
            subsystem = "store",
            op = "open",
            path = %layout.storage_root().display(),
            fsync = config.fsync,
            "Attachment storage opened"
        );

        Ok(Self {
            layout,
            attachments,
            recycle_bin,
        })
    }
}
