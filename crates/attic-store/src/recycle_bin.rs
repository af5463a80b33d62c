//! Recycle bin for deleted attachments.
//!
//! Each deletion gets its own trash directory holding a copy of the content,
//! the archive, and a metadata record. Callers address trashed attachments by
//! a numeric identifier, resolved to the trash directory through the
//! [`DeletedAttachmentIndex`].

use std::cmp::Reverse;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, info, warn};

use attic_core::defaults::INITIAL_ATTACHMENT_VERSION;
use attic_core::{
    content_checksum, AmbientTransaction, ArchiveRevision, Attachment, AttachmentArchive,
    AttachmentContent, DeletedAttachment, DeletedAttachmentRecord, DocumentReference, Error,
    FileContent, Result,
};

use crate::atomic_file::{AtomicFileRemover, AtomicFileWriter, DirectoryCleanup};
use crate::content_store::ensure_filename;
use crate::id_index::{
    DeletedAttachmentIndex, FileIndexPersistence, IndexInsertStep, IndexRemoveStep,
};
use crate::layout::{read_if_exists, DeletedAttachmentFiles, StorageLayout};
use crate::pipeline::Pipeline;
use crate::serializer::{
    ArchiveSerializer, JsonArchiveSerializer, JsonMetadataSerializer, MetadataSerializer,
};

/// Filesystem recycle bin.
pub struct FilesystemRecycleBin {
    layout: Arc<dyn StorageLayout>,
    archives: Arc<dyn ArchiveSerializer>,
    metadata: Arc<dyn MetadataSerializer>,
    index: Arc<DeletedAttachmentIndex>,
    fsync: bool,
}

impl FilesystemRecycleBin {
    /// Open the recycle bin with JSON serializers, loading the persisted index.
    pub async fn open(layout: Arc<dyn StorageLayout>, fsync: bool) -> Result<Self> {
        let metadata: Arc<dyn MetadataSerializer> = Arc::new(JsonMetadataSerializer);
        let persistence = FileIndexPersistence::new(layout.as_ref(), metadata.clone(), fsync);
        let index = DeletedAttachmentIndex::load(Arc::new(persistence)).await?;
        Ok(Self::with_parts(
            layout,
            Arc::new(JsonArchiveSerializer),
            metadata,
            Arc::new(index),
            fsync,
        ))
    }

    pub fn with_parts(
        layout: Arc<dyn StorageLayout>,
        archives: Arc<dyn ArchiveSerializer>,
        metadata: Arc<dyn MetadataSerializer>,
        index: Arc<DeletedAttachmentIndex>,
        fsync: bool,
    ) -> Self {
        Self {
            layout,
            archives,
            metadata,
            index,
            fsync,
        }
    }

    pub fn index(&self) -> &Arc<DeletedAttachmentIndex> {
        &self.index
    }

    /// Copy an attachment into the trash and index it.
    ///
    /// Content comes from the attachment if loaded, otherwise from its live
    /// file. The live files are not touched. Returns the new identifier.
    pub async fn move_to_trash<Tx: AmbientTransaction>(
        &self,
        tx: &mut Tx,
        attachment: &Attachment,
        deleter: &str,
        deleted_at: DateTime<Utc>,
    ) -> Result<i64> {
        ensure_filename(attachment)?;
        let started = Instant::now();
        // The trash directory name only keeps millisecond precision.
        let deleted_at = deleted_at.trunc_subsecs(3);

        let record = DeletedAttachmentRecord::new(
            attachment.document.clone(),
            &attachment.filename,
            deleter,
            deleted_at,
        );
        let id = record.id;
        if self.index.contains(id).await {
            return Err(Error::InvalidInput(format!(
                "attachment '{}' in {} was already trashed at {deleted_at}",
                attachment.filename, attachment.document
            )));
        }

        let bytes = self.current_content(attachment).await?;
        let archive = self.current_archive(attachment, &bytes).await?;

        let files = self.layout.deleted_attachment_dir(
            &attachment.document,
            &attachment.filename,
            deleted_at,
        );
        let relative = self.layout.relative_to_root(&files.dir)?;

        let mut pipeline = Pipeline::new("move_to_trash");
        pipeline
            .push(self.writer(files.metadata_file(), self.metadata.serialize_record(&record)?))
            .push(self.writer(files.archive_file(), self.archives.serialize(&archive)?))
            .push(self.writer(files.content_file(), bytes))
            .push(IndexInsertStep::new(self.index.clone(), id, relative));
        pipeline.start(tx).await?;

        info!(
            subsystem = "store",
            component = "recycle_bin",
            op = "move_to_trash",
            document = %attachment.document,
            filename = %attachment.filename,
            trash_id = id,
            duration_ms = started.elapsed().as_millis() as u64,
            "Attachment moved to recycle bin"
        );
        Ok(id)
    }

    async fn current_content(&self, attachment: &Attachment) -> Result<Vec<u8>> {
        if let Some(content) = &attachment.content {
            return content.bytes().await;
        }
        let path = self
            .layout
            .attachment_content_file(&attachment.document, &attachment.filename);
        read_if_exists(self.layout.as_ref(), &path)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "content of attachment '{}' in {} is missing at {}",
                    attachment.filename,
                    attachment.document,
                    path.display()
                ))
            })
    }

    async fn current_archive(
        &self,
        attachment: &Attachment,
        bytes: &[u8],
    ) -> Result<AttachmentArchive> {
        if let Some(archive) = &attachment.archive {
            return Ok(archive.clone());
        }
        let path = self
            .layout
            .attachment_archive_file(&attachment.document, &attachment.filename);
        if let Some(stored) = read_if_exists(self.layout.as_ref(), &path).await? {
            return self.archives.parse(&stored);
        }

        let mut archive = AttachmentArchive::new(&attachment.filename);
        archive.record_revision(ArchiveRevision {
            version: attachment.version.clone(),
            date: attachment.date,
            author: attachment.author.clone(),
            mime_type: attachment.mime_type.clone(),
            size: bytes.len() as u64,
            checksum: content_checksum(bytes),
            content: bytes.to_vec(),
        });
        Ok(archive)
    }

    fn writer(&self, target: PathBuf, content: Vec<u8>) -> AtomicFileWriter {
        AtomicFileWriter::new(
            &target,
            self.layout.temp_file(&target),
            self.layout.backup_file(&target),
            self.layout.lock_for(&target),
            content,
        )
        .fsync(self.fsync)
    }

    fn remover(&self, target: PathBuf) -> AtomicFileRemover {
        AtomicFileRemover::new(
            &target,
            self.layout.holding_file(&target),
            self.layout.lock_for(&target),
        )
    }

    /// Reconstitute a live attachment from the trash. The trash copy stays.
    ///
    /// Returns `None` if the identifier is unknown.
    pub async fn restore(&self, id: i64) -> Result<Option<Attachment>> {
        let Some(deleted) = self.get_deleted_attachment(id).await? else {
            debug!(
                subsystem = "store",
                component = "recycle_bin",
                op = "restore",
                trash_id = id,
                "No such deleted attachment"
            );
            return Ok(None);
        };
        let attachment = deleted.restore_attachment().await?;
        info!(
            subsystem = "store",
            component = "recycle_bin",
            op = "restore",
            document = %attachment.document,
            filename = %attachment.filename,
            trash_id = id,
            "Attachment restored from recycle bin"
        );
        Ok(Some(attachment))
    }

    /// Look up one trashed attachment by identifier.
    pub async fn get_deleted_attachment(&self, id: i64) -> Result<Option<DeletedAttachment>> {
        let Some(relative) = self.index.get(id).await else {
            return Ok(None);
        };
        let files = self.layout.deleted_attachment_files(&relative)?;
        self.reconstruct(&files).await
    }

    /// Every trashed attachment of `document`, newest deletion first.
    pub async fn get_all_deleted_attachments(
        &self,
        document: &DocumentReference,
    ) -> Result<Vec<DeletedAttachment>> {
        self.collect_deleted(document, None).await
    }

    /// Every trashed version of one attachment name, newest deletion first.
    pub async fn get_all_deleted_attachments_for(
        &self,
        document: &DocumentReference,
        filename: &str,
    ) -> Result<Vec<DeletedAttachment>> {
        self.collect_deleted(document, Some(filename)).await
    }

    async fn collect_deleted(
        &self,
        document: &DocumentReference,
        filename: Option<&str>,
    ) -> Result<Vec<DeletedAttachment>> {
        let grouped = self.layout.deleted_attachments_for_document(document).await?;

        let mut deleted = Vec::new();
        for (name, by_date) in &grouped {
            if filename.is_some_and(|f| f != name.as_str()) {
                continue;
            }
            for files in by_date.values() {
                if let Some(entry) = self.reconstruct(files).await? {
                    deleted.push(entry);
                }
            }
        }

        deleted.sort_by_key(|d| {
            (
                Reverse(d.record.deleted_at),
                d.record.filename.clone(),
                d.record.id,
            )
        });
        debug!(
            subsystem = "store",
            component = "recycle_bin",
            op = "get_all_deleted_attachments",
            document = %document,
            result_count = deleted.len(),
            "Listed deleted attachments"
        );
        Ok(deleted)
    }

    /// Permanently delete a trashed attachment and drop it from the index.
    ///
    /// An identifier that is not indexed counts as already purged.
    pub async fn purge<Tx: AmbientTransaction>(&self, tx: &mut Tx, id: i64) -> Result<()> {
        let Some(relative) = self.index.get(id).await else {
            info!(
                subsystem = "store",
                component = "recycle_bin",
                op = "purge",
                trash_id = id,
                outcome = "already_absent",
                "Purge of unknown identifier, nothing to do"
            );
            return Ok(());
        };
        let files = self.layout.deleted_attachment_files(&relative)?;

        let metadata_file = files.metadata_file();
        let has_metadata = {
            let _guard = self.layout.lock_for(&metadata_file).read().await;
            tokio::fs::try_exists(&metadata_file)
                .await
                .map_err(|e| Error::file_io(&metadata_file, e))?
        };
        if !has_metadata {
            warn!(
                subsystem = "store",
                component = "recycle_bin",
                op = "purge",
                trash_id = id,
                path = %files.dir.display(),
                outcome = "stale_index_entry",
                "Indexed trash directory has no metadata record, dropping index entry"
            );
        }

        // The directory goes last, with leftover backups from earlier rollbacks.
        let mut pipeline = Pipeline::new("purge");
        pipeline
            .push(DirectoryCleanup::all(&files.dir))
            .push(self.remover(metadata_file))
            .push(self.remover(files.content_file()))
            .push(self.remover(files.archive_file()))
            .push(IndexRemoveStep::new(self.index.clone(), id));
        pipeline.start(tx).await?;

        info!(
            subsystem = "store",
            component = "recycle_bin",
            op = "purge",
            trash_id = id,
            outcome = "purged",
            "Deleted attachment purged"
        );
        Ok(())
    }

    /// Rebuild a deleted attachment from its trash directory.
    ///
    /// A missing metadata record means the entry does not exist.
    async fn reconstruct(&self, files: &DeletedAttachmentFiles) -> Result<Option<DeletedAttachment>> {
        let metadata_file = files.metadata_file();
        let Some(metadata) = read_if_exists(self.layout.as_ref(), &metadata_file).await? else {
            return Ok(None);
        };
        let record = self.metadata.parse_record(&metadata)?;

        let archive_file = files.archive_file();
        let archive = match read_if_exists(self.layout.as_ref(), &archive_file).await? {
            Some(bytes) => Some(self.archives.parse(&bytes)?),
            None => {
                warn!(
                    subsystem = "store",
                    component = "recycle_bin",
                    trash_id = record.id,
                    path = %archive_file.display(),
                    "Deleted attachment has no archive"
                );
                None
            }
        };

        let content_file = files.content_file();
        let content = FileContent::new(&content_file, self.layout.lock_for(&content_file));
        let latest = archive.as_ref().and_then(|a| a.latest());

        let attachment = Attachment {
            document: record.document.clone(),
            filename: record.filename.clone(),
            version: latest
                .map(|r| r.version.clone())
                .unwrap_or_else(|| INITIAL_ATTACHMENT_VERSION.to_string()),
            date: latest.map(|r| r.date).unwrap_or(record.deleted_at),
            author: latest.and_then(|r| r.author.clone()),
            mime_type: latest.and_then(|r| r.mime_type.clone()),
            size: latest.map(|r| r.size).unwrap_or(0),
            content: Some(AttachmentContent::File(content)),
            archive,
        };

        Ok(Some(DeletedAttachment { record, attachment }))
    }
}
