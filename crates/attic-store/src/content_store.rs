//! Live attachment content and version archives.
//!
//! Saving writes the content file and the archive in one pipeline, optionally
//! followed by a save of the owning document. Deleting moves both files aside
//! and only removes them once the ambient transaction (and with it the
//! document save) has committed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use attic_core::{
    content_checksum, ArchiveRevision, Attachment, AttachmentArchive, AttachmentContent,
    Document, DocumentStore, Error, FileContent, Result,
};

use crate::atomic_file::{AtomicFileRemover, AtomicFileWriter, DirectoryCleanup};
use crate::layout::{read_if_exists, StorageLayout};
use crate::pipeline::{Pipeline, TransactionStep};
use crate::serializer::ArchiveSerializer;

/// Pipeline step persisting a document through the relational store.
///
/// There is nothing to compensate here: the ambient transaction is marked
/// rollback-only when the pipeline fails, which discards the save.
pub struct SaveDocumentStep<D: DocumentStore> {
    documents: Arc<D>,
    document: Document,
}

impl<D: DocumentStore> SaveDocumentStep<D> {
    pub fn new(documents: Arc<D>, document: Document) -> Self {
        Self {
            documents,
            document,
        }
    }
}

#[async_trait]
impl<D: DocumentStore> TransactionStep<D::Tx> for SaveDocumentStep<D> {
    fn describe(&self) -> String {
        format!("save document {}", self.document.reference)
    }

    async fn run(&mut self, tx: &mut D::Tx) -> Result<()> {
        self.documents.save_document(tx, &self.document).await
    }
}

/// Content store keeping attachment bytes and archives on the filesystem.
pub struct FilesystemAttachmentStore<D: DocumentStore> {
    layout: Arc<dyn StorageLayout>,
    archives: Arc<dyn ArchiveSerializer>,
    documents: Arc<D>,
    fsync: bool,
}

/// Archive state computed for one attachment ahead of a save.
struct PreparedSave {
    archive: AttachmentArchive,
    size: u64,
}

impl<D: DocumentStore> FilesystemAttachmentStore<D> {
    pub fn new(
        layout: Arc<dyn StorageLayout>,
        archives: Arc<dyn ArchiveSerializer>,
        documents: Arc<D>,
    ) -> Self {
        Self {
            layout,
            archives,
            documents,
            fsync: true,
        }
    }

    /// Whether writers `sync_all` temporary files before renaming them.
    pub fn fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn documents(&self) -> &Arc<D> {
        &self.documents
    }

    /// Save one attachment's content and archive.
    ///
    /// Does nothing when the attachment carries no content. When `parent` is
    /// given, the attachment is recorded in it and the document is saved in
    /// the same pipeline.
    pub async fn save_content(
        &self,
        tx: &mut D::Tx,
        attachment: &mut Attachment,
        parent: Option<&mut Document>,
    ) -> Result<()> {
        if attachment.content.is_none() {
            debug!(
                subsystem = "store",
                component = "attachment_store",
                op = "save_content",
                document = %attachment.document,
                filename = %attachment.filename,
                "No content loaded, nothing to save"
            );
            return Ok(());
        }
        self.save_all(tx, std::slice::from_mut(attachment), parent, "save_content")
            .await
    }

    /// Save several attachments in one pipeline. The parent document, when
    /// given, is saved exactly once.
    pub async fn save_multiple(
        &self,
        tx: &mut D::Tx,
        attachments: &mut [Attachment],
        parent: Option<&mut Document>,
    ) -> Result<()> {
        self.save_all(tx, attachments, parent, "save_multiple").await
    }

    async fn save_all(
        &self,
        tx: &mut D::Tx,
        attachments: &mut [Attachment],
        mut parent: Option<&mut Document>,
        op: &'static str,
    ) -> Result<()> {
        let started = Instant::now();
        let mut pipeline = Pipeline::new(op);
        let mut prepared = Vec::with_capacity(attachments.len());

        for attachment in attachments.iter() {
            ensure_filename(attachment)?;
            prepared.push(self.prepare_save(&mut pipeline, attachment).await?);
        }

        let original = parent.as_deref().cloned();
        if let Some(document) = parent.as_deref_mut() {
            for (attachment, prepared) in attachments.iter().zip(&prepared) {
                let mut summary = attachment.summary();
                if let Some(prepared) = prepared {
                    summary.size = prepared.size;
                }
                document.upsert_summary(summary);
            }
            pipeline.push(SaveDocumentStep::new(self.documents.clone(), document.clone()));
        }

        if let Err(e) = pipeline.start(tx).await {
            if let (Some(document), Some(original)) = (parent, original) {
                *document = original;
            }
            return Err(e);
        }

        let mut saved = 0;
        for (attachment, prepared) in attachments.iter_mut().zip(prepared) {
            if let Some(prepared) = prepared {
                attachment.archive = Some(prepared.archive);
                attachment.size = prepared.size;
                saved += 1;
            }
        }

        info!(
            subsystem = "store",
            component = "attachment_store",
            op,
            result_count = saved,
            duration_ms = started.elapsed().as_millis() as u64,
            "Attachment content saved"
        );
        Ok(())
    }

    /// Queue the content and archive writers for one attachment.
    async fn prepare_save(
        &self,
        pipeline: &mut Pipeline<D::Tx>,
        attachment: &Attachment,
    ) -> Result<Option<PreparedSave>> {
        let Some(content) = &attachment.content else {
            return Ok(None);
        };

        let content_path = self
            .layout
            .attachment_content_file(&attachment.document, &attachment.filename);
        let archive_path = self
            .layout
            .attachment_archive_file(&attachment.document, &attachment.filename);

        // Read before any write lock is taken: the handle may point at the
        // very file this pipeline replaces.
        let bytes = content.bytes().await?;
        let already_stored = matches!(
            content,
            AttachmentContent::File(file) if file.path() == content_path.as_path()
        );

        let mut archive = match &attachment.archive {
            Some(archive) => archive.clone(),
            None => match self.read_archive(&archive_path).await? {
                Some(archive) => archive,
                None => {
                    debug!(
                        subsystem = "store",
                        component = "attachment_store",
                        document = %attachment.document,
                        filename = %attachment.filename,
                        "Creating archive"
                    );
                    AttachmentArchive::new(&attachment.filename)
                }
            },
        };
        archive.record_revision(ArchiveRevision {
            version: attachment.version.clone(),
            date: attachment.date,
            author: attachment.author.clone(),
            mime_type: attachment.mime_type.clone(),
            size: bytes.len() as u64,
            checksum: content_checksum(&bytes),
            content: bytes.clone(),
        });
        let size = bytes.len() as u64;

        if !already_stored {
            pipeline.push(self.writer(content_path, bytes));
        }
        pipeline.push(self.writer(archive_path, self.archives.serialize(&archive)?));

        Ok(Some(PreparedSave { archive, size }))
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

    /// Attach a lazy handle to the stored content.
    ///
    /// Fails with `NotFound` when no content file exists.
    pub async fn load_content(&self, attachment: &mut Attachment) -> Result<()> {
        ensure_filename(attachment)?;
        let path = self
            .layout
            .attachment_content_file(&attachment.document, &attachment.filename);
        let lock = self.layout.lock_for(&path);

        let exists = {
            let _guard = lock.read().await;
            tokio::fs::try_exists(&path)
                .await
                .map_err(|e| Error::file_io(&path, e))?
        };
        if !exists {
            return Err(Error::NotFound(format!(
                "content of attachment '{}' in {} is missing at {}. If attachment storage was \
                 switched to the filesystem, existing attachments must be migrated first",
                attachment.filename,
                attachment.document,
                path.display()
            )));
        }

        attachment.content = Some(AttachmentContent::File(FileContent::new(path, lock)));
        Ok(())
    }

    /// Whether a content file exists for `attachment`.
    pub async fn content_exists(&self, attachment: &Attachment) -> Result<bool> {
        ensure_filename(attachment)?;
        let path = self
            .layout
            .attachment_content_file(&attachment.document, &attachment.filename);
        let _guard = self.layout.lock_for(&path).read().await;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::file_io(&path, e))
    }

    /// Read the stored archive, `None` if the attachment was never saved.
    pub async fn load_archive(&self, attachment: &Attachment) -> Result<Option<AttachmentArchive>> {
        ensure_filename(attachment)?;
        let path = self
            .layout
            .attachment_archive_file(&attachment.document, &attachment.filename);
        self.read_archive(&path).await
    }

    async fn read_archive(&self, path: &Path) -> Result<Option<AttachmentArchive>> {
        match read_if_exists(self.layout.as_ref(), path).await? {
            Some(bytes) => self.archives.parse(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Remove an attachment's content and archive. When `parent` is given,
    /// the attachment is dropped from it and the document is saved in the
    /// same pipeline.
    pub async fn delete_content(
        &self,
        tx: &mut D::Tx,
        attachment: &mut Attachment,
        mut parent: Option<&mut Document>,
    ) -> Result<()> {
        ensure_filename(attachment)?;
        let started = Instant::now();
        let document_ref = &attachment.document;
        let content_path = self
            .layout
            .attachment_content_file(document_ref, &attachment.filename);
        let archive_path = self
            .layout
            .attachment_archive_file(document_ref, &attachment.filename);

        let dir = self
            .layout
            .attachment_dir(&attachment.document, &attachment.filename);

        // Registered first so its commit runs after the removers have
        // dropped their held files.
        let mut pipeline = Pipeline::new("delete_content");
        pipeline
            .push(DirectoryCleanup::if_empty(dir))
            .push(self.remover(content_path))
            .push(self.remover(archive_path));

        let original = parent.as_deref().cloned();
        if let Some(document) = parent.as_deref_mut() {
            document.remove_attachment(&attachment.filename);
            pipeline.push(SaveDocumentStep::new(self.documents.clone(), document.clone()));
        }

        if let Err(e) = pipeline.start(tx).await {
            if let (Some(document), Some(original)) = (parent, original) {
                *document = original;
            }
            return Err(e);
        }

        attachment.content = None;
        attachment.archive = None;

        info!(
            subsystem = "store",
            component = "attachment_store",
            op = "delete_content",
            document = %attachment.document,
            filename = %attachment.filename,
            duration_ms = started.elapsed().as_millis() as u64,
            "Attachment content deleted"
        );
        Ok(())
    }
}

/// Reject names that cannot map to a file.
pub(crate) fn ensure_filename(attachment: &Attachment) -> Result<()> {
    if attachment.filename.is_empty() {
        return Err(Error::InvalidInput(format!(
            "attachment in {} has an empty filename",
            attachment.document
        )));
    }
    Ok(())
}
