//! # attic-store
//!
//! Transactional filesystem storage for wiki attachments.
//!
//! This crate provides:
//! - A unit-of-work pipeline with reverse-order compensation
//! - Atomic single-file writes and removals guarded by per-file locks
//! - Live attachment content and version archives
//! - A recycle bin addressed by stable numeric identifiers
//! - In-memory and PostgreSQL document stores for the ambient transaction
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use attic_core::{Attachment, Document, DocumentReference, StoreConfig};
//! use attic_store::{AttachmentStorage, MemoryDocumentStore};
//!
//! let documents = Arc::new(MemoryDocumentStore::new());
//! let storage = AttachmentStorage::open(&StoreConfig::from_env(), documents.clone()).await?;
//!
//! let reference = DocumentReference::new("xwiki", ["Main"], "WebHome");
//! let mut document = Document::new(reference.clone());
//! let mut attachment = Attachment::new(reference, "logo.png").with_content(bytes);
//!
//! let mut tx = documents.begin();
//! storage.attachments.save_content(&mut tx, &mut attachment, Some(&mut document)).await?;
//! documents.commit(tx).await?;
//! ```

pub mod atomic_file;
pub mod content_store;
pub mod id_index;
pub mod layout;
pub mod memory;
pub mod pg;
pub mod pipeline;
pub mod recycle_bin;
pub mod serializer;
pub mod storage;

pub use atomic_file::{AtomicFileRemover, AtomicFileWriter, DirectoryCleanup};
pub use content_store::{FilesystemAttachmentStore, SaveDocumentStep};
pub use id_index::{
    DeletedAttachmentIndex, FileIndexPersistence, IdMappings, IndexInsertStep, IndexPersistence,
    IndexRemoveStep,
};
pub use layout::{DefaultStorageLayout, DeletedAttachmentFiles, StorageLayout};
pub use memory::{MemoryDocumentStore, MemoryTransaction};
pub use pg::{PgDocumentStore, PgTransaction};
pub use pipeline::{Pipeline, TransactionStep};
pub use recycle_bin::FilesystemRecycleBin;
pub use serializer::{
    ArchiveSerializer, JsonArchiveSerializer, JsonMetadataSerializer, MetadataSerializer,
};
pub use storage::AttachmentStorage;
