//! Shared fixtures for attic-store integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use attic_core::{Attachment, Document, DocumentReference, StoreConfig};
use attic_store::{AttachmentStorage, MemoryDocumentStore};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn doc_ref() -> DocumentReference {
    DocumentReference::new("xwiki", ["Main"], "WebHome")
}

pub fn attachment(filename: &str, content: &[u8]) -> Attachment {
    Attachment::new(doc_ref(), filename)
        .with_content(content.to_vec())
        .with_author("XWiki.Admin")
        .with_mime_type("application/octet-stream")
}

pub fn document() -> Document {
    Document::new(doc_ref())
}

pub fn config(temp_dir: &TempDir) -> StoreConfig {
    StoreConfig::with_work_dir(temp_dir.path()).fsync(false)
}

/// Open storage over a fresh in-memory document store.
pub async fn open_storage(
    temp_dir: &TempDir,
) -> (AttachmentStorage<MemoryDocumentStore>, Arc<MemoryDocumentStore>) {
    init_tracing();
    let documents = Arc::new(MemoryDocumentStore::new());
    let storage = AttachmentStorage::open(&config(temp_dir), documents.clone())
        .await
        .expect("Failed to open attachment storage");
    (storage, documents)
}
