//! Collaborator traits at the edges of the attachment store.

use async_trait::async_trait;

use crate::completion::TransactionCompletion;
use crate::error::Result;
use crate::models::{Document, DocumentReference};

/// Transaction context supplied by the caller.
///
/// Store operations run their file pipeline inside it. When a pipeline fails,
/// the store marks the transaction rollback-only so the caller's commit fails
/// too and relational changes are discarded alongside the file changes.
///
/// A pipeline that succeeds hands its finalization to [`defer`]. Implementors
/// run every deferred completion's `on_commit` after the relational commit
/// succeeds and `on_rollback` when the transaction rolls back or its commit
/// fails, so file changes share the transaction's outcome.
///
/// [`defer`]: AmbientTransaction::defer
pub trait AmbientTransaction: Send + 'static {
    /// Flag the transaction so it can no longer commit.
    fn set_rollback_only(&mut self, reason: &str);

    fn is_rollback_only(&self) -> bool;

    /// Register work to finish together with the transaction.
    fn defer(&mut self, completion: Box<dyn TransactionCompletion>);
}

/// Relational store for document metadata.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    type Tx: AmbientTransaction;

    /// Persist `document` within `tx`.
    async fn save_document(&self, tx: &mut Self::Tx, document: &Document) -> Result<()>;

    /// Load the committed state of a document.
    async fn load_document(&self, reference: &DocumentReference) -> Result<Option<Document>>;
}
