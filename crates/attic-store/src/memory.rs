//! In-process document store and ambient transaction.
//!
//! Documents saved inside a [`MemoryTransaction`] become visible only when the
//! transaction commits. A transaction marked rollback-only refuses to commit.
//! Deferred file pipelines are finalized or undone with the transaction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use attic_core::{
    AmbientTransaction, CompletionQueue, Document, DocumentReference, DocumentStore, Error, Result,
    TransactionCompletion,
};

/// Pending document writes plus the rollback-only flag.
#[derive(Debug, Default)]
pub struct MemoryTransaction {
    rollback_reason: Option<String>,
    pending: Vec<Document>,
    completions: CompletionQueue,
}

impl MemoryTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rollback_reason(&self) -> Option<&str> {
        self.rollback_reason.as_deref()
    }

    pub fn pending(&self) -> &[Document] {
        &self.pending
    }

    /// Number of file pipelines waiting on this transaction.
    pub fn deferred(&self) -> usize {
        self.completions.len()
    }
}

impl AmbientTransaction for MemoryTransaction {
    fn set_rollback_only(&mut self, reason: &str) {
        if self.rollback_reason.is_none() {
            self.rollback_reason = Some(reason.to_string());
        }
    }

    fn is_rollback_only(&self) -> bool {
        self.rollback_reason.is_some()
    }

    fn defer(&mut self, completion: Box<dyn TransactionCompletion>) {
        self.completions.push(completion);
    }
}

/// Document store holding committed documents in memory.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<DocumentReference, Document>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
    fail_commits: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> MemoryTransaction {
        MemoryTransaction::new()
    }

    /// Apply the transaction's pending writes, then finalize its file
    /// pipelines. A rollback-only or failing commit undoes them instead.
    pub async fn commit(&self, tx: MemoryTransaction) -> Result<()> {
        if let Some(reason) = tx.rollback_reason {
            tx.completions.rollback_all().await;
            return Err(Error::Transaction(format!(
                "transaction is rollback-only: {reason}"
            )));
        }
        if self.fail_commits.load(Ordering::SeqCst) {
            tx.completions.rollback_all().await;
            return Err(Error::Transaction("commit rejected".to_string()));
        }
        {
            let mut documents = self.documents.write().await;
            for document in tx.pending {
                documents.insert(document.reference.clone(), document);
            }
        }
        tx.completions.commit_all().await;
        Ok(())
    }

    /// Discard the transaction's pending writes and undo its file pipelines.
    pub async fn rollback(&self, tx: MemoryTransaction) {
        debug!(
            subsystem = "store",
            component = "memory",
            result_count = tx.pending.len(),
            "Transaction rolled back"
        );
        tx.completions.rollback_all().await;
    }

    /// Number of `save_document` calls, committed or not.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every subsequent `save_document` fail, for exercising rollback.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `commit` fail as a lost connection would.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    type Tx = MemoryTransaction;

    async fn save_document(&self, tx: &mut MemoryTransaction, document: &Document) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Internal(format!(
                "document save rejected for {}",
                document.reference
            )));
        }
        debug!(
            subsystem = "store",
            component = "memory",
            document = %document.reference,
            "Document queued in transaction"
        );
        tx.pending.retain(|d| d.reference != document.reference);
        tx.pending.push(document.clone());
        Ok(())
    }

    async fn load_document(&self, reference: &DocumentReference) -> Result<Option<Document>> {
        Ok(self.documents.read().await.get(reference).cloned())
    }
}
