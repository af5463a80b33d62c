//! Work deferred until the ambient transaction finishes.
//!
//! File pipelines leave their compensation state (backups, held files) in
//! place after running. They register a [`TransactionCompletion`] with the
//! ambient transaction, which finalizes them once the relational commit
//! succeeds or undoes them when the transaction rolls back or fails to commit.

use async_trait::async_trait;
use tracing::debug;

/// Finalization registered with an ambient transaction.
#[async_trait]
pub trait TransactionCompletion: Send {
    fn describe(&self) -> String;

    /// The transaction committed. Failures leave garbage, not inconsistency,
    /// so implementations log instead of returning errors.
    async fn on_commit(self: Box<Self>);

    /// The transaction rolled back or failed to commit.
    async fn on_rollback(self: Box<Self>);
}

/// Completions registered with one transaction, in registration order.
#[derive(Default)]
pub struct CompletionQueue {
    pending: Vec<Box<dyn TransactionCompletion>>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, completion: Box<dyn TransactionCompletion>) {
        self.pending.push(completion);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Finalize every completion, latest first.
    pub async fn commit_all(self) {
        let count = self.pending.len();
        for completion in self.pending.into_iter().rev() {
            completion.on_commit().await;
        }
        if count > 0 {
            debug!(subsystem = "store", component = "transaction", result_count = count, "Completions committed");
        }
    }

    /// Undo every completion, latest first.
    pub async fn rollback_all(self) {
        let count = self.pending.len();
        for completion in self.pending.into_iter().rev() {
            completion.on_rollback().await;
        }
        if count > 0 {
            debug!(subsystem = "store", component = "transaction", result_count = count, "Completions rolled back");
        }
    }
}

impl std::fmt::Debug for CompletionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.pending.iter().map(|c| c.describe()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorded {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TransactionCompletion for Recorded {
        fn describe(&self) -> String {
            self.name.to_string()
        }

        async fn on_commit(self: Box<Self>) {
            self.journal.lock().unwrap().push(format!("commit:{}", self.name));
        }

        async fn on_rollback(self: Box<Self>) {
            self.journal.lock().unwrap().push(format!("rollback:{}", self.name));
        }
    }

    fn queue(journal: &Arc<Mutex<Vec<String>>>) -> CompletionQueue {
        let mut queue = CompletionQueue::new();
        for name in ["first", "second"] {
            queue.push(Box::new(Recorded {
                name,
                journal: journal.clone(),
            }));
        }
        queue
    }

    #[tokio::test]
    async fn test_commit_all_runs_latest_first() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let queue = queue(&journal);
        assert_eq!(queue.len(), 2);
        assert_eq!(format!("{queue:?}"), r#"["first", "second"]"#);

        queue.commit_all().await;
        assert_eq!(*journal.lock().unwrap(), vec!["commit:second", "commit:first"]);
    }

    #[tokio::test]
    async fn test_rollback_all_runs_latest_first() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        queue(&journal).rollback_all().await;
        assert_eq!(*journal.lock().unwrap(), vec!["rollback:second", "rollback:first"]);
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let queue = CompletionQueue::new();
        assert!(queue.is_empty());
        queue.commit_all().await;
    }
}
