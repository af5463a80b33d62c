//! PostgreSQL document store.
//!
//! Documents are stored as JSONB keyed by their reference string. Saves run
//! inside the caller's [`PgTransaction`], so a failed file pipeline discards
//! the document change together with everything else in that transaction.
//! File pipelines deferred to the transaction are finalized only after the
//! database commit succeeds and are undone on every other outcome.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};

use attic_core::{
    AmbientTransaction, CompletionQueue, Document, DocumentReference, DocumentStore, Error,
    Result, StoreConfig, TransactionCompletion,
};

/// Ambient transaction backed by a sqlx transaction.
pub struct PgTransaction {
    inner: Transaction<'static, Postgres>,
    rollback_reason: Option<String>,
    completions: CompletionQueue,
}

impl PgTransaction {
    pub fn new(inner: Transaction<'static, Postgres>) -> Self {
        Self {
            inner,
            rollback_reason: None,
            completions: CompletionQueue::new(),
        }
    }

    /// The wrapped transaction, for running the caller's own queries.
    pub fn inner(&mut self) -> &mut Transaction<'static, Postgres> {
        &mut self.inner
    }

    /// Commit, or roll back if the transaction was marked rollback-only.
    ///
    /// Deferred file pipelines are finalized after a successful commit and
    /// undone otherwise.
    pub async fn commit(self) -> Result<()> {
        let Self {
            inner,
            rollback_reason,
            completions,
        } = self;

        if let Some(reason) = rollback_reason {
            let result = inner.rollback().await;
            completions.rollback_all().await;
            warn!(subsystem = "store", component = "pg", reason = %reason, "Transaction rolled back");
            result?;
            return Err(Error::Transaction(format!(
                "transaction is rollback-only: {reason}"
            )));
        }

        match inner.commit().await {
            Ok(()) => {
                completions.commit_all().await;
                Ok(())
            }
            Err(e) => {
                warn!(subsystem = "store", component = "pg", error = %e, "Commit failed, undoing file changes");
                completions.rollback_all().await;
                Err(e.into())
            }
        }
    }

    pub async fn rollback(self) -> Result<()> {
        let result = self.inner.rollback().await;
        self.completions.rollback_all().await;
        Ok(result?)
    }
}

impl AmbientTransaction for PgTransaction {
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

/// Document store on a PostgreSQL pool.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `database_url` from the config.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| Error::Config("DATABASE_URL is not set".to_string()))?;
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
        info!(subsystem = "store", component = "pg", op = "connect", "Document store connected");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the document table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS attic_document (
                   reference TEXT PRIMARY KEY,
                   document JSONB NOT NULL,
                   updated_at TIMESTAMPTZ NOT NULL
               )"#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn begin(&self) -> Result<PgTransaction> {
        Ok(PgTransaction::new(self.pool.begin().await?))
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    type Tx = PgTransaction;

    async fn save_document(&self, tx: &mut PgTransaction, document: &Document) -> Result<()> {
        let value = serde_json::to_value(document)?;
        sqlx::query(
            r#"INSERT INTO attic_document (reference, document, updated_at)
               VALUES ($1, $2, $3)
               ON CONFLICT (reference) DO UPDATE
               SET document = EXCLUDED.document, updated_at = EXCLUDED.updated_at"#,
        )
        .bind(document.reference.to_string())
        .bind(&value)
        .bind(document.updated_at)
        .execute(&mut *tx.inner)
        .await?;

        debug!(
            subsystem = "store",
            component = "pg",
            document = %document.reference,
            "Document saved in transaction"
        );
        Ok(())
    }

    async fn load_document(&self, reference: &DocumentReference) -> Result<Option<Document>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT document FROM attic_document WHERE reference = $1")
                .bind(reference.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(value,)| {
            serde_json::from_value(value)
                .map_err(|e| Error::Corrupt(format!("document {reference}: {e}")))
        })
        .transpose()
    }
}
