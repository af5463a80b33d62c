//! Unit-of-work pipeline with compensating rollback.
//!
//! A [`Pipeline`] is an ordered list of [`TransactionStep`]s. Running it runs
//! every step in registration order. If a step fails, every step that was
//! attempted (including the failing one) is rolled back in reverse order and
//! the original error is returned.
//!
//! After all steps succeed, [`Pipeline::start`] hands the pipeline to the
//! ambient transaction. Its steps are committed in reverse order once that
//! transaction commits, and rolled back if it rolls back instead.
//!
//! Pipelines are steps themselves, so they nest.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, trace, warn};

use attic_core::{AmbientTransaction, Result, TransactionCompletion};

/// One forward action with its compensation.
#[async_trait]
pub trait TransactionStep<Tx: AmbientTransaction>: Send {
    /// Short label for logs.
    fn describe(&self) -> String;

    /// Forward action.
    async fn run(&mut self, tx: &mut Tx) -> Result<()>;

    /// Finalize after every step in the pipeline succeeded.
    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Undo whatever `run` did. Must tolerate being called when `run` failed
    /// partway, never ran, or was already rolled back.
    async fn rollback(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Ordered composition of steps executed as one unit.
pub struct Pipeline<Tx: AmbientTransaction> {
    label: String,
    steps: Vec<Box<dyn TransactionStep<Tx>>>,
    /// Steps whose `run` was entered, in registration order.
    attempted: usize,
}

impl<Tx: AmbientTransaction> Pipeline<Tx> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
            attempted: 0,
        }
    }

    /// Append a step to run after every step registered so far.
    pub fn push<S>(&mut self, step: S) -> &mut Self
    where
        S: TransactionStep<Tx> + 'static,
    {
        self.steps.push(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run the pipeline inside `tx`.
    ///
    /// On success the pipeline is deferred to `tx`, which commits or rolls
    /// back its steps when it finishes. On failure the attempted steps have
    /// been rolled back, `tx` is marked rollback-only, and the step's error is
    /// returned.
    pub async fn start(mut self, tx: &mut Tx) -> Result<()> {
        let started = Instant::now();

        if let Err(e) = self.run(tx).await {
            tx.set_rollback_only(&format!("{} failed: {e}", self.label));
            warn!(
                subsystem = "store",
                component = "pipeline",
                op = %self.label,
                error = %e,
                duration_ms = started.elapsed().as_millis() as u64,
                "Pipeline rolled back"
            );
            return Err(e);
        }

        debug!(
            subsystem = "store",
            component = "pipeline",
            op = %self.label,
            steps = self.steps.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Pipeline ran, awaiting transaction outcome"
        );
        tx.defer(Box::new(self));
        Ok(())
    }
}

#[async_trait]
impl<Tx: AmbientTransaction> TransactionCompletion for Pipeline<Tx> {
    fn describe(&self) -> String {
        TransactionStep::<Tx>::describe(self)
    }

    async fn on_commit(self: Box<Self>) {
        let mut pipeline = *self;
        // Commit failures leave only leftover backups or holding files behind.
        let _ = TransactionStep::<Tx>::commit(&mut pipeline).await;
    }

    async fn on_rollback(self: Box<Self>) {
        let mut pipeline = *self;
        let _ = TransactionStep::<Tx>::rollback(&mut pipeline).await;
        warn!(
            subsystem = "store",
            component = "pipeline",
            op = %pipeline.label,
            "Pipeline rolled back with its transaction"
        );
    }
}

#[async_trait]
impl<Tx: AmbientTransaction> TransactionStep<Tx> for Pipeline<Tx> {
    fn describe(&self) -> String {
        format!("pipeline {}", self.label)
    }

    async fn run(&mut self, tx: &mut Tx) -> Result<()> {
        for i in 0..self.steps.len() {
            self.attempted = i + 1;
            let step = &mut self.steps[i];
            trace!(
                subsystem = "store",
                component = "pipeline",
                op = %self.label,
                step = %step.describe(),
                "Running step"
            );
            if let Err(e) = step.run(tx).await {
                warn!(
                    subsystem = "store",
                    component = "pipeline",
                    op = %self.label,
                    step = %step.describe(),
                    error = %e,
                    "Step failed, rolling back"
                );
                let _ = self.rollback().await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        for step in self.steps.iter_mut().rev() {
            if let Err(e) = step.commit().await {
                warn!(
                    subsystem = "store",
                    component = "pipeline",
                    op = %self.label,
                    step = %step.describe(),
                    error = %e,
                    "Step commit failed"
                );
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let attempted = std::mem::take(&mut self.attempted);
        for step in self.steps[..attempted].iter_mut().rev() {
            if let Err(e) = step.rollback().await {
                error!(
                    subsystem = "store",
                    component = "pipeline",
                    op = %self.label,
                    step = %step.describe(),
                    error = %e,
                    "Rollback failed, storage may be inconsistent"
                );
            }
        }
        Ok(())
    }
}
