//! Batch Orchestrator
//!
//! Runs the full pipeline once per item. An item's failure is recorded as
//! that item's outcome and never reaches its siblings. Outcomes are stored by
//! input position, whatever order the items finished in.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::ExecutionMode;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::pipeline::SynthesisPipeline;
use crate::resolver::InputSet;
use crate::synthesizer::GeneratedDocument;
use crate::templates::Template;

/// One unit of work: a template and the inputs to fill it with.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub template: Arc<Template>,
    pub inputs: InputSet,
}

impl BatchItem {
    pub fn new(template: Arc<Template>, inputs: InputSet) -> Self {
        Self { template, inputs }
    }
}

/// Submission surface form of an item, by template identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub template_id: String,
    #[serde(default)]
    pub inputs: InputSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    CompletedAllSuccess,
    CompletedPartial,
    CompletedAllFailed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    fn can_become(&self, next: BatchStatus) -> bool {
        match self {
            Self::Pending => next == Self::Running,
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

/// Failure record: stable kind and its user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&EngineError> for Failure {
    fn from(err: &EngineError) -> Self {
        Self { kind: err.kind(), message: err.user_message().to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemResult {
    Succeeded { document: Box<GeneratedDocument> },
    Failed { failure: Failure },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    pub index: usize,
    pub template_id: String,
    pub result: ItemResult,
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.result, ItemResult::Succeeded { .. })
    }

    pub fn document(&self) -> Option<&GeneratedDocument> {
        match &self.result {
            ItemResult::Succeeded { document } => Some(document),
            ItemResult::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.result {
            ItemResult::Failed { failure } => Some(failure),
            ItemResult::Succeeded { .. } => None,
        }
    }
}

/// Holds references to generated documents only, never file bytes beyond
/// what each document's artifact reference carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub batch_id: String,
    pub status: BatchStatus,
    pub outcomes: Vec<ItemOutcome>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.outcomes.iter().filter(|o| !o.is_success()).map(|o| o.index).collect()
    }
}

/// all-success iff every item succeeded, all-failed iff none did. An empty
/// batch counts as all-success.
pub fn aggregate_status(outcomes: &[ItemOutcome]) -> BatchStatus {
    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    if succeeded == outcomes.len() {
        BatchStatus::CompletedAllSuccess
    } else if succeeded == 0 {
        BatchStatus::CompletedAllFailed
    } else {
        BatchStatus::CompletedPartial
    }
}

/// Lifecycle of one batch run: pending → running → completed_*.
#[derive(Debug)]
pub struct Batch {
    id: String,
    status: BatchStatus,
}

impl Batch {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4().to_string(), status: BatchStatus::Pending }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn transition(&mut self, next: BatchStatus) -> EngineResult<()> {
        if !self.status.can_become(next) {
            return Err(EngineError::Internal(format!(
                "illegal batch transition {:?} -> {:?}",
                self.status, next
            )));
        }
        debug!(batch_id = %self.id, from = ?self.status, to = ?next, "batch transition");
        self.status = next;
        Ok(())
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

/// An item ready to run, or one already rejected before the pipeline.
enum Entry {
    Ready(BatchItem),
    Rejected { template_id: String, failure: Failure },
}

impl Entry {
    fn template_id(&self) -> String {
        match self {
            Self::Ready(item) => item.template.id.clone(),
            Self::Rejected { template_id, .. } => template_id.clone(),
        }
    }
}

pub struct BatchOrchestrator {
    pipeline: Arc<SynthesisPipeline>,
    mode: ExecutionMode,
    concurrency: usize,
}

impl BatchOrchestrator {
    /// Driver and concurrency limit come from the pipeline's configuration.
    pub fn new(pipeline: Arc<SynthesisPipeline>) -> Self {
        let execution = &pipeline.config().execution;
        let (mode, concurrency) = (execution.mode, execution.concurrency.max(1));
        Self { pipeline, mode, concurrency }
    }

    pub fn sequential(mut self) -> Self {
        self.mode = ExecutionMode::Sequential;
        self
    }

    pub fn pooled(mut self, concurrency: usize) -> Self {
        self.mode = ExecutionMode::Pool;
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn run_batch(&self, items: Vec<BatchItem>) -> BatchResult {
        self.run_entries(items.into_iter().map(Entry::Ready).collect()).await
    }

    /// Resolves template ids first; an unknown id fails only its own item.
    pub async fn submit(&self, requests: Vec<BatchRequest>) -> BatchResult {
        let entries = requests
            .into_iter()
            .map(|req| match self.pipeline.load_template(&req.template_id) {
                Ok(template) => Entry::Ready(BatchItem::new(Arc::new(template), req.inputs)),
                Err(e) => Entry::Rejected { failure: Failure::from(&e), template_id: req.template_id },
            })
            .collect();
        self.run_entries(entries).await
    }

    /// Re-runs only the failed items of `prior`. `items` must be the batch's
    /// original items, in order; successful outcomes are carried over.
    pub async fn retry_failed(&self, prior: &BatchResult, items: &[BatchItem]) -> EngineResult<BatchResult> {
        if items.len() != prior.outcomes.len() {
            return Err(EngineError::Config(format!(
                "retry needs the original {} items, got {}",
                prior.outcomes.len(),
                items.len()
            )));
        }
        let indices = prior.failed_indices();
        let retried = self.run_batch(indices.iter().map(|&i| items[i].clone()).collect()).await;
        let retried_count = retried.outcomes.len();

        let mut outcomes = prior.outcomes.clone();
        for (original, mut outcome) in indices.into_iter().zip(retried.outcomes) {
            outcome.index = original;
            outcomes[original] = outcome;
        }
        let status = aggregate_status(&outcomes);
        info!(
            batch_id = %retried.batch_id,
            prior_batch_id = %prior.batch_id,
            retried = retried_count,
            status = ?status,
            "retry completed"
        );
        Ok(BatchResult {
            batch_id: retried.batch_id,
            status,
            outcomes,
            started_at: retried.started_at,
            completed_at: retried.completed_at,
        })
    }

    async fn run_entries(&self, entries: Vec<Entry>) -> BatchResult {
        let mut batch = Batch::new();
        let span = info_span!("batch", batch_id = %batch.id(), items = entries.len());

        async move {
            let started_at = Utc::now();
            advance(&mut batch, BatchStatus::Running);

            let outcomes = match self.mode {
                ExecutionMode::Sequential => self.drive_sequential(entries).await,
                ExecutionMode::Pool => self.drive_pool(entries).await,
            };

            let status = aggregate_status(&outcomes);
            advance(&mut batch, status);
            let result = BatchResult {
                batch_id: batch.id().to_string(),
                status,
                outcomes,
                started_at,
                completed_at: Utc::now(),
            };
            info!(
                succeeded = result.succeeded(),
                failed = result.failed(),
                status = ?result.status,
                "batch completed"
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn drive_sequential(&self, entries: Vec<Entry>) -> Vec<ItemOutcome> {
        let mut outcomes = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            outcomes.push(run_entry(self.pipeline.clone(), index, entry).await);
        }
        outcomes
    }

    async fn drive_pool(&self, entries: Vec<Entry>) -> Vec<ItemOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let template_ids: Vec<String> = entries.iter().map(Entry::template_id).collect();
        let mut slots: Vec<Option<ItemOutcome>> = vec![None; entries.len()];
        let mut tasks = JoinSet::new();

        for (index, entry) in entries.into_iter().enumerate() {
            let pipeline = self.pipeline.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    run_entry(pipeline, index, entry).await
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    let index = outcome.index;
                    slots[index] = Some(outcome);
                }
                Err(e) => error!(error = %e, "batch worker did not complete"),
            }
        }

        slots
            .into_iter()
            .zip(template_ids)
            .enumerate()
            .map(|(index, (slot, template_id))| {
                slot.unwrap_or_else(|| ItemOutcome {
                    index,
                    template_id,
                    result: ItemResult::Failed {
                        failure: Failure::from(&EngineError::Internal("worker lost".into())),
                    },
                })
            })
            .collect()
    }
}

fn advance(batch: &mut Batch, next: BatchStatus) {
    if let Err(e) = batch.transition(next) {
        error!(batch_id = %batch.id(), error = %e, contract_violation = true, "batch state machine rejected transition");
    }
}

async fn run_entry(pipeline: Arc<SynthesisPipeline>, index: usize, entry: Entry) -> ItemOutcome {
    let template_id = entry.template_id();
    let span = info_span!("batch_item", index, template_id = %template_id);

    let result = async move {
        let item = match entry {
            Entry::Ready(item) => item,
            Entry::Rejected { failure, .. } => {
                warn!(kind = ?failure.kind, "item rejected before synthesis");
                return ItemResult::Failed { failure };
            }
        };

        let attempt = AssertUnwindSafe(pipeline.generate(&item.template, &item.inputs))
            .catch_unwind()
            .await;
        match attempt {
            Ok(Ok(document)) => ItemResult::Succeeded { document: Box::new(document) },
            Ok(Err(e)) => {
                if e.is_defect() {
                    error!(error = %e, contract_violation = true, "item failed");
                } else {
                    warn!(error = %e, kind = ?e.kind(), "item failed");
                }
                ItemResult::Failed { failure: Failure::from(&e) }
            }
            Err(_) => {
                error!("item panicked");
                ItemResult::Failed {
                    failure: Failure::from(&EngineError::Internal("item panicked".into())),
                }
            }
        }
    }
    .instrument(span)
    .await;

    ItemOutcome { index, template_id, result }
}
