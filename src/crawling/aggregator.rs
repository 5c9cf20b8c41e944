//! # Result Aggregator
//!
//! 실행 전체의 결과 누적기. Holds the identity-keyed dataset and the run
//! summary behind one async mutex; every mutation goes through it. The
//! aggregator is created per run and passed explicitly, so runs never share
//! state.
//!
//! Lifecycle: created at run start, mutated by workers, frozen by
//! [`ResultAggregator::finalize`]. `finalize` refuses to run while scheduled
//! work items are unresolved.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::dedup::merge;
use super::errors::{AccumulateError, FinalizeError};
use super::scheduler::CategoryProgress;
use crate::domain::category::Category;
use crate::domain::product::NormalizedRecord;
use crate::domain::summary::{CategoryStatus, CategorySummary, FieldCompleteness, RunStatus, RunSummary};
use crate::domain::value_objects::{IdentityKey, TaskId};
use crate::domain::work_item::WorkItem;

/// How a scheduled work item ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Fetched, after `retries` extra attempts
    Fetched { retries: u32 },
    /// Failed after `retries` extra attempts
    Failed { retries: u32 },
    /// Dropped unfetched because the run was cancelled
    Discarded,
}

/// Finalized output of a run
pub type FinalizedRun = (Vec<NormalizedRecord>, RunSummary);

struct AggregatorState {
    records: HashMap<IdentityKey, NormalizedRecord>,
    summary: RunSummary,
    pending: HashSet<TaskId>,
    finalized: Option<FinalizedRun>,
}

impl AggregatorState {
    fn category_mut(&mut self, rank: usize) -> Option<&mut CategorySummary> {
        self.summary.categories.iter_mut().find(|category| category.rank == rank)
    }
}

pub struct ResultAggregator {
    state: Mutex<AggregatorState>,
}

impl ResultAggregator {
    /// New accumulator for a run over `categories`, in configured order
    #[must_use]
    pub fn new(categories: &[Category]) -> Self {
        let summaries = categories
            .iter()
            .map(|category| CategorySummary::new(category.name(), category.rank()))
            .collect();
        Self {
            state: Mutex::new(AggregatorState {
                records: HashMap::new(),
                summary: RunSummary::new(summaries),
                pending: HashSet::new(),
                finalized: None,
            }),
        }
    }

    /// Merges normalized observations into the dataset.
    pub async fn accumulate(&self, records: Vec<NormalizedRecord>) -> Result<(), AccumulateError> {
        let mut state = self.state.lock().await;
        if state.finalized.is_some() {
            return Err(AccumulateError::AlreadyFinalized);
        }

        for record in records {
            state.summary.records_extracted += 1;
            if let Some(category) = state.category_mut(record.origin.category.rank) {
                category.records_observed += 1;
            }

            let key = record.identity_key.clone();
            let existing = state.records.remove(&key);
            if existing.is_some() {
                state.summary.duplicates_merged += 1;
            }
            state.records.insert(key, merge(existing, record));
        }
        Ok(())
    }

    /// Registers an emitted work item; it must be resolved before finalize.
    pub async fn record_scheduled(&self, item: &WorkItem) {
        let mut state = self.state.lock().await;
        if state.finalized.is_none() {
            state.pending.insert(item.task_id);
        }
    }

    pub async fn record_resolved(&self, item: &WorkItem, resolution: Resolution) {
        let mut state = self.state.lock().await;
        if state.finalized.is_some() {
            debug!("Ignoring resolution of {} after finalize", item);
            return;
        }
        state.pending.remove(&item.task_id);

        let summary = &mut state.summary;
        match (item.page(), resolution) {
            (_, Resolution::Fetched { retries } | Resolution::Failed { retries }) if retries > 0 => {
                summary.retries += retries;
                if item.is_listing() {
                    summary.pages_retried += 1;
                }
            }
            _ => {}
        }
        match (item.page(), resolution) {
            (Some(_), Resolution::Fetched { .. }) => summary.pages_fetched += 1,
            (Some(_), Resolution::Failed { .. }) => summary.pages_failed += 1,
            (Some(_), Resolution::Discarded) => summary.pages_cancelled += 1,
            (None, Resolution::Fetched { .. }) => summary.detail_pages_fetched += 1,
            (None, Resolution::Failed { .. }) => summary.detail_pages_failed += 1,
            (None, Resolution::Discarded) => {}
        }

        let Some(page) = item.page() else { return };
        if let Some(category) = state.category_mut(item.category.rank) {
            match resolution {
                Resolution::Fetched { retries } => {
                    category.pages_fetched += 1;
                    category.retries += retries;
                    category.highest_page = category.highest_page.max(page);
                }
                Resolution::Failed { retries } => {
                    category.pages_failed += 1;
                    category.retries += retries;
                }
                Resolution::Discarded => {}
            }
        }
    }

    /// Counts an item handed back to the scheduler after a gate reappearance
    pub async fn record_requeue(&self) {
        let mut state = self.state.lock().await;
        if state.finalized.is_none() {
            state.summary.requeues += 1;
        }
    }

    /// Copies the scheduler's final pagination facts into the summary
    pub async fn apply_progress(&self, progress: &[CategoryProgress]) {
        let mut state = self.state.lock().await;
        if state.finalized.is_some() {
            return;
        }
        for entry in progress {
            if let Some(category) = state.category_mut(entry.category.rank) {
                category.status = entry.status;
                category.total_pages = entry.total_pages;
                category.cap_reached = entry.cap_reached;
                category.highest_page = category.highest_page.max(entry.highest_page);
            }
        }
    }

    pub async fn set_category_status(&self, rank: usize, status: CategoryStatus) {
        let mut state = self.state.lock().await;
        if state.finalized.is_none() {
            if let Some(category) = state.category_mut(rank) {
                category.status = status;
            }
        }
    }

    pub async fn set_session_reacquisitions(&self, count: u32) {
        let mut state = self.state.lock().await;
        if state.finalized.is_none() {
            state.summary.session_reacquisitions = count;
        }
    }

    /// Marks the run aborted; the dataset must not be treated as complete.
    pub async fn mark_aborted(&self, reason: impl Into<String>) {
        let mut state = self.state.lock().await;
        if state.finalized.is_none() {
            state.summary.status = RunStatus::Aborted { reason: reason.into() };
        }
    }

    /// Unresolved scheduled work items
    pub async fn pending(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Freezes the run and returns the dataset (ascending identity key) and
    /// summary. Later calls return the same result.
    pub async fn finalize(&self) -> Result<FinalizedRun, FinalizeError> {
        let mut state = self.state.lock().await;
        if let Some(finalized) = &state.finalized {
            return Ok(finalized.clone());
        }
        if !state.pending.is_empty() {
            let pending = state.pending.len();
            error!("❌ finalize called with {} unresolved work items", pending);
            return Err(FinalizeError::IncompleteRun { pending });
        }

        let mut dataset: Vec<NormalizedRecord> = state.records.values().cloned().collect();
        dataset.sort_by(|a, b| a.identity_key.cmp(&b.identity_key));

        let summary = &mut state.summary;
        summary.unique_products = dataset.len() as u64;
        summary.field_completeness = FieldCompleteness::from_records(&dataset);
        summary.categories_completed = count_categories(&summary.categories, CategoryStatus::is_completed);
        summary.categories_failed = count_categories(&summary.categories, |status| status == CategoryStatus::Failed);
        if !matches!(summary.status, RunStatus::Aborted { .. }) {
            let clean = summary.pages_failed == 0
                && summary.pages_cancelled == 0
                && summary.categories.iter().all(|c| c.status.is_completed());
            summary.status = if clean { RunStatus::Completed } else { RunStatus::Partial };
        }
        summary.finished_at = Some(Utc::now());

        info!(
            "📊 Run finalized: {} unique products from {} observations ({} merged), {}/{} categories completed",
            summary.unique_products,
            summary.records_extracted,
            summary.duplicates_merged,
            summary.categories_completed,
            summary.categories_attempted
        );

        let finalized = (dataset, summary.clone());
        state.finalized = Some(finalized.clone());
        Ok(finalized)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn count_categories(categories: &[CategorySummary], predicate: impl Fn(CategoryStatus) -> bool) -> u32 {
    categories.iter().filter(|category| predicate(category.status)).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawling::normalizer::normalize;
    use crate::domain::product::{ObservationOrigin, RawRecord};
    use crate::domain::value_objects::CategoryRef;

    fn categories() -> Vec<Category> {
        Category::from_names(&["Flower".to_string(), "Pre-Rolls".to_string()])
    }

    fn record(rank: usize, category: &str, slug: &str, price: &str) -> NormalizedRecord {
        let mut raw = RawRecord::empty(ObservationOrigin {
            category: CategoryRef::new(rank, category),
            page: Some(1),
        });
        raw.product_name = slug.to_string();
        raw.detail_url = format!("https://menu.test/product/{slug}");
        raw.price = price.to_string();
        normalize(raw)
    }

    fn page(rank: usize, name: &str, page: u32) -> WorkItem {
        WorkItem::listing(CategoryRef::new(rank, name), page, format!("https://menu.test/{name}?page={page}"))
    }

    #[tokio::test]
    async fn merges_duplicates_across_categories() {
        let aggregator = ResultAggregator::new(&categories());
        aggregator
            .accumulate(vec![record(0, "Flower", "runtz", ""), record(0, "Flower", "gelato", "$20")])
            .await
            .unwrap();
        aggregator.accumulate(vec![record(1, "Pre-Rolls", "runtz", "$15.00")]).await.unwrap();

        let (dataset, summary) = aggregator.finalize().await.unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset[0].identity_key.as_str(), "gelato");
        assert_eq!(dataset[1].price, Some(15.0));
        assert_eq!(dataset[1].category, "Flower");
        assert_eq!(summary.records_extracted, 3);
        assert_eq!(summary.unique_products, 2);
        assert_eq!(summary.duplicates_merged, 1);
        assert_eq!(summary.category("Pre-Rolls").unwrap().records_observed, 1);
    }

    #[tokio::test]
    async fn finalize_before_resolution_fails_loudly() {
        let aggregator = ResultAggregator::new(&categories());
        let item = page(0, "Flower", 1);
        aggregator.record_scheduled(&item).await;

        assert_eq!(aggregator.finalize().await, Err(FinalizeError::IncompleteRun { pending: 1 }));

        aggregator.record_resolved(&item, Resolution::Fetched { retries: 0 }).await;
        assert!(aggregator.finalize().await.is_ok());
    }

    #[tokio::test]
    async fn finalize_is_idempotent_and_freezes() {
        let aggregator = ResultAggregator::new(&categories());
        aggregator.accumulate(vec![record(0, "Flower", "runtz", "$15")]).await.unwrap();

        let first = aggregator.finalize().await.unwrap();
        let second = aggregator.finalize().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            aggregator.accumulate(vec![record(1, "Pre-Rolls", "x", "")]).await,
            Err(AccumulateError::AlreadyFinalized)
        );
    }

    #[tokio::test]
    async fn counts_retries_and_failures_per_category() {
        let aggregator = ResultAggregator::new(&categories());
        let retried = page(0, "Flower", 1);
        let failed = page(1, "Pre-Rolls", 1);
        for item in [&retried, &failed] {
            aggregator.record_scheduled(item).await;
        }
        aggregator.record_resolved(&retried, Resolution::Fetched { retries: 2 }).await;
        aggregator.record_resolved(&failed, Resolution::Failed { retries: 2 }).await;

        let (_, summary) = aggregator.finalize().await.unwrap();

        assert_eq!(summary.retries, 4);
        assert_eq!(summary.pages_retried, 2);
        assert_eq!(summary.pages_fetched, 1);
        assert_eq!(summary.pages_failed, 1);
        let flower = summary.category("Flower").unwrap();
        assert_eq!((flower.pages_fetched, flower.retries, flower.highest_page), (1, 2, 1));
        assert_eq!(summary.status, RunStatus::Partial);
    }

    #[tokio::test]
    async fn completed_run_requires_every_category_completed() {
        let aggregator = ResultAggregator::new(&categories());
        aggregator.set_category_status(0, CategoryStatus::Completed).await;
        aggregator.set_category_status(1, CategoryStatus::CapReached).await;

        let (dataset, summary) = aggregator.finalize().await.unwrap();

        assert!(dataset.is_empty());
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.categories_completed, 2);
        assert_eq!(summary.field_completeness, FieldCompleteness::default());
    }

    #[tokio::test]
    async fn aborted_status_survives_finalize() {
        let aggregator = ResultAggregator::new(&categories());
        aggregator.mark_aborted("age gate blocked").await;
        let (_, summary) = aggregator.finalize().await.unwrap();
        assert_eq!(
            summary.status,
            RunStatus::Aborted {
                reason: "age gate blocked".to_string()
            }
        );
    }

    #[tokio::test]
    async fn concurrent_accumulation_loses_nothing() {
        let aggregator = std::sync::Arc::new(ResultAggregator::new(&categories()));
        let mut tasks = tokio::task::JoinSet::new();
        for worker in 0..8 {
            let aggregator = std::sync::Arc::clone(&aggregator);
            tasks.spawn(async move {
                let records = (0..25).map(|n| record(worker % 2, "Flower", &format!("p{}", n % 10), "$10")).collect();
                aggregator.accumulate(records).await
            });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }
        let (dataset, summary) = aggregator.finalize().await.unwrap();
        assert_eq!(summary.records_extracted, 200);
        assert_eq!(dataset.len(), 10);
        assert_eq!(summary.duplicates_merged, 190);
    }
}
