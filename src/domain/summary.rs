//! Run summary: what was attempted, what succeeded, what failed.
//!
//! Built incrementally by the result aggregator, frozen at finalize.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::product::NormalizedRecord;

/// Overall outcome of one extraction run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every category finished and no page failed
    Completed,
    /// The dataset is usable but some pages or categories failed
    Partial,
    /// The run stopped early; the dataset must not be treated as complete
    Aborted { reason: String },
}

/// Final state of one category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    /// Not resolved yet
    Pending,
    /// Pagination ran out naturally
    Completed,
    /// The safety page cap stopped pagination
    CapReached,
    /// Some pages failed after retries
    Incomplete,
    /// Structure changed, or no page could be fetched at all
    Failed,
    /// The run was cancelled before the category finished
    Cancelled,
}

impl CategoryStatus {
    /// Whether the category counts as completed in the summary
    #[must_use]
    pub const fn is_completed(self) -> bool {
        matches!(self, Self::Completed | Self::CapReached)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub name: String,
    pub rank: usize,
    pub status: CategoryStatus,
    pub pages_fetched: u32,
    pub pages_failed: u32,
    pub retries: u32,
    pub records_observed: u64,
    pub highest_page: u32,
    pub total_pages: Option<u32>,
    pub cap_reached: bool,
}

impl CategorySummary {
    #[must_use]
    pub fn new(name: impl Into<String>, rank: usize) -> Self {
        Self {
            name: name.into(),
            rank,
            status: CategoryStatus::Pending,
            pages_fetched: 0,
            pages_failed: 0,
            retries: 0,
            records_observed: 0,
            highest_page: 0,
            total_pages: None,
            cap_reached: false,
        }
    }
}

/// Fraction of final records with each optional field populated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldCompleteness {
    pub price: f64,
    pub thc_percent: f64,
    pub cbd_percent: f64,
    pub promo_or_deal_type: f64,
    pub brand: f64,
    pub strain_type: f64,
    pub size_weight: f64,
}

impl FieldCompleteness {
    /// Ratios over the final dataset; all zero for an empty dataset
    #[must_use]
    pub fn from_records(records: &[NormalizedRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        #[allow(clippy::cast_precision_loss)]
        let total = records.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        let ratio = |predicate: fn(&NormalizedRecord) -> bool| {
            records.iter().filter(|record| predicate(record)).count() as f64 / total
        };
        Self {
            price: ratio(|r| r.price.is_some()),
            thc_percent: ratio(|r| r.thc_percent.is_some()),
            cbd_percent: ratio(|r| r.cbd_percent.is_some()),
            promo_or_deal_type: ratio(|r| r.promo_or_deal_type.is_some()),
            brand: ratio(|r| !r.brand.is_empty()),
            strain_type: ratio(|r| !r.strain_type.is_empty()),
            size_weight: ratio(|r| !r.size_weight.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub categories_attempted: u32,
    pub categories_completed: u32,
    pub categories_failed: u32,
    pub categories: Vec<CategorySummary>,
    pub pages_fetched: u32,
    pub pages_failed: u32,
    pub pages_retried: u32,
    pub retries: u32,
    pub pages_cancelled: u32,
    pub session_reacquisitions: u32,
    pub requeues: u32,
    pub detail_pages_fetched: u32,
    pub detail_pages_failed: u32,
    pub records_extracted: u64,
    pub unique_products: u64,
    pub duplicates_merged: u64,
    /// Records excluded from the report by the configured filters
    pub records_filtered_out: u64,
    pub field_completeness: FieldCompleteness,
}

impl RunSummary {
    #[must_use]
    pub fn new(categories: Vec<CategorySummary>) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let categories_attempted = categories.len() as u32;
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Partial,
            categories_attempted,
            categories_completed: 0,
            categories_failed: 0,
            categories,
            pages_fetched: 0,
            pages_failed: 0,
            pages_retried: 0,
            retries: 0,
            pages_cancelled: 0,
            session_reacquisitions: 0,
            requeues: 0,
            detail_pages_fetched: 0,
            detail_pages_failed: 0,
            records_extracted: 0,
            unique_products: 0,
            duplicates_merged: 0,
            records_filtered_out: 0,
            field_completeness: FieldCompleteness::default(),
        }
    }

    #[must_use]
    pub fn category(&self, name: &str) -> Option<&CategorySummary> {
        self.categories.iter().find(|category| category.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_dataset_has_zero_ratios() {
        assert_eq!(FieldCompleteness::from_records(&[]), FieldCompleteness::default());
    }

    #[test]
    fn cap_reached_counts_as_completed() {
        assert!(CategoryStatus::CapReached.is_completed());
        assert!(!CategoryStatus::Incomplete.is_completed());
        assert!(!CategoryStatus::Pending.is_completed());
    }

    #[test]
    fn new_summary_counts_attempted_categories() {
        let summary = RunSummary::new(vec![
            CategorySummary::new("flower", 0),
            CategorySummary::new("edibles", 1),
        ]);
        assert_eq!(summary.categories_attempted, 2);
        assert!(summary.category("edibles").is_some());
        assert!(summary.finished_at.is_none());
    }
}
