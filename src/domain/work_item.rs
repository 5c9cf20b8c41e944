//! # Work Item Definitions
//!
//! A work item is one schedulable unit of fetch work. Each item is owned by
//! exactly one in-flight fetch at a time; it travels by value through the
//! queue, the worker and (on requeue) back to the scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::value_objects::{CategoryRef, TaskId};

/// What kind of page a work item targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkKind {
    /// Listing page `page` (1-based) of the item's category
    ListingPage { page: u32 },
    /// Product detail page; the target URL is the detail URL
    ProductDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub task_id: TaskId,
    pub kind: WorkKind,
    /// Absolute URL to navigate to
    pub target: String,
    pub category: CategoryRef,
    /// Fetch attempts made so far (set by the retry controller)
    pub attempt: u32,
    /// Times the item went back to the queue after a session re-acquisition
    pub requeues: u32,
}

impl WorkItem {
    #[must_use]
    pub fn listing(category: CategoryRef, page: u32, target: impl Into<String>) -> Self {
        Self {
            task_id: TaskId::new(),
            kind: WorkKind::ListingPage { page },
            target: target.into(),
            category,
            attempt: 0,
            requeues: 0,
        }
    }

    #[must_use]
    pub fn detail(category: CategoryRef, target: impl Into<String>) -> Self {
        Self {
            task_id: TaskId::new(),
            kind: WorkKind::ProductDetail,
            target: target.into(),
            category,
            attempt: 0,
            requeues: 0,
        }
    }

    /// Listing page number, `None` for detail items
    #[must_use]
    pub const fn page(&self) -> Option<u32> {
        match self.kind {
            WorkKind::ListingPage { page } => Some(page),
            WorkKind::ProductDetail => None,
        }
    }

    #[must_use]
    pub const fn is_listing(&self) -> bool {
        matches!(self.kind, WorkKind::ListingPage { .. })
    }

    /// Short label for telemetry
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self.kind {
            WorkKind::ListingPage { .. } => "listing_page",
            WorkKind::ProductDetail => "product_detail",
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            WorkKind::ListingPage { page } => write!(f, "{} page {}", self.category.name, page),
            WorkKind::ProductDetail => write!(f, "{} detail {}", self.category.name, self.target),
        }
    }
}
