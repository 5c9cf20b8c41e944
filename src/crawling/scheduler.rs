//! # Category Scheduler
//!
//! Turns the configured categories into a lazy, finite stream of work
//! items. Each category paginates on its own: page 1 first, then whatever
//! the page's pagination signal allows, up to the safety cap. The stream
//! only grows when outcomes are reported back, so emission order is fixed
//! by configuration and by completion order of earlier pages.

use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};

use super::errors::FetchErrorKind;
use super::page::PaginationSignal;
use crate::domain::category::Category;
use crate::domain::summary::CategoryStatus;
use crate::domain::value_objects::{CategoryRef, IdentityKey};
use crate::domain::work_item::WorkItem;

/// Detail page worth fetching for a product seen on a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailCandidate {
    pub key: IdentityKey,
    pub url: String,
}

/// What became of one emitted work item
#[derive(Debug, Clone)]
pub enum PageOutcome {
    /// Listing page fetched
    Listed {
        page: u32,
        signal: PaginationSignal,
        tiles: usize,
        detail_candidates: Vec<DetailCandidate>,
    },
    /// Listing page failed after retries
    Failed { page: u32, kind: FetchErrorKind },
    /// Detail page finished, successfully or not
    DetailResolved,
    /// Dropped without fetching because the run was cancelled
    Discarded { page: Option<u32> },
}

/// Final pagination facts for one category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryProgress {
    pub category: CategoryRef,
    pub status: CategoryStatus,
    pub total_pages: Option<u32>,
    pub highest_page: u32,
    pub cap_reached: bool,
}

/// Builds listing URLs and schedules
#[derive(Debug, Clone)]
pub struct CategoryScheduler {
    entry_url: String,
    max_pages: u32,
    fetch_details: bool,
}

impl CategoryScheduler {
    /// `entry_url` is `{base_url}/{dispensary_slug}`
    #[must_use]
    pub fn new(entry_url: impl Into<String>, max_pages: u32, fetch_details: bool) -> Self {
        Self {
            entry_url: entry_url.into(),
            max_pages: max_pages.max(1),
            fetch_details,
        }
    }

    #[must_use]
    pub fn page_url(&self, category: &Category, page: u32) -> String {
        format!("{}/products/{}?page={page}", self.entry_url.trim_end_matches('/'), category.slug())
    }

    /// Starts a schedule: page 1 of every category, in configured order.
    #[must_use]
    pub fn schedule(&self, categories: Vec<Category>) -> Schedule {
        let mut schedule = Schedule {
            scheduler: self.clone(),
            cursors: Vec::with_capacity(categories.len()),
            ready: VecDeque::new(),
            requeued: VecDeque::new(),
            seen_details: HashSet::new(),
            in_flight: 0,
            cancelled: false,
        };
        for category in categories {
            schedule.cursors.push(CategoryCursor::new(category));
        }
        for index in 0..schedule.cursors.len() {
            schedule.emit_page(index, 1);
        }
        schedule
    }
}

#[derive(Debug)]
struct CategoryCursor {
    category: Category,
    highest_emitted: u32,
    in_flight: usize,
    exhausted: bool,
    pages_fetched: u32,
    pages_failed: u32,
    pages_discarded: u32,
    highest_fetched: u32,
    cap_reached: bool,
    structure_changed: bool,
}

impl CategoryCursor {
    const fn new(category: Category) -> Self {
        Self {
            category,
            highest_emitted: 0,
            in_flight: 0,
            exhausted: false,
            pages_fetched: 0,
            pages_failed: 0,
            pages_discarded: 0,
            highest_fetched: 0,
            cap_reached: false,
            structure_changed: false,
        }
    }

    fn status(&self) -> CategoryStatus {
        if self.structure_changed || (self.pages_fetched == 0 && self.pages_failed > 0) {
            CategoryStatus::Failed
        } else if self.pages_discarded > 0 || !self.exhausted {
            CategoryStatus::Cancelled
        } else if self.pages_failed > 0 {
            CategoryStatus::Incomplete
        } else if self.cap_reached {
            CategoryStatus::CapReached
        } else {
            CategoryStatus::Completed
        }
    }
}

/// Live schedule for one run
#[derive(Debug)]
pub struct Schedule {
    scheduler: CategoryScheduler,
    cursors: Vec<CategoryCursor>,
    ready: VecDeque<WorkItem>,
    /// Items already emitted once, waiting to go out again
    requeued: VecDeque<WorkItem>,
    seen_details: HashSet<IdentityKey>,
    in_flight: usize,
    cancelled: bool,
}

impl Schedule {
    /// Next item to hand to a worker; requeued items go first
    pub fn next_item(&mut self) -> Option<WorkItem> {
        if self.cancelled {
            return None;
        }
        let item = self.requeued.pop_front().or_else(|| self.ready.pop_front())?;
        self.in_flight += 1;
        if item.is_listing() {
            if let Some(cursor) = self.cursors.get_mut(item.category.rank) {
                cursor.in_flight += 1;
            }
        }
        Some(item)
    }

    /// Applies the outcome of an emitted item and schedules what follows.
    pub fn on_outcome(&mut self, category: &CategoryRef, outcome: PageOutcome) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let index = category.rank;
        if !matches!(outcome, PageOutcome::DetailResolved | PageOutcome::Discarded { page: None }) {
            if let Some(cursor) = self.cursors.get_mut(index) {
                cursor.in_flight = cursor.in_flight.saturating_sub(1);
            }
        }

        match outcome {
            PageOutcome::Listed {
                page,
                signal,
                tiles,
                detail_candidates,
            } => {
                self.on_listed(index, page, signal, tiles);
                if self.scheduler.fetch_details && !self.cancelled {
                    for candidate in detail_candidates {
                        if self.seen_details.insert(candidate.key) {
                            self.ready.push_back(WorkItem::detail(category.clone(), candidate.url));
                        }
                    }
                }
            }
            PageOutcome::Failed { page, kind } => {
                let Some(cursor) = self.cursors.get_mut(index) else { return };
                cursor.pages_failed += 1;
                if kind == FetchErrorKind::StructureChanged {
                    warn!("🚨 {} page {}: page structure changed; stopping category", category.name, page);
                    cursor.structure_changed = true;
                    cursor.exhausted = true;
                } else if cursor.category.total_pages.is_none() {
                    // Without a known page count the next page is unknowable
                    warn!("⚠️ {} page {} failed; pagination stops here", category.name, page);
                    cursor.exhausted = true;
                }
            }
            PageOutcome::DetailResolved => {}
            PageOutcome::Discarded { page } => {
                if page.is_some() {
                    if let Some(cursor) = self.cursors.get_mut(index) {
                        cursor.pages_discarded += 1;
                    }
                }
            }
        }
    }

    fn on_listed(&mut self, index: usize, page: u32, signal: PaginationSignal, tiles: usize) {
        let max_pages = self.scheduler.max_pages;
        let cancelled = self.cancelled;
        let Some(cursor) = self.cursors.get_mut(index) else { return };
        cursor.pages_fetched += 1;
        cursor.highest_fetched = cursor.highest_fetched.max(page);

        if cursor.exhausted || cancelled {
            return;
        }
        if tiles == 0 {
            debug!("{} page {} has no products; pagination complete", cursor.category.name(), page);
            cursor.exhausted = true;
            return;
        }

        if let Some(total) = signal.total_pages {
            cursor.category.total_pages = Some(total);
            let last = total.min(max_pages);
            if total > max_pages {
                warn!("⚠️ {} reports {} pages; capped at {}", cursor.category.name(), total, max_pages);
                cursor.cap_reached = true;
            }
            let from = cursor.highest_emitted + 1;
            cursor.exhausted = true;
            for next in from..=last {
                self.emit_page(index, next);
            }
        } else if signal.has_next {
            if page + 1 > max_pages {
                warn!("⚠️ {} hit the page cap ({})", cursor.category.name(), max_pages);
                cursor.cap_reached = true;
                cursor.exhausted = true;
            } else if page + 1 > cursor.highest_emitted {
                self.emit_page(index, page + 1);
            }
        } else {
            debug!("{} page {} is the last page", cursor.category.name(), page);
            cursor.exhausted = true;
        }
    }

    fn emit_page(&mut self, index: usize, page: u32) {
        let Some(cursor) = self.cursors.get_mut(index) else { return };
        cursor.highest_emitted = cursor.highest_emitted.max(page);
        let url = self.scheduler.page_url(&cursor.category, page);
        self.ready.push_back(WorkItem::listing(cursor.category.id.clone(), page, url));
    }

    /// Hands an emitted item back, to go out again before new work
    pub fn requeue(&mut self, item: WorkItem) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if item.is_listing() {
            if let Some(cursor) = self.cursors.get_mut(item.category.rank) {
                cursor.in_flight = cursor.in_flight.saturating_sub(1);
            }
        }
        self.requeued.push_back(item);
    }

    /// Stops all emission. Returns requeued items that were already emitted
    /// once, so the caller can resolve them as discarded.
    pub fn cancel_all(&mut self) -> Vec<WorkItem> {
        if !self.cancelled {
            info!("🛑 Schedule cancelled; draining in-flight work");
        }
        self.cancelled = true;
        self.ready.clear();
        let drained: Vec<WorkItem> = self.requeued.drain(..).collect();
        for item in &drained {
            if let Some(page) = item.page() {
                if let Some(cursor) = self.cursors.get_mut(item.category.rank) {
                    cursor.pages_discarded += 1;
                    debug!("Discarded {} page {}", cursor.category.name(), page);
                }
            }
        }
        drained
    }

    /// Work is waiting to be emitted
    #[must_use]
    pub fn has_ready(&self) -> bool {
        !self.cancelled && !(self.ready.is_empty() && self.requeued.is_empty())
    }

    /// No work left to emit and nothing in flight
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.in_flight == 0 && (self.cancelled || (self.ready.is_empty() && self.requeued.is_empty()))
    }

    #[must_use]
    pub const fn in_flight(&self) -> usize {
        self.in_flight
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    #[must_use]
    pub fn status(&self, rank: usize) -> Option<CategoryStatus> {
        self.cursors.get(rank).map(CategoryCursor::status)
    }

    /// Final per-category facts, in configured order
    #[must_use]
    pub fn progress(&self) -> Vec<CategoryProgress> {
        self.cursors
            .iter()
            .map(|cursor| CategoryProgress {
                category: cursor.category.id.clone(),
                status: cursor.status(),
                total_pages: cursor.category.total_pages,
                highest_page: cursor.highest_fetched,
                cap_reached: cursor.cap_reached,
            })
            .collect()
    }
}
