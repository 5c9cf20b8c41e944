//! # Product Fetcher
//!
//! Fetches one work item inside a page context derived from the shared
//! session: navigate, wait for the structural ready condition, extract.
//!
//! - "No products" (empty-state marker or zero page count) is a successful
//!   fetch with zero records.
//! - A menu shell that never grows tiles is `StructureChanged`.
//! - Nothing recognizable before the bound is `Timeout`.

use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::errors::FetchError;
use super::page::{ListingState, PageMarkup, PaginationSignal};
use super::wait::{WaitError, WaitPolicy, wait_for};
use crate::domain::product::{ObservationOrigin, RawRecord};
use crate::domain::session::Session;
use crate::domain::work_item::{WorkItem, WorkKind};
use crate::infrastructure::substrate::{BrowserSubstrate, NavTarget, SubstrateError};

/// Extraction result for one page
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub records: Vec<RawRecord>,
    /// Pagination signal of a listing page; default for detail pages
    pub signal: PaginationSignal,
    /// Product tiles found on a listing page
    pub tiles: usize,
}

pub struct ProductFetcher<S: BrowserSubstrate> {
    substrate: Arc<S>,
    markup: Arc<PageMarkup>,
    wait: WaitPolicy,
}

impl<S: BrowserSubstrate> ProductFetcher<S> {
    pub const fn new(substrate: Arc<S>, markup: Arc<PageMarkup>, wait: WaitPolicy) -> Self {
        Self { substrate, markup, wait }
    }

    /// Fetches `item` with a page context derived from `session`.
    pub async fn fetch(&self, item: &WorkItem, session: &Session<S::Context>) -> Result<FetchedPage, FetchError> {
        let page_url = Url::parse(&item.target).map_err(|e| SubstrateError::InvalidUrl {
            url: item.target.clone(),
            message: e.to_string(),
        })?;

        let ctx = self.substrate.open_context(Some(session.context())).await?;
        self.substrate.navigate(&ctx, NavTarget::Url(item.target.clone())).await?;

        let origin = ObservationOrigin {
            category: item.category.clone(),
            page: item.page(),
        };
        match item.kind {
            WorkKind::ListingPage { .. } => self.fetch_listing(item, &ctx, &origin, &page_url).await,
            WorkKind::ProductDetail => self.fetch_detail(item, &ctx, &origin, &page_url).await,
        }
    }

    async fn fetch_listing(
        &self,
        item: &WorkItem,
        ctx: &S::Context,
        origin: &ObservationOrigin,
        page_url: &Url,
    ) -> Result<FetchedPage, FetchError> {
        let markup = &*self.markup;
        let ready = wait_for(&*self.substrate, ctx, self.wait, |html: &str| {
            markup.listing_ready(html).map(|state| (state, html.to_string()))
        })
        .await;

        let (state, html) = match ready {
            Ok(ready) => ready,
            Err(WaitError::TimedOut { waited, last_content }) => {
                let shell_only = last_content
                    .as_deref()
                    .is_some_and(|html| markup.classify_listing(html) == ListingState::ShellOnly);
                return Err(if shell_only {
                    FetchError::StructureChanged {
                        target: item.to_string(),
                    }
                } else {
                    FetchError::Timeout {
                        target: item.to_string(),
                        waited,
                    }
                });
            }
            Err(WaitError::Substrate(source)) => return Err(source.into()),
        };

        if state == ListingState::GatePresent {
            return Err(FetchError::GateReappeared {
                target: item.to_string(),
            });
        }

        let extraction = markup.extract_listing(&html, origin, page_url);
        let tiles = extraction.records.len();
        debug!(
            "📄 {}: {} tiles (total pages {:?}, next {})",
            item, tiles, extraction.signal.total_pages, extraction.signal.has_next
        );
        Ok(FetchedPage {
            records: extraction.records,
            signal: extraction.signal,
            tiles,
        })
    }

    async fn fetch_detail(
        &self,
        item: &WorkItem,
        ctx: &S::Context,
        origin: &ObservationOrigin,
        page_url: &Url,
    ) -> Result<FetchedPage, FetchError> {
        let markup = &*self.markup;
        let ready = wait_for(&*self.substrate, ctx, self.wait, |html: &str| {
            markup.detail_ready(html).map(|rendered| (rendered, html.to_string()))
        })
        .await;

        let html = match ready {
            Ok((true, html)) => html,
            Ok((false, _)) => {
                return Err(FetchError::GateReappeared {
                    target: item.to_string(),
                });
            }
            Err(WaitError::TimedOut { waited, .. }) => {
                return Err(FetchError::Timeout {
                    target: item.to_string(),
                    waited,
                });
            }
            Err(WaitError::Substrate(source)) => return Err(source.into()),
        };

        let record = markup
            .extract_detail(&html, origin, page_url)
            .ok_or_else(|| FetchError::StructureChanged {
                target: item.to_string(),
            })?;
        debug!("🔎 {}: detail extracted", item);
        Ok(FetchedPage {
            records: vec![record],
            signal: PaginationSignal::default(),
            tiles: 0,
        })
    }
}
