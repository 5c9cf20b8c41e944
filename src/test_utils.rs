//! Test utilities for the menu extractor
//!
//! A scripted, in-memory [`BrowserSubstrate`] plus markup builders that
//! follow the default selector set. Lets unit tests and integration tests
//! (through the `test-utils` feature) drive the gate, fetcher and pipeline
//! without a network.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::infrastructure::config::{ExtractorConfig, defaults};
use crate::infrastructure::substrate::{BrowserSubstrate, NavTarget, SubstrateError};

/// One scripted response for a URL
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Render this markup
    Html(String),
    /// Render a page that never settles
    Loading,
    /// Expire the session: the age gate is shown again
    ExpireSession,
    /// Fail the navigation
    Fail(SubstrateError),
}

/// How the age gate behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateBehavior {
    /// Confirming clears the gate
    Normal,
    /// Confirming does nothing
    Blocked,
    /// The site shows no gate at all
    Absent,
}

#[derive(Debug, Default)]
struct SessionState {
    confirmed: AtomicBool,
}

/// Context handle of [`ScriptedSubstrate`]; derived contexts share the
/// session state of their root
#[derive(Debug)]
pub struct ScriptedContext {
    session: Arc<SessionState>,
    current: Mutex<Option<String>>,
}

pub struct ScriptedSubstrate {
    entry_url: String,
    gate: GateBehavior,
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    navigations: Mutex<Vec<String>>,
    confirm_clicks: AtomicU32,
    sessions_opened: AtomicU32,
}

impl ScriptedSubstrate {
    #[must_use]
    pub fn new(entry_url: impl Into<String>) -> Self {
        Self {
            entry_url: entry_url.into(),
            gate: GateBehavior::Normal,
            routes: Mutex::new(HashMap::new()),
            navigations: Mutex::new(Vec::new()),
            confirm_clicks: AtomicU32::new(0),
            sessions_opened: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn with_gate(mut self, gate: GateBehavior) -> Self {
        self.gate = gate;
        self
    }

    /// Responses for `url`, consumed in order; the last one repeats
    #[must_use]
    pub fn route(self, url: impl Into<String>, steps: Vec<Scripted>) -> Self {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url.into(), steps.into());
        }
        self
    }

    /// Every URL navigated to, in order
    #[must_use]
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().map(|list| list.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn navigation_count(&self, url: &str) -> usize {
        self.navigations().iter().filter(|visited| visited.as_str() == url).count()
    }

    #[must_use]
    pub fn confirm_clicks(&self) -> u32 {
        self.confirm_clicks.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn sessions_opened(&self) -> u32 {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    fn next_step(&self, url: &str) -> Option<Scripted> {
        let mut routes = self.routes.lock().ok()?;
        let steps = routes.get_mut(url)?;
        if steps.len() > 1 { steps.pop_front() } else { steps.front().cloned() }
    }

    fn gate_blocks(&self, ctx: &ScriptedContext) -> bool {
        self.gate != GateBehavior::Absent && !ctx.session.confirmed.load(Ordering::SeqCst)
    }
}

fn set_current(ctx: &ScriptedContext, html: String) {
    if let Ok(mut current) = ctx.current.lock() {
        *current = Some(html);
    }
}

#[async_trait]
impl BrowserSubstrate for ScriptedSubstrate {
    type Context = ScriptedContext;

    async fn open_context(&self, parent: Option<&ScriptedContext>) -> Result<ScriptedContext, SubstrateError> {
        let session = match parent {
            Some(parent) => Arc::clone(&parent.session),
            None => {
                self.sessions_opened.fetch_add(1, Ordering::SeqCst);
                Arc::new(SessionState::default())
            }
        };
        Ok(ScriptedContext {
            session,
            current: Mutex::new(None),
        })
    }

    async fn navigate(&self, ctx: &ScriptedContext, target: NavTarget) -> Result<(), SubstrateError> {
        match target {
            NavTarget::Url(url) => {
                if let Ok(mut navigations) = self.navigations.lock() {
                    navigations.push(url.clone());
                }
                if self.gate_blocks(ctx) {
                    set_current(ctx, gate_page());
                    return Ok(());
                }
                if url == self.entry_url {
                    set_current(ctx, menu_shell());
                    return Ok(());
                }
                match self.next_step(&url) {
                    Some(Scripted::Html(html)) => set_current(ctx, html),
                    Some(Scripted::Loading) => set_current(ctx, loading_page()),
                    Some(Scripted::ExpireSession) => {
                        ctx.session.confirmed.store(false, Ordering::SeqCst);
                        set_current(ctx, gate_page());
                    }
                    Some(Scripted::Fail(error)) => return Err(error),
                    None => return Err(SubstrateError::Http { status: 404, url }),
                }
                Ok(())
            }
            NavTarget::Activate(selector) => {
                let showing_gate = ctx
                    .current
                    .lock()
                    .map(|current| current.as_deref() == Some(gate_page().as_str()))
                    .unwrap_or(false);
                if !showing_gate || selector != defaults::selectors::GATE_CONFIRM {
                    return Err(SubstrateError::MissingElement { selector });
                }
                self.confirm_clicks.fetch_add(1, Ordering::SeqCst);
                if self.gate == GateBehavior::Normal {
                    ctx.session.confirmed.store(true, Ordering::SeqCst);
                    set_current(ctx, menu_shell());
                }
                Ok(())
            }
        }
    }

    async fn read_content(&self, ctx: &ScriptedContext) -> Result<String, SubstrateError> {
        ctx.current
            .lock()
            .ok()
            .and_then(|current| current.clone())
            .ok_or(SubstrateError::NoPageLoaded)
    }
}

/// Product tile fixture
#[derive(Debug, Clone, Default)]
pub struct TileFixture {
    pub slug: String,
    pub name: String,
    pub brand: String,
    pub strain: String,
    pub thc: String,
    pub cbd: String,
    pub weight: String,
    pub price: String,
    pub promo: String,
}

impl TileFixture {
    #[must_use]
    pub fn new(slug: &str, name: &str) -> Self {
        Self {
            slug: slug.to_string(),
            name: name.to_string(),
            brand: "House".to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn price(mut self, price: &str) -> Self {
        self.price = price.to_string();
        self
    }

    #[must_use]
    pub fn promo(mut self, promo: &str) -> Self {
        self.promo = promo.to_string();
        self
    }

    #[must_use]
    pub fn cbd(mut self, cbd: &str) -> Self {
        self.cbd = cbd.to_string();
        self
    }

    #[must_use]
    pub fn thc(mut self, thc: &str) -> Self {
        self.thc = thc.to_string();
        self
    }

    fn fields(&self) -> String {
        let mut html = String::new();
        let fields = [
            ("product-name", &self.name),
            ("product-brand", &self.brand),
            ("product-strain", &self.strain),
            ("product-thc", &self.thc),
            ("product-cbd", &self.cbd),
            ("product-weight", &self.weight),
            ("product-price", &self.price),
            ("product-special", &self.promo),
        ];
        for (testid, value) in fields {
            if !value.is_empty() {
                let _ = write!(html, r#"<span data-testid="{testid}">{value}</span>"#);
            }
        }
        html
    }

    #[must_use]
    pub fn tile_html(&self) -> String {
        format!(
            r#"<div data-testid="product-list-item"><a href="/product/{}">{}</a></div>"#,
            self.slug,
            self.fields()
        )
    }
}

/// Pagination markup on a listing page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pager {
    None,
    Next,
    LastPage,
    Total(u32),
}

#[must_use]
pub fn gate_page() -> String {
    r#"<div data-testid="age-gate"><p>Are you 21 or older?</p><button data-testid="age-gate-confirm">Yes</button></div>"#
        .to_string()
}

#[must_use]
pub fn menu_shell() -> String {
    r#"<div data-testid="menu-container"></div>"#.to_string()
}

#[must_use]
pub fn loading_page() -> String {
    r#"<div class="spinner">Loading</div>"#.to_string()
}

#[must_use]
pub fn empty_page() -> String {
    r#"<div data-testid="menu-container"><div data-testid="empty-state">No products found</div></div>"#.to_string()
}

#[must_use]
pub fn listing_page(tiles: &[TileFixture], pager: Pager) -> String {
    let tiles: String = tiles.iter().map(TileFixture::tile_html).collect();
    let pager = match pager {
        Pager::None => String::new(),
        Pager::Next => r#"<a data-testid="pagination-next" href="?page=next">Next</a>"#.to_string(),
        Pager::LastPage => r#"<button data-testid="pagination-next" disabled>Next</button>"#.to_string(),
        Pager::Total(total) => format!(r#"<nav data-total-pages="{total}"></nav>"#),
    };
    format!(r#"<div data-testid="menu-container">{tiles}{pager}</div>"#)
}

#[must_use]
pub fn detail_page(tile: &TileFixture) -> String {
    format!(r#"<div data-testid="product-detail">{}</div>"#, tile.fields())
}

/// Base URL used by test configurations
pub const TEST_BASE_URL: &str = "https://menu.test/dispensary";

/// Configuration with fast timings for scripted runs
#[must_use]
pub fn test_config(categories: &[&str]) -> ExtractorConfig {
    let mut config = ExtractorConfig::default();
    config.site.base_url = TEST_BASE_URL.to_string();
    config.site.dispensary_slug = "green-leaf".to_string();
    config.categories = categories.iter().map(ToString::to_string).collect();
    config.crawl.worker_pool_size = 2;
    config.crawl.queue_capacity = 4;
    config.crawl.max_pages_per_category = 10;
    config.crawl.page_wait_timeout_ms = 40;
    config.crawl.poll_interval_ms = 5;
    config.gate.timeout_ms = 40;
    config.gate.poll_interval_ms = 5;
    config.gate.max_attempts = 3;
    config.retry.max_attempts = 3;
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.retry.jitter_ms = 0;
    config
}

/// Absolute URL of a product detail page rendered by [`TileFixture`]
#[must_use]
pub fn product_url(slug: &str) -> String {
    format!("https://menu.test/product/{slug}")
}
