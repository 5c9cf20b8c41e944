//! # Menu Page Markup
//!
//! Compiled selectors and text patterns for the dispensary menu, plus the
//! synchronous readers built on them: gate detection, listing
//! classification, tile extraction and the pagination signal.
//!
//! Everything here takes `&str` and parses on the spot. The parsed
//! document is not `Send`, so it must never be held across an await.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::domain::product::{ObservationOrigin, RawRecord};
use crate::infrastructure::config::SelectorConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkupError {
    #[error("Invalid selector {key}: {css}")]
    InvalidSelector { key: &'static str, css: String },

    #[error("Invalid text pattern: {0}")]
    Pattern(String),
}

/// What the entry page currently shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Age verification interstitial is up
    Present,
    /// Catalog content is reachable
    Cleared,
}

/// What a listing page currently shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingState {
    /// The age gate is back; the session expired
    GatePresent,
    /// Product tiles rendered
    Tiles(usize),
    /// The menu says there are no products here
    Empty,
    /// Menu shell rendered without tiles or an empty marker
    ShellOnly,
    /// Nothing recognizable yet
    NotLoaded,
}

impl ListingState {
    /// Whether the page reached a state extraction can act on
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::GatePresent | Self::Tiles(_) | Self::Empty)
    }
}

/// Whether more listing pages follow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationSignal {
    /// Explicit page count reported by the page
    pub total_pages: Option<u32>,
    /// An enabled next-page affordance is present
    pub has_next: bool,
}

#[derive(Debug, Clone)]
pub struct ListingExtraction {
    pub state: ListingState,
    pub records: Vec<RawRecord>,
    pub signal: PaginationSignal,
}

/// Tile-text fallbacks for fields whose selectors found nothing
struct TilePatterns {
    thc: Regex,
    cbd: Regex,
    strain: Regex,
    cbd_label: Regex,
    size: Regex,
    price: Regex,
    sold_out: Regex,
}

impl TilePatterns {
    fn new() -> Result<Self, MarkupError> {
        let compile = |pattern: &str| Regex::new(pattern).map_err(|e| MarkupError::Pattern(e.to_string()));
        Ok(Self {
            thc: compile(r"(?i)\bTHC\s*:?\s*(\d+(?:\.\d+)?)\s*%")?,
            cbd: compile(r"(?i)\bCBD\s*:?\s*(\d+(?:\.\d+)?)\s*%")?,
            strain: compile(r"(?i)\b(sativa|indica|hybrid)\b")?,
            cbd_label: compile(r"(?i)\bCBD\b(\s*[:\d])?")?,
            size: compile(r"(?i)\b(\d+(?:\.\d+)?\s*(?:mg|g|oz))\b")?,
            price: compile(r"\$\s*(\d[\d,]*(?:\.\d+)?)")?,
            sold_out: compile(r"(?i)\b(?:out of stock|sold out)\b")?,
        })
    }

    fn strain(&self, text: &str) -> Option<String> {
        if let Some(found) = self.strain.find(text) {
            return Some(title_case(found.as_str()));
        }
        // "CBD" alone is a strain label; "CBD: 1%" or "CBD 1%" is a potency
        self.cbd_label
            .captures_iter(text)
            .any(|captures| captures.get(1).is_none())
            .then(|| "CBD".to_string())
    }

    fn capture(pattern: &Regex, text: &str) -> Option<String> {
        pattern
            .captures(text)
            .and_then(|captures| captures.get(1))
            .map(|found| found.as_str().to_string())
    }
}

/// Compiled form of [`SelectorConfig`]
pub struct PageMarkup {
    age_gate: Selector,
    gate_confirm: String,
    listing_root: Selector,
    product_tile: Selector,
    empty_state: Selector,
    name: Selector,
    brand: Selector,
    strain: Selector,
    thc: Selector,
    cbd: Selector,
    size: Selector,
    price: Selector,
    promo: Selector,
    stock: Selector,
    link: Selector,
    page_count: Selector,
    page_count_attribute: String,
    state_script: Selector,
    state_page_count_key: String,
    next_page: Selector,
    detail_root: Selector,
    patterns: TilePatterns,
}

fn compile_selector(key: &'static str, css: &str) -> Result<Selector, MarkupError> {
    Selector::parse(css).map_err(|_| MarkupError::InvalidSelector {
        key,
        css: css.to_string(),
    })
}

impl PageMarkup {
    pub fn compile(config: &SelectorConfig) -> Result<Self, MarkupError> {
        Ok(Self {
            age_gate: compile_selector("age_gate", &config.age_gate)?,
            gate_confirm: config.gate_confirm.clone(),
            listing_root: compile_selector("listing_root", &config.listing_root)?,
            product_tile: compile_selector("product_tile", &config.product_tile)?,
            empty_state: compile_selector("empty_state", &config.empty_state)?,
            name: compile_selector("name", &config.name)?,
            brand: compile_selector("brand", &config.brand)?,
            strain: compile_selector("strain", &config.strain)?,
            thc: compile_selector("thc", &config.thc)?,
            cbd: compile_selector("cbd", &config.cbd)?,
            size: compile_selector("size", &config.size)?,
            price: compile_selector("price", &config.price)?,
            promo: compile_selector("promo", &config.promo)?,
            stock: compile_selector("stock", &config.stock)?,
            link: compile_selector("link", &config.link)?,
            page_count: compile_selector("page_count", &config.page_count)?,
            page_count_attribute: config.page_count_attribute.clone(),
            state_script: compile_selector("state_script", &config.state_script)?,
            state_page_count_key: config.state_page_count_key.clone(),
            next_page: compile_selector("next_page", &config.next_page)?,
            detail_root: compile_selector("detail_root", &config.detail_root)?,
            patterns: TilePatterns::new()?,
        })
    }

    /// Selector of the gate's confirm affordance, for activation
    #[must_use]
    pub fn gate_confirm_selector(&self) -> &str {
        &self.gate_confirm
    }

    /// Gate detection by structural marker; `None` while nothing is rendered
    #[must_use]
    pub fn gate_state(&self, html: &str) -> Option<GateState> {
        let document = Html::parse_document(html);
        if exists(&document, &self.age_gate) {
            return Some(GateState::Present);
        }
        let cleared = [&self.listing_root, &self.product_tile, &self.empty_state, &self.detail_root]
            .into_iter()
            .any(|selector| exists(&document, selector));
        cleared.then_some(GateState::Cleared)
    }

    #[must_use]
    pub fn classify_listing(&self, html: &str) -> ListingState {
        self.classify_document(&Html::parse_document(html))
    }

    /// Probe for the structural wait: `Some` once the listing settled
    #[must_use]
    pub fn listing_ready(&self, html: &str) -> Option<ListingState> {
        Some(self.classify_listing(html)).filter(|state| state.is_settled())
    }

    /// Probe for detail pages: `Some(true)` once the detail root rendered,
    /// `Some(false)` when the gate is back
    #[must_use]
    pub fn detail_ready(&self, html: &str) -> Option<bool> {
        let document = Html::parse_document(html);
        if exists(&document, &self.age_gate) {
            Some(false)
        } else if exists(&document, &self.detail_root) {
            Some(true)
        } else {
            None
        }
    }

    fn classify_document(&self, document: &Html) -> ListingState {
        if exists(document, &self.age_gate) {
            return ListingState::GatePresent;
        }
        let tiles = document.select(&self.product_tile).count();
        if tiles > 0 {
            return ListingState::Tiles(tiles);
        }
        if exists(document, &self.empty_state) {
            return ListingState::Empty;
        }
        if exists(document, &self.listing_root) {
            if self.pagination_signal(document).total_pages == Some(0) {
                return ListingState::Empty;
            }
            return ListingState::ShellOnly;
        }
        ListingState::NotLoaded
    }

    /// One raw record per tile, plus the pagination signal.
    #[must_use]
    pub fn extract_listing(&self, html: &str, origin: &ObservationOrigin, page_url: &Url) -> ListingExtraction {
        let document = Html::parse_document(html);
        let state = self.classify_document(&document);
        let records = match state {
            ListingState::Tiles(_) => document
                .select(&self.product_tile)
                .map(|tile| {
                    let mut record = RawRecord::empty(origin.clone());
                    self.read_fields(tile, page_url, &mut record);
                    record
                })
                .collect(),
            _ => Vec::new(),
        };
        ListingExtraction {
            state,
            records,
            signal: self.pagination_signal(&document),
        }
    }

    /// Single record from a product detail page; `None` without a detail root
    #[must_use]
    pub fn extract_detail(&self, html: &str, origin: &ObservationOrigin, page_url: &Url) -> Option<RawRecord> {
        let document = Html::parse_document(html);
        let root = document.select(&self.detail_root).next()?;
        let mut record = RawRecord::empty(origin.clone());
        self.read_fields(root, page_url, &mut record);
        if record.detail_url.is_empty() {
            record.detail_url = page_url.to_string();
        }
        Some(record)
    }

    fn read_fields(&self, scope: ElementRef<'_>, page_url: &Url, record: &mut RawRecord) {
        let text = collapse_whitespace(scope.text());
        let patterns = &self.patterns;

        record.product_name = non_empty(first_text(scope, &self.name))
            .or_else(|| non_empty(first_text(scope, &self.link)))
            .or_else(|| scope.text().map(str::trim).find(|chunk| !chunk.is_empty()).map(ToString::to_string))
            .unwrap_or_default();
        record.brand = first_text(scope, &self.brand);
        record.strain_type = non_empty(first_text(scope, &self.strain))
            .or_else(|| patterns.strain(&text))
            .unwrap_or_default();
        record.thc_percent = non_empty(first_text(scope, &self.thc))
            .or_else(|| TilePatterns::capture(&patterns.thc, &text).map(|value| format!("{value}%")))
            .unwrap_or_default();
        record.cbd_percent = non_empty(first_text(scope, &self.cbd))
            .or_else(|| TilePatterns::capture(&patterns.cbd, &text).map(|value| format!("{value}%")))
            .unwrap_or_default();
        record.size_weight = non_empty(first_text(scope, &self.size))
            .or_else(|| TilePatterns::capture(&patterns.size, &text))
            .unwrap_or_default();
        record.price = non_empty(first_text(scope, &self.price))
            .or_else(|| TilePatterns::capture(&patterns.price, &text).map(|value| format!("${value}")))
            .unwrap_or_default();
        record.promo = first_text(scope, &self.promo);
        record.stock_status = non_empty(first_text(scope, &self.stock)).unwrap_or_else(|| {
            if patterns.sold_out.is_match(&text) {
                "out_of_stock".to_string()
            } else {
                "in_stock".to_string()
            }
        });
        record.detail_url = self.detail_href(scope, page_url).unwrap_or_default();
    }

    fn detail_href(&self, scope: ElementRef<'_>, page_url: &Url) -> Option<String> {
        let href = scope
            .value()
            .attr("href")
            .or_else(|| scope.select(&self.link).find_map(|link| link.value().attr("href")))?
            .trim();
        if href.is_empty() {
            return None;
        }
        Some(page_url.join(href).map_or_else(|_| href.to_string(), |url| url.to_string()))
    }

    fn pagination_signal(&self, document: &Html) -> PaginationSignal {
        let total_pages = document
            .select(&self.page_count)
            .find_map(|element| element.value().attr(&self.page_count_attribute))
            .and_then(|value| value.trim().parse::<u32>().ok())
            .or_else(|| self.state_page_count(document));
        let has_next = document.select(&self.next_page).any(|element| !is_disabled(element));
        PaginationSignal { total_pages, has_next }
    }

    /// Page count from embedded JSON state, wherever the key sits
    fn state_page_count(&self, document: &Html) -> Option<u32> {
        document.select(&self.state_script).find_map(|script| {
            let raw: String = script.text().collect();
            let state: Value = serde_json::from_str(raw.trim()).ok()?;
            find_count(&state, &self.state_page_count_key)
        })
    }
}

fn exists(document: &Html, selector: &Selector) -> bool {
    document.select(selector).next().is_some()
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> String {
    scope
        .select(selector)
        .next()
        .map(|element| collapse_whitespace(element.text()))
        .unwrap_or_default()
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn collapse_whitespace<'a>(chunks: impl Iterator<Item = &'a str>) -> String {
    chunks.flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

fn title_case(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    chars
        .next()
        .map(|first| first.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

fn is_disabled(element: ElementRef<'_>) -> bool {
    let value = element.value();
    value.attr("disabled").is_some()
        || value.attr("aria-disabled").is_some_and(|flag| flag.eq_ignore_ascii_case("true"))
        || value.classes().any(|class| class.eq_ignore_ascii_case("disabled"))
}

fn find_count(value: &Value, key: &str) -> Option<u32> {
    match value {
        Value::Object(map) => map
            .get(key)
            .and_then(|found| match found {
                Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
                Value::String(text) => text.trim().parse().ok(),
                _ => None,
            })
            .or_else(|| map.values().find_map(|nested| find_count(nested, key))),
        Value::Array(items) => items.iter().find_map(|nested| find_count(nested, key)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::CategoryRef;
    use rstest::rstest;

    fn markup() -> PageMarkup {
        PageMarkup::compile(&SelectorConfig::default()).unwrap()
    }

    fn origin() -> ObservationOrigin {
        ObservationOrigin {
            category: CategoryRef::new(0, "flower"),
            page: Some(1),
        }
    }

    fn page_url() -> Url {
        Url::parse("https://menu.test/dispensary/green-leaf/products/flower?page=1").unwrap()
    }

    const STRUCTURED_TILE: &str = r#"
        <div data-testid="menu-container">
          <div data-testid="product-list-item">
            <a href="/dispensary/green-leaf/product/runtz-flower-3-5g">
              <span data-testid="product-name">Runtz</span>
            </a>
            <span data-testid="product-brand">Cookies</span>
            <span data-testid="product-strain">Hybrid</span>
            <span data-testid="product-thc">THC: 27.4%</span>
            <span data-testid="product-weight">3.5g</span>
            <span data-testid="product-price">$15.00</span>
          </div>
          <div data-total-pages="4"></div>
        </div>"#;

    #[test]
    fn extracts_structured_tile() {
        let extraction = markup().extract_listing(STRUCTURED_TILE, &origin(), &page_url());
        assert_eq!(extraction.state, ListingState::Tiles(1));
        let record = &extraction.records[0];
        assert_eq!(record.product_name, "Runtz");
        assert_eq!(record.brand, "Cookies");
        assert_eq!(record.strain_type, "Hybrid");
        assert_eq!(record.thc_percent, "THC: 27.4%");
        assert_eq!(record.price, "$15.00");
        assert_eq!(record.cbd_percent, "");
        assert_eq!(record.stock_status, "in_stock");
        assert_eq!(
            record.detail_url,
            "https://menu.test/dispensary/green-leaf/product/runtz-flower-3-5g"
        );
        assert_eq!(extraction.signal.total_pages, Some(4));
    }

    #[test]
    fn falls_back_to_tile_text() {
        let html = r#"
          <div data-testid="product-list-item">
            <a href="/product/blue-dream-1g">Blue Dream</a>
            <p>Sativa THC: 21.5% CBD: 0.3% 1g $9.50 Sold Out</p>
          </div>"#;
        let extraction = markup().extract_listing(html, &origin(), &page_url());
        let record = &extraction.records[0];
        assert_eq!(record.product_name, "Blue Dream");
        assert_eq!(record.strain_type, "Sativa");
        assert_eq!(record.thc_percent, "21.5%");
        assert_eq!(record.cbd_percent, "0.3%");
        assert_eq!(record.size_weight, "1g");
        assert_eq!(record.price, "$9.50");
        assert_eq!(record.stock_status, "out_of_stock");
    }

    #[test]
    fn standalone_cbd_is_a_strain_label() {
        let html = r#"<div data-testid="product-list-item"><a href="/p/calm">Calm</a><p>CBD 100mg</p></div>"#;
        let record = &markup().extract_listing(html, &origin(), &page_url()).records[0];
        assert_eq!(record.strain_type, "");

        let html = r#"<div data-testid="product-list-item"><a href="/p/calm">Calm</a><p>CBD tincture 100mg</p></div>"#;
        let record = &markup().extract_listing(html, &origin(), &page_url()).records[0];
        assert_eq!(record.strain_type, "CBD");
        assert_eq!(record.size_weight, "100mg");
    }

    #[rstest]
    #[case(r#"<div data-testid="age-gate"></div>"#, ListingState::GatePresent)]
    #[case(r#"<div data-testid="menu-container"><div data-testid="empty-state"></div></div>"#, ListingState::Empty)]
    #[case(r#"<div data-testid="menu-container"></div>"#, ListingState::ShellOnly)]
    #[case(r#"<div data-testid="menu-container" data-total-pages="0"></div>"#, ListingState::Empty)]
    #[case("<html><body><p>loading</p></body></html>", ListingState::NotLoaded)]
    fn classifies_listing_states(#[case] html: &str, #[case] expected: ListingState) {
        assert_eq!(markup().classify_listing(html), expected);
    }

    #[test]
    fn listing_ready_ignores_unsettled_pages() {
        let markup = markup();
        assert_eq!(markup.listing_ready(r#"<div data-testid="menu-container"></div>"#), None);
        assert_eq!(markup.listing_ready(STRUCTURED_TILE), Some(ListingState::Tiles(1)));
    }

    #[test]
    fn gate_state_uses_structural_markers() {
        let markup = markup();
        assert_eq!(
            markup.gate_state(r#"<div data-testid="age-gate"><button data-testid="age-gate-confirm">Yes</button></div>"#),
            Some(GateState::Present)
        );
        assert_eq!(markup.gate_state(STRUCTURED_TILE), Some(GateState::Cleared));
        assert_eq!(markup.gate_state("<p>Are you 21?</p>"), None);
    }

    #[rstest]
    #[case(r#"<a data-testid="pagination-next" href="?page=2">Next</a>"#, true)]
    #[case(r#"<button data-testid="pagination-next" disabled>Next</button>"#, false)]
    #[case(r#"<button data-testid="pagination-next" aria-disabled="true">Next</button>"#, false)]
    #[case(r#"<a rel="next" class="page-link disabled">Next</a>"#, false)]
    #[case("<span>no pager</span>", false)]
    fn next_affordance_must_be_enabled(#[case] pager: &str, #[case] has_next: bool) {
        let html = format!(r#"<div data-testid="menu-container">{pager}</div>"#);
        let document = Html::parse_document(&html);
        assert_eq!(markup().pagination_signal(&document).has_next, has_next);
    }

    #[test]
    fn page_count_found_in_json_state() {
        let html = r#"
          <div data-testid="menu-container"></div>
          <script id="__NEXT_DATA__" type="application/json">
            {"props": {"pageProps": {"menu": {"pagination": {"totalPages": 7}}}}}
          </script>"#;
        let document = Html::parse_document(html);
        assert_eq!(markup().pagination_signal(&document).total_pages, Some(7));
    }

    #[test]
    fn detail_page_extraction_uses_page_url() {
        let html = r#"
          <div data-testid="product-detail">
            <h1 data-testid="product-name">Runtz</h1>
            <span data-testid="product-cbd">CBD: 0.1%</span>
            <span data-testid="product-special">2 for $25</span>
          </div>"#;
        let url = Url::parse("https://menu.test/product/runtz-flower-3-5g").unwrap();
        let detail_origin = ObservationOrigin {
            category: CategoryRef::new(0, "flower"),
            page: None,
        };
        let record = markup().extract_detail(html, &detail_origin, &url).unwrap();
        assert_eq!(record.product_name, "Runtz");
        assert_eq!(record.cbd_percent, "CBD: 0.1%");
        assert_eq!(record.promo, "2 for $25");
        assert_eq!(record.detail_url, "https://menu.test/product/runtz-flower-3-5g");
        assert_eq!(markup().detail_ready(html), Some(true));
    }

    #[test]
    fn invalid_selector_is_rejected() {
        let config = SelectorConfig {
            product_tile: "[[".to_string(),
            ..SelectorConfig::default()
        };
        assert!(matches!(
            PageMarkup::compile(&config),
            Err(MarkupError::InvalidSelector { key: "product_tile", .. })
        ));
    }
}
