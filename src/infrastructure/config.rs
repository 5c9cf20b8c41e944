//! 추출 실행 설정 (Extraction run configuration)
//!
//! Layered with the `config` crate: an optional file first, then
//! `MENU_EXTRACTOR_*` environment variables (`__` separates nested keys,
//! e.g. `MENU_EXTRACTOR_CRAWL__WORKER_POOL_SIZE=8`). Every field has a default
//! from [`defaults`], so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::domain::category::Category;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// 전체 설정 (top-level configuration)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub site: SiteConfig,
    /// Category names in scheduling order
    pub categories: Vec<String>,
    pub crawl: CrawlConfig,
    pub retry: RetryPolicy,
    pub gate: GateConfig,
    pub selectors: SelectorConfig,
    pub filters: FilterConfig,
    pub logging: LoggingConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    pub dispensary_slug: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Navigation budget shared by every context of the session
    pub requests_per_second: u32,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            dispensary_slug: String::new(),
            user_agent: defaults::USER_AGENT.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            requests_per_second: defaults::REQUESTS_PER_SECOND,
        }
    }
}

impl SiteConfig {
    /// Entry URL of the dispensary menu, where the age gate is shown
    #[must_use]
    pub fn entry_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.dispensary_slug.trim_matches('/')
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub worker_pool_size: usize,
    /// Bounded work queue size; the scheduler blocks when it is full
    pub queue_capacity: usize,
    /// Safety cap on listing pages per category
    pub max_pages_per_category: u32,
    pub page_wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub session_max_age_secs: u64,
    /// Times one work item may go back to the queue after session loss
    pub max_requeues: u32,
    /// Follow detail pages for records missing optional fields
    pub fetch_details: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: defaults::WORKER_POOL_SIZE,
            queue_capacity: defaults::QUEUE_CAPACITY,
            max_pages_per_category: defaults::MAX_PAGES_PER_CATEGORY,
            page_wait_timeout_ms: defaults::PAGE_WAIT_TIMEOUT_MS,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            session_max_age_secs: defaults::SESSION_MAX_AGE_SECS,
            max_requeues: defaults::MAX_REQUEUES,
            fetch_details: false,
        }
    }
}

impl CrawlConfig {
    #[must_use]
    pub const fn page_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.page_wait_timeout_ms)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_secs)
    }
}

/// 재시도 정책 (bounded retry with exponential backoff)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            backoff_multiplier: defaults::RETRY_BACKOFF_MULTIPLIER,
            max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            jitter_ms: defaults::RETRY_JITTER_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Checks of the interstitial before giving up with `Blocked`
    pub max_attempts: u32,
    pub poll_interval_ms: u64,
    /// Wait bound for the entry page to render either the gate or the menu
    pub timeout_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::GATE_MAX_ATTEMPTS,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            timeout_ms: defaults::PAGE_WAIT_TIMEOUT_MS,
        }
    }
}

/// CSS selectors describing the menu markup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub age_gate: String,
    pub gate_confirm: String,
    pub listing_root: String,
    pub product_tile: String,
    pub empty_state: String,
    pub name: String,
    pub brand: String,
    pub strain: String,
    pub thc: String,
    pub cbd: String,
    pub size: String,
    pub price: String,
    pub promo: String,
    pub stock: String,
    pub link: String,
    pub page_count: String,
    pub page_count_attribute: String,
    pub state_script: String,
    pub state_page_count_key: String,
    pub next_page: String,
    pub detail_root: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        use defaults::selectors as s;
        Self {
            age_gate: s::AGE_GATE.to_string(),
            gate_confirm: s::GATE_CONFIRM.to_string(),
            listing_root: s::LISTING_ROOT.to_string(),
            product_tile: s::PRODUCT_TILE.to_string(),
            empty_state: s::EMPTY_STATE.to_string(),
            name: s::NAME.to_string(),
            brand: s::BRAND.to_string(),
            strain: s::STRAIN.to_string(),
            thc: s::THC.to_string(),
            cbd: s::CBD.to_string(),
            size: s::SIZE.to_string(),
            price: s::PRICE.to_string(),
            promo: s::PROMO.to_string(),
            stock: s::STOCK.to_string(),
            link: s::LINK.to_string(),
            page_count: s::PAGE_COUNT.to_string(),
            page_count_attribute: s::PAGE_COUNT_ATTRIBUTE.to_string(),
            state_script: s::STATE_SCRIPT.to_string(),
            state_page_count_key: s::STATE_PAGE_COUNT_KEY.to_string(),
            next_page: s::NEXT_PAGE.to_string(),
            detail_root: s::DETAIL_ROOT.to_string(),
        }
    }
}

impl SelectorConfig {
    /// Every CSS selector with its key, for validation and compilation
    #[must_use]
    pub fn css_entries(&self) -> [(&'static str, &str); 19] {
        [
            ("age_gate", self.age_gate.as_str()),
            ("gate_confirm", self.gate_confirm.as_str()),
            ("listing_root", self.listing_root.as_str()),
            ("product_tile", self.product_tile.as_str()),
            ("empty_state", self.empty_state.as_str()),
            ("name", self.name.as_str()),
            ("brand", self.brand.as_str()),
            ("strain", self.strain.as_str()),
            ("thc", self.thc.as_str()),
            ("cbd", self.cbd.as_str()),
            ("size", self.size.as_str()),
            ("price", self.price.as_str()),
            ("promo", self.promo.as_str()),
            ("stock", self.stock.as_str()),
            ("link", self.link.as_str()),
            ("page_count", self.page_count.as_str()),
            ("state_script", self.state_script.as_str()),
            ("next_page", self.next_page.as_str()),
            ("detail_root", self.detail_root.as_str()),
        ]
    }
}

/// Report filters; records without the value never pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_thc: Option<f64>,
    pub max_price: Option<f64>,
}

impl FilterConfig {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.min_thc.is_some() || self.max_price.is_some()
    }
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    pub log_dir: String,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: defaults::LOG_DIR.to_string(),
            file_name: defaults::LOG_FILE_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dataset_path: String,
    pub summary_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dataset_path: defaults::DATASET_PATH.to_string(),
            summary_path: defaults::SUMMARY_PATH.to_string(),
        }
    }
}

impl ExtractorConfig {
    /// 파일 + 환경 변수에서 설정 로드
    ///
    /// A missing file is not an error; environment variables alone may
    /// configure a run.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("categories"),
            )
            .build()?;

        let mut config: Self = settings.try_deserialize()?;
        if config.categories.is_empty() {
            config.categories = defaults::CATEGORIES.iter().map(ToString::to_string).collect();
        }
        config.validate()?;
        Ok(config)
    }

    /// 설정값 유효성 검증
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.categories.is_empty() {
            return Err(ConfigError::validation("at least one category is required"));
        }
        // Categories that share a URL slug would crawl the same pages
        let mut seen = HashSet::new();
        for category in Category::from_names(&self.categories) {
            let slug = category.slug();
            if slug.is_empty() {
                return Err(ConfigError::validation("category names must not be empty"));
            }
            if !seen.insert(slug) {
                return Err(ConfigError::validation(format!("duplicate category: {}", category.name())));
            }
        }

        url::Url::parse(&self.site.base_url)
            .map_err(|e| ConfigError::validation(format!("invalid base_url {}: {e}", self.site.base_url)))?;
        if self.site.dispensary_slug.trim_matches('/').is_empty() {
            return Err(ConfigError::validation("site.dispensary_slug is required"));
        }
        if self.site.requests_per_second == 0 {
            return Err(ConfigError::validation("requests_per_second must be greater than 0"));
        }

        if self.crawl.worker_pool_size == 0 {
            return Err(ConfigError::validation("worker_pool_size must be greater than 0"));
        }
        if self.crawl.queue_capacity == 0 {
            return Err(ConfigError::validation("queue_capacity must be greater than 0"));
        }
        if self.crawl.max_pages_per_category == 0 {
            return Err(ConfigError::validation("max_pages_per_category must be greater than 0"));
        }
        if self.crawl.poll_interval_ms == 0 || self.gate.poll_interval_ms == 0 {
            return Err(ConfigError::validation("poll intervals must be greater than 0"));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::validation("retry.max_attempts must be greater than 0"));
        }
        if self.retry.backoff_multiplier < 1.0 || !self.retry.backoff_multiplier.is_finite() {
            return Err(ConfigError::validation("retry.backoff_multiplier must be at least 1.0"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::validation("retry.base_delay_ms cannot be greater than max_delay_ms"));
        }
        if self.gate.max_attempts == 0 {
            return Err(ConfigError::validation("gate.max_attempts must be greater than 0"));
        }

        for (key, css) in self.selectors.css_entries() {
            scraper::Selector::parse(css)
                .map_err(|e| ConfigError::validation(format!("selector {key} ({css}) is invalid: {e}")))?;
        }
        if self.selectors.page_count_attribute.is_empty() {
            return Err(ConfigError::validation("selectors.page_count_attribute must not be empty"));
        }

        Ok(())
    }
}

/// Default extraction configuration values
pub mod defaults {
    /// Environment variable prefix for overrides
    pub const ENV_PREFIX: &str = "MENU_EXTRACTOR";

    /// Environment variable naming the configuration file
    pub const CONFIG_PATH_ENV: &str = "MENU_EXTRACTOR_CONFIG_PATH";

    /// Configuration file used when no path is given
    pub const CONFIG_PATH: &str = "config/menu-extractor.toml";

    pub const BASE_URL: &str = "https://dutchie.com/dispensary";

    pub const USER_AGENT: &str = "menu-extractor/0.3 (catalog research)";

    /// Menu sections in their customary order
    pub const CATEGORIES: &[&str] = &["flower", "pre-rolls", "vaporizers", "edibles", "concentrates", "tinctures"];

    pub const REQUEST_TIMEOUT_SECS: u64 = 30;

    pub const REQUESTS_PER_SECOND: u32 = 4;

    pub const WORKER_POOL_SIZE: usize = 4;

    pub const QUEUE_CAPACITY: usize = 16;

    pub const MAX_PAGES_PER_CATEGORY: u32 = 50;

    pub const PAGE_WAIT_TIMEOUT_MS: u64 = 15_000;

    pub const POLL_INTERVAL_MS: u64 = 250;

    /// Sessions older than this are re-acquired before reuse
    pub const SESSION_MAX_AGE_SECS: u64 = 1_800;

    pub const MAX_REQUEUES: u32 = 3;

    pub const RETRY_MAX_ATTEMPTS: u32 = 3;

    pub const RETRY_BASE_DELAY_MS: u64 = 1_000;

    pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

    pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

    pub const RETRY_JITTER_MS: u64 = 250;

    pub const GATE_MAX_ATTEMPTS: u32 = 5;

    pub const LOG_LEVEL: &str = "info";

    pub const LOG_DIR: &str = "logs";

    pub const LOG_FILE_NAME: &str = "menu-extractor.log";

    pub const DATASET_PATH: &str = "output/dataset.json";

    pub const SUMMARY_PATH: &str = "output/run_summary.json";

    /// 메뉴 마크업 기본 셀렉터 (`data-testid` based)
    pub mod selectors {
        pub const AGE_GATE: &str = r#"[data-testid="age-gate"]"#;
        pub const GATE_CONFIRM: &str = r#"[data-testid="age-gate-confirm"]"#;
        pub const LISTING_ROOT: &str = r#"[data-testid="menu-container"]"#;
        pub const PRODUCT_TILE: &str = r#"[data-testid="product-list-item"]"#;
        pub const EMPTY_STATE: &str = r#"[data-testid="empty-state"]"#;
        pub const NAME: &str = r#"[data-testid="product-name"]"#;
        pub const BRAND: &str = r#"[data-testid="product-brand"]"#;
        pub const STRAIN: &str = r#"[data-testid="product-strain"]"#;
        pub const THC: &str = r#"[data-testid="product-thc"]"#;
        pub const CBD: &str = r#"[data-testid="product-cbd"]"#;
        pub const SIZE: &str = r#"[data-testid="product-weight"]"#;
        pub const PRICE: &str = r#"[data-testid="product-price"]"#;
        pub const PROMO: &str = r#"[data-testid="product-special"]"#;
        pub const STOCK: &str = r#"[data-testid="product-stock"]"#;
        pub const LINK: &str = "a[href]";
        pub const PAGE_COUNT: &str = "[data-total-pages]";
        pub const PAGE_COUNT_ATTRIBUTE: &str = "data-total-pages";
        pub const STATE_SCRIPT: &str = r#"script#__NEXT_DATA__, script[type="application/json"]"#;
        pub const STATE_PAGE_COUNT_KEY: &str = "totalPages";
        pub const NEXT_PAGE: &str = r#"[data-testid="pagination-next"], a[rel="next"]"#;
        pub const DETAIL_ROOT: &str = r#"[data-testid="product-detail"]"#;
    }
}
