//! HTTP substrate for server-rendered menu pages
//!
//! Each context keeps the last loaded page so `read_content` and
//! `Activate` navigation work against it. Derived contexts share the root
//! context's client and cookie store, so a confirmed age gate carries over.
//! Activation follows an element's `href`, or submits the enclosing form.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::direct::NotKeyed};
use reqwest::{
    Client, Method,
    header::{HeaderMap, HeaderValue, USER_AGENT},
};
use scraper::{ElementRef, Html, Selector};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use super::config::SiteConfig;
use super::substrate::{BrowserSubstrate, NavTarget, SubstrateError};

/// HTTP client settings for the substrate
#[derive(Debug, Clone)]
pub struct HttpSubstrateConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
}

impl From<&SiteConfig> for HttpSubstrateConfig {
    fn from(site: &SiteConfig) -> Self {
        Self {
            user_agent: site.user_agent.clone(),
            timeout_seconds: site.request_timeout_secs,
            max_requests_per_second: site.requests_per_second,
        }
    }
}

pub struct HttpSubstrate {
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    headers: HeaderMap,
    timeout: Duration,
}

#[derive(Debug, Clone)]
struct LoadedPage {
    url: Url,
    body: String,
}

/// Browsing context: a cookie-carrying client plus the current page
pub struct HttpContext {
    client: Client,
    page: Mutex<Option<LoadedPage>>,
}

/// Request an activated element resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Activation {
    Follow(Url),
    Submit {
        method: Method,
        action: Url,
        fields: Vec<(String, String)>,
    },
}

impl HttpSubstrate {
    pub fn new(config: &HttpSubstrateConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second).context("Rate limit must be greater than 0")?,
        );

        Ok(Self {
            rate_limiter: RateLimiter::direct(quota),
            headers,
            timeout: Duration::from_secs(config.timeout_seconds),
        })
    }

    fn build_client(&self) -> Result<Client, SubstrateError> {
        Client::builder()
            .timeout(self.timeout)
            .default_headers(self.headers.clone())
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| SubstrateError::navigation("client", e.to_string()))
    }

    async fn load(&self, ctx: &HttpContext, request: reqwest::RequestBuilder, target: &str) -> Result<(), SubstrateError> {
        self.rate_limiter.until_ready().await;
        debug!("🌐 Navigating: {}", target);

        let response = request
            .send()
            .await
            .map_err(|e| SubstrateError::navigation(target, e.to_string()))?;
        let status = response.status();
        let url = response.url().clone();
        if !status.is_success() {
            return Err(SubstrateError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let body = response
            .text()
            .await
            .map_err(|e| SubstrateError::navigation(target, format!("failed to read body: {e}")))?;

        debug!("✅ Loaded {} ({} bytes)", url, body.len());
        *ctx.page.lock().await = Some(LoadedPage { url, body });
        Ok(())
    }
}

#[async_trait]
impl BrowserSubstrate for HttpSubstrate {
    type Context = HttpContext;

    async fn open_context(&self, parent: Option<&HttpContext>) -> Result<HttpContext, SubstrateError> {
        let client = match parent {
            Some(parent) => parent.client.clone(),
            None => self.build_client()?,
        };
        Ok(HttpContext {
            client,
            page: Mutex::new(None),
        })
    }

    async fn navigate(&self, ctx: &HttpContext, target: NavTarget) -> Result<(), SubstrateError> {
        match target {
            NavTarget::Url(raw) => {
                let url = Url::parse(&raw).map_err(|e| SubstrateError::InvalidUrl {
                    url: raw.clone(),
                    message: e.to_string(),
                })?;
                let request = ctx.client.get(url);
                self.load(ctx, request, &raw).await
            }
            NavTarget::Activate(selector) => {
                let page = ctx.page.lock().await.clone().ok_or(SubstrateError::NoPageLoaded)?;
                match plan_activation(&page, &selector)? {
                    Activation::Follow(url) => {
                        let target = url.to_string();
                        self.load(ctx, ctx.client.get(url), &target).await
                    }
                    Activation::Submit { method, action, fields } => {
                        let target = action.to_string();
                        let request = if method == Method::POST {
                            ctx.client.post(action).form(&fields)
                        } else {
                            ctx.client.get(action).query(&fields)
                        };
                        self.load(ctx, request, &target).await
                    }
                }
            }
        }
    }

    async fn read_content(&self, ctx: &HttpContext) -> Result<String, SubstrateError> {
        ctx.page
            .lock()
            .await
            .as_ref()
            .map(|page| page.body.clone())
            .ok_or(SubstrateError::NoPageLoaded)
    }
}

fn parse_selector(css: &str) -> Result<Selector, SubstrateError> {
    Selector::parse(css).map_err(|_| SubstrateError::InvalidSelector {
        selector: css.to_string(),
    })
}

fn resolve(base: &Url, href: &str) -> Result<Url, SubstrateError> {
    base.join(href).map_err(|e| SubstrateError::InvalidUrl {
        url: href.to_string(),
        message: e.to_string(),
    })
}

/// Works out what activating the first element matching `css` requests.
/// Synchronous so the parsed document never lives across an await.
fn plan_activation(page: &LoadedPage, css: &str) -> Result<Activation, SubstrateError> {
    let selector = parse_selector(css)?;
    let document = Html::parse_document(&page.body);
    let element = document
        .select(&selector)
        .next()
        .ok_or_else(|| SubstrateError::MissingElement {
            selector: css.to_string(),
        })?;

    if let Some(href) = element.value().attr("href").filter(|href| !href.trim().is_empty()) {
        return Ok(Activation::Follow(resolve(&page.url, href.trim())?));
    }

    let form = element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| ancestor.value().name() == "form")
        .ok_or_else(|| SubstrateError::navigation(css, "element has no href and no enclosing form"))?;

    let action = match form.value().attr("action").map(str::trim) {
        Some(action) if !action.is_empty() => resolve(&page.url, action)?,
        _ => page.url.clone(),
    };
    let method = match form.value().attr("method") {
        Some(method) if method.eq_ignore_ascii_case("post") => Method::POST,
        _ => Method::GET,
    };

    let hidden = parse_selector(r#"input[type="hidden"]"#)?;
    let mut fields: Vec<(String, String)> = form
        .select(&hidden)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            Some((name.to_string(), input.value().attr("value").unwrap_or_default().to_string()))
        })
        .collect();
    if let Some(name) = element.value().attr("name") {
        fields.push((name.to_string(), element.value().attr("value").unwrap_or_default().to_string()));
    }

    Ok(Activation::Submit { method, action, fields })
}
