//! # Browser Substrate
//!
//! The pipeline only needs three things from whatever renders the menu:
//! open a context, navigate it, read what it currently shows. Waiting for a
//! structural condition is built on top of `read_content` by the crawling
//! layer, so implementations never sleep on their own.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Where a navigation goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavTarget {
    /// Load an absolute URL
    Url(String),
    /// Activate the first element matching a CSS selector (button, link)
    Activate(String),
}

impl fmt::Display for NavTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "url {url}"),
            Self::Activate(selector) => write!(f, "activate {selector}"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubstrateError {
    #[error("Navigation failed for {target}: {message}")]
    Navigation { target: String, message: String },

    #[error("No element matches {selector}")]
    MissingElement { selector: String },

    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Invalid selector {selector}")]
    InvalidSelector { selector: String },

    #[error("No page has been loaded in this context")]
    NoPageLoaded,
}

impl SubstrateError {
    pub fn navigation(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Navigation {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Transient failures worth another attempt
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Navigation { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::MissingElement { .. } | Self::InvalidUrl { .. } | Self::InvalidSelector { .. } | Self::NoPageLoaded => false,
        }
    }
}

/// Rendering collaborator consumed by the extraction pipeline
#[async_trait]
pub trait BrowserSubstrate: Send + Sync + 'static {
    /// Browsing context handle. Contexts derived from a parent share its
    /// session state (cookies, gate confirmation).
    type Context: Send + Sync + 'static;

    async fn open_context(&self, parent: Option<&Self::Context>) -> Result<Self::Context, SubstrateError>;

    async fn navigate(&self, ctx: &Self::Context, target: NavTarget) -> Result<(), SubstrateError>;

    /// Currently rendered markup of the context
    async fn read_content(&self, ctx: &Self::Context) -> Result<String, SubstrateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let error = SubstrateError::Http {
            status: 503,
            url: "https://menu.test".to_string(),
        };
        assert!(error.is_transient());
        let error = SubstrateError::Http {
            status: 404,
            url: "https://menu.test".to_string(),
        };
        assert!(!error.is_transient());
        assert!(!SubstrateError::NoPageLoaded.is_transient());
    }

    #[test]
    fn nav_target_display() {
        assert_eq!(NavTarget::Url("https://menu.test".into()).to_string(), "url https://menu.test");
        assert_eq!(NavTarget::Activate("#next".into()).to_string(), "activate #next");
    }
}
