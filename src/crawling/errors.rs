//! # Crawling Error Types
//!
//! Failure taxonomy of the extraction run. Page-level errors stay inside
//! their category; only gate failures and the loss of every category end
//! the run.

use std::time::Duration;
use thiserror::Error;

use super::page::MarkupError;
use crate::infrastructure::substrate::SubstrateError;

/// Session gate failures
#[derive(Error, Debug, Clone)]
pub enum GateError {
    /// The interstitial did not clear within the configured bound
    #[error("Age gate did not clear after {attempts} attempts")]
    Blocked { attempts: u32 },

    #[error("Gate navigation failed: {0}")]
    Substrate(#[from] SubstrateError),
}

impl GateError {
    /// Whether the run cannot continue without a session
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Blocked { .. } => true,
            Self::Substrate(source) => !source.is_transient(),
        }
    }
}

/// Classification consumed by the retry controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    /// Structural condition not met in time; retryable
    Timeout,
    /// Page loaded but its tile markers are gone; retried, then escalated
    StructureChanged,
    /// Session expired mid-run; the item is requeued after re-acquisition
    GateReappeared,
    /// Transient navigation or server failure; retryable
    Navigation,
    /// Bad URL, client error, missing element; not retried
    Permanent,
}

/// Product fetch failures
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("Timed out after {waited:?} waiting for {target}")]
    Timeout { target: String, waited: Duration },

    #[error("Expected product markers missing on {target}")]
    StructureChanged { target: String },

    #[error("Age gate reappeared on {target}")]
    GateReappeared { target: String },

    #[error("Session unavailable: {0}")]
    Gate(#[from] GateError),

    #[error("Substrate error: {0}")]
    Substrate(#[from] SubstrateError),
}

impl FetchError {
    #[must_use]
    pub const fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Timeout { .. } => FetchErrorKind::Timeout,
            Self::StructureChanged { .. } => FetchErrorKind::StructureChanged,
            Self::GateReappeared { .. } => FetchErrorKind::GateReappeared,
            Self::Gate(source) => {
                if source.is_fatal() {
                    FetchErrorKind::Permanent
                } else {
                    FetchErrorKind::Navigation
                }
            }
            Self::Substrate(source) => {
                if source.is_transient() {
                    FetchErrorKind::Navigation
                } else {
                    FetchErrorKind::Permanent
                }
            }
        }
    }

    /// Whether another attempt with backoff may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            FetchErrorKind::Timeout | FetchErrorKind::StructureChanged | FetchErrorKind::Navigation
        )
    }

    /// Gate failure that must stop the whole run
    #[must_use]
    pub const fn fatal_gate_error(&self) -> Option<&GateError> {
        match self {
            Self::Gate(source) if source.is_fatal() => Some(source),
            _ => None,
        }
    }
}

/// `finalize` called before every scheduled work item resolved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FinalizeError {
    #[error("Run is incomplete: {pending} scheduled work items have not resolved")]
    IncompleteRun { pending: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccumulateError {
    #[error("Cannot accumulate into a finalized run")]
    AlreadyFinalized,
}

/// Run-level failures returned by the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Run aborted: {0}")]
    Gate(#[from] GateError),

    #[error("Page markup configuration is invalid: {0}")]
    Markup(#[from] MarkupError),

    #[error("All {attempted} categories failed")]
    AllCategoriesFailed { attempted: usize },

    #[error(transparent)]
    Finalize(#[from] FinalizeError),

    #[error(transparent)]
    Accumulate(#[from] AccumulateError),

    #[error("Worker task failed: {0}")]
    Worker(String),
}
