//! # Crawling Module
//!
//! The extraction pipeline and its parts:
//! - `gate`: session acquisition behind the age gate
//! - `scheduler`: per-category pagination as a lazy work stream
//! - `fetcher`: structural wait and extraction of one work item
//! - `normalizer` / `dedup`: pure record cleanup and merging
//! - `aggregator`: the run's only shared mutable state
//! - `retry`: bounded exponential backoff
//! - `pipeline`: worker pool and coordinator

pub mod aggregator;
pub mod dedup;
pub mod errors;
pub mod fetcher;
pub mod filters;
pub mod gate;
pub mod normalizer;
pub mod page;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod wait;

pub use aggregator::{FinalizedRun, Resolution, ResultAggregator};
pub use dedup::{merge, merge_all};
pub use errors::{AccumulateError, FetchError, FetchErrorKind, FinalizeError, GateError, PipelineError};
pub use fetcher::{FetchedPage, ProductFetcher};
pub use gate::{GatePolicy, SessionGate};
pub use normalizer::normalize;
pub use page::{ListingState, PageMarkup, PaginationSignal};
pub use pipeline::{ExtractionPipeline, RunReport};
pub use retry::{RetryController, RetryDecision};
pub use scheduler::{CategoryScheduler, PageOutcome, Schedule};
pub use wait::{WaitPolicy, wait_for};
