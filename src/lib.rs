//! Menu Extractor - dispensary menu catalog extraction
//!
//! Extracts complete product catalogs from a JavaScript-rendered dispensary
//! menu behind an age gate, and assembles them into a normalized,
//! deduplicated dataset with a run summary.

pub mod crawling;
pub mod domain;
pub mod infrastructure;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crawling::{ExtractionPipeline, PipelineError, ResultAggregator, RunReport};
pub use domain::{NormalizedRecord, RunSummary};
pub use infrastructure::{ExtractorConfig, HttpSubstrate};
