//! Menu extractor runner
//!
//! Loads configuration (file from `MENU_EXTRACTOR_CONFIG_PATH`, then
//! `MENU_EXTRACTOR_*` environment overrides), runs one extraction against
//! the live menu, and writes the dataset and run summary as JSON. Both files
//! are written even when the run fails, so the summary can say what failed.

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

use menu_extractor_lib::crawling::{ExtractionPipeline, RunReport};
use menu_extractor_lib::infrastructure::config::{ExtractorConfig, defaults};
use menu_extractor_lib::infrastructure::{HttpSubstrate, HttpSubstrateConfig, init_logging, write_json};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var(defaults::CONFIG_PATH_ENV)
        .map_or_else(|_| PathBuf::from(defaults::CONFIG_PATH), PathBuf::from);
    let config = ExtractorConfig::load(Some(&config_path))
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    init_logging(&config.logging).context("initializing logging")?;
    info!("🌿 Menu extractor starting for {}", config.site.entry_url());

    let substrate = Arc::new(
        HttpSubstrate::new(&HttpSubstrateConfig::from(&config.site)).context("building HTTP substrate")?,
    );
    let pipeline = ExtractionPipeline::new(config.clone(), substrate).context("compiling page markup")?;
    let aggregator = pipeline.new_aggregator();

    let outcome = pipeline.run(Arc::clone(&aggregator)).await;
    let report = match &outcome {
        Ok(report) => report.clone(),
        Err(run_error) => {
            error!("❌ Extraction failed: {}", run_error);
            let (dataset, summary) = aggregator
                .finalize()
                .await
                .context("finalizing the failed run")?;
            RunReport { dataset, summary }
        }
    };

    write_json(Path::new(&config.output.dataset_path), &report.dataset)
        .await
        .with_context(|| format!("writing dataset to {}", config.output.dataset_path))?;
    write_json(Path::new(&config.output.summary_path), &report.summary)
        .await
        .with_context(|| format!("writing run summary to {}", config.output.summary_path))?;
    info!(
        "💾 Wrote {} records to {} and the summary to {}",
        report.dataset.len(),
        config.output.dataset_path,
        config.output.summary_path
    );

    outcome.map(|_| ()).context("extraction run")
}
