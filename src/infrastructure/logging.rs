//! Logging system configuration and initialization
//!
//! - Console output with UTC timestamps
//! - Optional file output through a non-blocking appender
//! - Optional structured JSON formatting
//! - `RUST_LOG` overrides the configured level
//!
//! Dependency noise (HTTP client, HTML parser internals) is suppressed
//! unless the level is `trace`.

use anyhow::{Result, anyhow};
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;

// Keeps file writers alive for the lifetime of the process
static LOG_GUARDS: Lazy<Mutex<Vec<WorkerGuard>>> = Lazy::new(|| Mutex::new(Vec::new()));

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// UTC timestamp formatter, matching the `date_captured_utc` field of records
struct UtcTimeFormatter;

impl FormatTime for UtcTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

/// Builds the filter: `RUST_LOG` if set, otherwise the configured level with
/// verbose dependencies quieted.
fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = config.level.to_lowercase();
    let directives = if level.contains("trace") {
        level
    } else {
        format!("{level},reqwest=warn,hyper=warn,hyper_util=warn,h2=warn,html5ever=warn,selectors=warn")
    };
    EnvFilter::try_new(&directives).map_err(|e| anyhow!("Invalid log level {}: {}", config.level, e))
}

/// Initialize logging with the given configuration
///
/// Calling it again after a subscriber is installed is a no-op.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if !config.console_output && !config.file_output {
        return Err(anyhow!("No logging output configured"));
    }

    let env_filter = build_env_filter(config)?;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut file_guard = None;

    if config.file_output {
        let log_dir = PathBuf::from(&config.log_dir);
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;
        let (file_writer, guard) = non_blocking(rolling::never(&log_dir, &config.file_name));
        file_guard = Some(guard);

        let file_layer = fmt::Layer::new()
            .with_writer(file_writer)
            .with_timer(UtcTimeFormatter)
            .with_ansi(false);
        if config.json_format {
            layers.push(
                file_layer
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .boxed(),
            );
        } else {
            layers.push(file_layer.with_target(false).boxed());
        }
    }

    if config.console_output {
        let console_layer = fmt::Layer::new()
            .with_writer(std::io::stdout)
            .with_timer(UtcTimeFormatter)
            .with_target(false);
        if config.json_format && !config.file_output {
            layers.push(console_layer.json().boxed());
        } else {
            layers.push(console_layer.boxed());
        }
    }

    if Registry::default().with(env_filter).with(layers).try_init().is_err() {
        // Already initialized (tests, or a second run in one process)
        return Ok(());
    }

    if let Some(guard) = file_guard {
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard registry poisoned"))?
            .push(guard);
    }

    info!("📝 Logging system initialized");
    info!("Log level: {}", config.level);
    info!("JSON format: {}", config.json_format);
    if config.file_output {
        info!("Log file: {}/{}", config.log_dir, config.file_name);
    }
    Ok(())
}
