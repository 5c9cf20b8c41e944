//! Infrastructure layer - configuration, logging, rendering substrates, output

pub mod config;
pub mod http_substrate;
pub mod logging;
pub mod output;
pub mod substrate;

pub use config::{ConfigError, ExtractorConfig, FilterConfig, LoggingConfig, RetryPolicy, SelectorConfig};
pub use http_substrate::{HttpContext, HttpSubstrate, HttpSubstrateConfig};
pub use logging::init_logging;
pub use output::{OutputError, write_json};
pub use substrate::{BrowserSubstrate, NavTarget, SubstrateError};
