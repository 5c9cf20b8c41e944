//! JSON output for the dataset and run summary.

use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to serialize {path}: {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Writes `value` as pretty JSON, creating parent directories.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), OutputError> {
    let path_text = path.display().to_string();
    let json = serde_json::to_vec_pretty(value).map_err(|source| OutputError::Serialize {
        path: path_text.clone(),
        source,
    })?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|source| OutputError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    tokio::fs::write(path, &json).await.map_err(|source| OutputError::Io {
        path: path_text.clone(),
        source,
    })?;

    info!("💾 Wrote {} ({} bytes)", path_text, json.len());
    Ok(())
}
