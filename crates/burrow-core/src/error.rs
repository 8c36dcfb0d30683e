use std::path::PathBuf;
use thiserror::Error;

/// Core error type for burrow operations outside the package engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Project root not found from {start}")]
    ProjectNotFound { start: PathBuf },
}
