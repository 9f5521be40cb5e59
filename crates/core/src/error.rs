use probe::ProbeError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = SiftError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SiftError {
    #[error("config error: {0}")]
    Config(String),

    #[error("probe failed for {path}: {cause}")]
    ProbeFailure {
        path: PathBuf,
        #[source]
        cause: ProbeError,
    },

    #[error("cache entry for {path} is corrupt: {reason}")]
    CacheCorruption { path: PathBuf, reason: String },

    #[error("cannot plan {path}: {reason}")]
    Planning { path: PathBuf, reason: String },

    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl SiftError {
    /// Errors that abort the whole run rather than a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SiftError::Config(_) | SiftError::Storage(_))
    }

    pub fn config(msg: impl Into<String>) -> Self {
        SiftError::Config(msg.into())
    }
}

impl From<config::ConfigError> for SiftError {
    fn from(e: config::ConfigError) -> Self {
        SiftError::Config(e.to_string())
    }
}
