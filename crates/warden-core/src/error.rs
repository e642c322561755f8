use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the warden gating layer.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("blocklist parse error in {path}: {message}")]
    BlocklistParse { path: PathBuf, message: String },

    #[error("blocklist read error in {path}: {source}")]
    BlocklistRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream error for {url}: {message}")]
    Upstream { url: String, message: String },

    #[error("upstream timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("connection dropped: {0}")]
    Dropped(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type GateResult<T> = Result<T, GateError>;
