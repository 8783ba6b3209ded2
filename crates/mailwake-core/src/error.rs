//! Error types for config loading and dedup persistence.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("`{0}` must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("account #{index}: {detail}")]
    InvalidAccount { index: usize, detail: String },

    #[error("no valid accounts configured")]
    NoAccounts,

    #[error("no config file found (searched: {0})")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum DedupStoreError {
    #[error("dedup store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dedup store is not valid json: {0}")]
    Parse(#[from] serde_json::Error),
}
