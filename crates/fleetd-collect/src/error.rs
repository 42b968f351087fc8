use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("probe failed: {0}")]
    Probe(String),

    #[error("probe unavailable on this platform: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
