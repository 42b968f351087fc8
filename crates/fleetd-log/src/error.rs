use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("log connect failed: {0}")]
    Connect(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("consume failed: {0}")]
    Consume(String),

    #[error("ack failed: {0}")]
    Ack(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
