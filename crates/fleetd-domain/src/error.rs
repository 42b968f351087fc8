use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("invalid payload for metric {metric}: {message}")]
    InvalidMetricPayload { metric: String, message: String },

    #[error("collected_at {collected_at} is more than {skew_seconds}s ahead of server time")]
    ClockSkew {
        collected_at: chrono::DateTime<chrono::Utc>,
        skew_seconds: i64,
    },

    #[error("collection interval {0}s out of range [60, 3600]")]
    InvalidInterval(u32),

    #[error("ttl_seconds {0} out of range (0, 3600]")]
    InvalidTtl(u32),

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("invalid command transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}
