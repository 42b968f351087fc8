use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("device not found: {0}")]
    DeviceNotFound(fleetd_domain::DeviceId),

    #[error("command not found: {0}")]
    CommandNotFound(Uuid),

    #[error("policy not found: {0}")]
    PolicyNotFound(Uuid),

    /// Acknowledgement for a command the device never claimed.
    #[error("command {command_id} is {status}, not executing")]
    CommandNotClaimed { command_id: Uuid, status: String },

    #[error("no telemetry partition covers {0}")]
    MissingPartition(chrono::NaiveDate),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}
