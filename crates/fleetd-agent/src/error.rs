use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] fleetd_config::ConfigError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The server reports this device_id as registered without returning a
    /// token. Requires operator intervention; retrying cannot help.
    #[error("device already registered and no token issued; operator intervention required")]
    RegistrationConflict,

    #[error("registration failed after {0} attempts")]
    RegistrationFailed(u32),

    #[error("server rejected request: {status} {message}")]
    Rejected { status: u16, message: String },

    #[error("scheduler is not running")]
    SchedulerUnavailable,
}
