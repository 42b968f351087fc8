pub mod cloud;
pub mod command_client;
pub mod error;
pub mod policy_client;
pub mod registrar;
pub mod scheduler;
pub mod state;
pub mod writer;

pub use error::AgentError;
pub use state::ConfigHandle;

/// Per-request deadline for every agent HTTP call.
pub const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// HTTP client shared by the agent's network tasks. TLS 1.2 is the floor;
/// rustls refuses anything older.
pub fn http_client() -> Result<reqwest::Client, AgentError> {
    Ok(reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("fleetd-agent/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

pub fn agent_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
