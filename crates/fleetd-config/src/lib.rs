pub mod agent;
pub mod error;
pub mod server;

pub use agent::{AgentConfig, RetryConfig};
pub use error::ConfigError;
pub use server::{LogFormat, ServerConfig};
