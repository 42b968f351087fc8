pub mod admin;
pub mod app;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod ratelimit;
pub mod state;

pub use app::build_app;
pub use error::ApiError;
pub use metrics::ApiMetrics;
pub use ratelimit::RateLimiter;
pub use state::AppState;
