use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetd_log::EnvelopePublisher;
use fleetd_store::Store;
use prometheus::Registry;

use crate::metrics::ApiMetrics;
use crate::ratelimit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub log: Arc<dyn EnvelopePublisher>,
    pub admin_token: Arc<String>,
    pub limiter: Arc<RateLimiter>,
    pub registry: Arc<Registry>,
    pub metrics: Arc<ApiMetrics>,
    pub started_at: DateTime<Utc>,
}
