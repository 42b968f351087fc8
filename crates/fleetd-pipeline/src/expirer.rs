use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleetd_store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::PipelineMetrics;

/// How often the bulk pending-to-expired pass runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Transitions pending commands whose ttl has elapsed, in bulk, via one
/// conditional update per sweep.
pub struct CommandExpirer {
    store: Arc<dyn Store>,
    metrics: Arc<PipelineMetrics>,
}

impl CommandExpirer {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { store, metrics }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("command expirer started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
                _ = cancel.cancelled() => {
                    debug!("command expirer shutting down");
                    return;
                }
            }
            self.sweep_once().await;
        }
    }

    pub async fn sweep_once(&self) {
        match self.store.expire_commands(Utc::now()).await {
            Ok(0) => {}
            Ok(count) => {
                self.metrics.commands_expired.inc_by(count);
                info!(count, "commands expired");
            }
            Err(e) => warn!(error = %e, "expiry sweep failed"),
        }
    }
}
