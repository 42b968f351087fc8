use std::time::Duration;

use fleetd_domain::EffectivePolicy;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::scheduler::SchedulerHandle;
use crate::state::ConfigHandle;

/// Fixed policy poll cadence.
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic conditional fetch of the effective policy; reconfigures the
/// running scheduler and persists the config on change.
pub struct PolicyClient {
    client: reqwest::Client,
    config: ConfigHandle,
    scheduler: SchedulerHandle,
    etag: Option<String>,
}

impl PolicyClient {
    pub fn new(
        client: reqwest::Client,
        config: ConfigHandle,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self { client, config, scheduler, etag: None }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = cancel.cancelled() => return,
            }

            if let Err(e) = self.fetch_once().await {
                // Transient failures retain the current policy.
                warn!(error = %e, "policy fetch failed");
            }
        }
    }

    async fn fetch_once(&mut self) -> Result<(), AgentError> {
        let config = self.config.read().await;
        let Some(token) = config.auth_token.clone() else {
            debug!("not registered yet; skipping policy fetch");
            return Ok(());
        };
        let url = format!(
            "{}/v1/agents/{}/policy",
            config.api_endpoint.trim_end_matches('/'),
            config.device_id
        );
        drop(config);

        let mut request = self.client.get(&url).bearer_auth(&token);
        if let Some(etag) = &self.etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_MODIFIED => Ok(()),
            s if s.is_success() => {
                let header_etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                let body = response.bytes().await?;
                // A server that omits the entity tag still gets conditional
                // requests: derive one from the content.
                let etag = header_etag.unwrap_or_else(|| content_etag(&body));
                let policy: EffectivePolicy = serde_json::from_slice(&body)?;

                self.apply(&policy).await?;
                self.etag = Some(etag);
                info!(version = policy.version, "policy applied");
                Ok(())
            }
            s => {
                let message = response.text().await.unwrap_or_default();
                Err(AgentError::Rejected { status: s.as_u16(), message })
            }
        }
    }

    async fn apply(&self, policy: &EffectivePolicy) -> Result<(), AgentError> {
        if policy.config.interval_seconds > 0 {
            self.scheduler
                .set_interval(Duration::from_secs(u64::from(
                    policy.config.interval_seconds,
                )))
                .await?;
        }
        for (name, toggle) in &policy.config.metrics {
            // Unknown names are ignored inside the scheduler.
            self.scheduler
                .set_enabled(name.clone(), toggle.enabled)
                .await?;
        }

        self.config
            .update(|c| {
                if policy.config.interval_seconds > 0 {
                    c.collection_interval = policy.config.interval_seconds;
                }
                for (name, toggle) in &policy.config.metrics {
                    c.enabled_metrics.insert(name.clone(), toggle.enabled);
                }
            })
            .await?;
        Ok(())
    }
}

/// Content-derived entity tag, used when the server response carries none.
fn content_etag(body: &[u8]) -> String {
    format!("\"{:x}\"", Sha256::digest(body))
}

#[cfg(test)]
mod tests {
    use super::content_etag;

    #[test]
    fn content_etag_is_stable_and_content_sensitive() {
        let a = content_etag(b"{\"version\":1}");
        let b = content_etag(b"{\"version\":1}");
        let c = content_etag(b"{\"version\":2}");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
