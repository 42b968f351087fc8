use std::sync::Arc;
use std::time::Duration;

use fleetd_domain::{Capability, RegisterRequest, RegisterResponse};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cloud::CloudWriter;
use crate::error::AgentError;
use crate::state::ConfigHandle;

const BASE_BACKOFF: Duration = Duration::from_secs(2);

/// How often the background loop checks whether a 401 has been observed and
/// a re-registration is needed.
const RECHECK: Duration = Duration::from_secs(30);

/// Device onboarding: one-time registration on first start, plus
/// re-registration whenever the cloud writer sees the token rejected.
pub struct Registrar {
    client: reqwest::Client,
    config: ConfigHandle,
    capabilities: Vec<Capability>,
    cloud: Arc<CloudWriter>,
}

impl Registrar {
    pub fn new(
        client: reqwest::Client,
        config: ConfigHandle,
        capabilities: Vec<Capability>,
        cloud: Arc<CloudWriter>,
    ) -> Self {
        Self { client, config, capabilities, cloud }
    }

    /// First-start path: a no-op when a token is already stored.
    /// A conflict is terminal; the caller must treat it as fatal.
    pub async fn ensure_registered(&self) -> Result<(), AgentError> {
        if self.config.read().await.auth_token.is_some() {
            return Ok(());
        }
        self.register_with_backoff().await
    }

    async fn register_with_backoff(&self) -> Result<(), AgentError> {
        let retry = self.config.read().await.retry;
        let max_backoff = Duration::from_secs(retry.max_backoff_seconds);
        let mut backoff = BASE_BACKOFF;

        for attempt in 1..=retry.max_retries {
            match self.register_once().await {
                Ok(()) => return Ok(()),
                Err(AgentError::RegistrationConflict) => {
                    error!("registration conflict; operator intervention required");
                    return Err(AgentError::RegistrationConflict);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "registration attempt failed");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = backoff.mul_f64(retry.backoff_multiplier).min(max_backoff);
        }
        Err(AgentError::RegistrationFailed(retry.max_retries))
    }

    async fn register_once(&self) -> Result<(), AgentError> {
        let config = self.config.read().await;
        let request = RegisterRequest {
            device_id: config.device_id,
            hostname: hostname(),
            capabilities: self.capabilities.clone(),
            agent_version: crate::agent_version().to_string(),
        };
        let url = format!(
            "{}/v1/agents/register",
            config.api_endpoint.trim_end_matches('/')
        );

        let response = self.client.post(&url).json(&request).send().await?;
        match response.status() {
            s if s.is_success() => {
                let body: RegisterResponse = response.json().await?;
                // Persist before the next request: a token that exists only
                // in memory is lost on crash and the device can't re-auth.
                self.config
                    .update(|c| c.auth_token = Some(body.auth_token.clone()))
                    .await?;
                self.cloud.clear_auth_failed();
                info!(
                    device_id = %config.device_id,
                    policy_version = body.policy_version,
                    "device registered"
                );
                Ok(())
            }
            StatusCode::CONFLICT => Err(AgentError::RegistrationConflict),
            s => {
                let message = response.text().await.unwrap_or_default();
                Err(AgentError::Rejected { status: s.as_u16(), message })
            }
        }
    }

    /// Background loop: watch for rejected tokens and rotate by
    /// re-registering. The server rotates silently for a known device_id.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(RECHECK) => {}
                _ = cancel.cancelled() => return,
            }

            if !self.cloud.auth_failed() {
                continue;
            }
            info!("auth token rejected; re-registering");
            match self.register_with_backoff().await {
                Ok(()) => {}
                Err(AgentError::RegistrationConflict) => {
                    // Terminal: stop trying, keep the agent alive so the
                    // local writer and operator tooling still work.
                    error!("re-registration conflict; giving up until restart");
                    return;
                }
                Err(e) => warn!(error = %e, "re-registration failed; will retry"),
            }
        }
    }
}

fn hostname() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string())
}
