use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetd_domain::Envelope;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::state::ConfigHandle;
use crate::writer::EnvelopeWriter;

/// Bound on the store-and-forward queue. On overflow the oldest entry is
/// evicted; backpressure, not unbounded memory.
pub const MAX_QUEUE_ENTRIES: usize = 100;

/// Bodies above this size are gzip-compressed on the wire.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// First retry delay; grows by the configured multiplier per attempt.
const BASE_BACKOFF: Duration = Duration::from_secs(5);

/// How often the background drain loop wakes to look for due entries.
const DRAIN_WAKE: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct RetryEntry {
    envelope: Envelope,
    attempts: u32,
    next_attempt: Instant,
}

enum SendOutcome {
    Accepted,
    /// 4xx other than 401/429: the envelope is wrong, retrying can't fix it.
    DropClient(StatusCode),
    /// 401: token no longer valid; surface for re-registration.
    DropAuth,
    /// 429, 5xx, transport failure.
    Retry,
}

/// HTTP writer with a bounded in-memory retry queue.
///
/// `write` posts once and enqueues on retryable failure; a background drain
/// loop retries due entries FIFO with exponential backoff.
pub struct CloudWriter {
    client: reqwest::Client,
    config: ConfigHandle,
    queue: Mutex<VecDeque<RetryEntry>>,
    auth_failed: AtomicBool,
}

impl CloudWriter {
    pub fn new(client: reqwest::Client, config: ConfigHandle) -> Arc<Self> {
        Arc::new(Self {
            client,
            config,
            queue: Mutex::new(VecDeque::new()),
            auth_failed: AtomicBool::new(false),
        })
    }

    /// True once a 401 was observed; cleared by the registrar after it
    /// rotates the token.
    pub fn auth_failed(&self) -> bool {
        self.auth_failed.load(Ordering::Relaxed)
    }

    pub fn clear_auth_failed(&self) {
        self.auth_failed.store(false, Ordering::Relaxed);
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    fn backoff(&self, multiplier: f64, max_backoff: Duration, attempts: u32) -> Duration {
        let factor = multiplier.powi(attempts as i32);
        BASE_BACKOFF.mul_f64(factor).min(max_backoff)
    }

    async fn send_once(&self, envelope: &Envelope) -> Result<SendOutcome, AgentError> {
        let config = self.config.read().await;
        let Some(token) = config.auth_token else {
            // Not registered yet; keep the envelope for after registration.
            return Ok(SendOutcome::Retry);
        };

        let url = format!(
            "{}/v1/agents/{}/inventory",
            config.api_endpoint.trim_end_matches('/'),
            envelope.device_id
        );
        let body = serde_json::to_vec(envelope)?;

        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .header(CONTENT_TYPE, "application/json");

        if body.len() > COMPRESSION_THRESHOLD {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body).map_err(|e| AgentError::Io {
                path: url.clone(),
                source: e,
            })?;
            let compressed = encoder.finish().map_err(|e| AgentError::Io {
                path: url.clone(),
                source: e,
            })?;
            request = request.header(CONTENT_ENCODING, "gzip").body(compressed);
        } else {
            request = request.body(body);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "inventory post failed");
                return Ok(SendOutcome::Retry);
            }
        };

        let status = response.status();
        Ok(match status {
            s if s.is_success() => SendOutcome::Accepted,
            StatusCode::UNAUTHORIZED => SendOutcome::DropAuth,
            StatusCode::TOO_MANY_REQUESTS => SendOutcome::Retry,
            s if s.is_client_error() => SendOutcome::DropClient(s),
            _ => SendOutcome::Retry,
        })
    }

    async fn enqueue(&self, envelope: Envelope, attempts: u32, next_attempt: Instant) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= MAX_QUEUE_ENTRIES {
            if let Some(evicted) = queue.pop_front() {
                warn!(
                    seq = evicted.envelope.seq,
                    "retry queue full, evicting oldest envelope"
                );
            }
        }
        queue.push_back(RetryEntry { envelope, attempts, next_attempt });
    }

    async fn handle_outcome(
        &self,
        envelope: Envelope,
        attempts: u32,
        outcome: SendOutcome,
    ) -> bool {
        match outcome {
            SendOutcome::Accepted => {
                debug!(seq = envelope.seq, "envelope accepted");
                true
            }
            SendOutcome::DropClient(status) => {
                warn!(seq = envelope.seq, status = %status, "envelope rejected, dropping");
                true
            }
            SendOutcome::DropAuth => {
                warn!(seq = envelope.seq, "auth token rejected, dropping envelope");
                self.auth_failed.store(true, Ordering::Relaxed);
                true
            }
            SendOutcome::Retry => {
                let retry = self.config.read().await.retry;
                let delay = self.backoff(
                    retry.backoff_multiplier,
                    Duration::from_secs(retry.max_backoff_seconds),
                    attempts,
                );
                self.enqueue(envelope, attempts + 1, Instant::now() + delay)
                    .await;
                false
            }
        }
    }

    /// Background loop: every wake, retry all due entries in FIFO order.
    pub async fn run_drain_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(DRAIN_WAKE) => {}
                _ = cancel.cancelled() => {
                    debug!("cloud writer drain loop shutting down");
                    return;
                }
            }

            let now = Instant::now();
            let due: Vec<RetryEntry> = {
                let mut queue = self.queue.lock().await;
                let mut due = Vec::new();
                let mut keep = VecDeque::with_capacity(queue.len());
                while let Some(entry) = queue.pop_front() {
                    if entry.next_attempt <= now {
                        due.push(entry);
                    } else {
                        keep.push_back(entry);
                    }
                }
                *queue = keep;
                due
            };

            if due.is_empty() {
                continue;
            }
            info!(count = due.len(), "retrying queued envelopes");

            for entry in due {
                match self.send_once(&entry.envelope).await {
                    Ok(outcome) => {
                        self.handle_outcome(entry.envelope, entry.attempts, outcome)
                            .await;
                    }
                    Err(e) => {
                        warn!(error = %e, "retry send failed");
                        let retry = self.config.read().await.retry;
                        let delay = self.backoff(
                            retry.backoff_multiplier,
                            Duration::from_secs(retry.max_backoff_seconds),
                            entry.attempts,
                        );
                        self.enqueue(
                            entry.envelope,
                            entry.attempts + 1,
                            Instant::now() + delay,
                        )
                        .await;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl EnvelopeWriter for CloudWriter {
    fn name(&self) -> &'static str {
        "cloud"
    }

    async fn write(&self, envelope: &Envelope) -> Result<(), AgentError> {
        let outcome = self.send_once(envelope).await?;
        self.handle_outcome(envelope.clone(), 0, outcome).await;
        Ok(())
    }
}
