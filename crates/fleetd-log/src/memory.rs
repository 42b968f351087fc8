use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fleetd_domain::LoggedEnvelope;
use tokio::sync::Mutex;

use crate::error::LogError;
use crate::seam::{EnvelopeConsumer, EnvelopePublisher, MessageAck, PulledMessage};

/// In-memory log for tests: a queue with nak-driven redelivery.
///
/// At-least-once like the real thing — a nak'd message goes back to the
/// front of the queue and is fetched again.
#[derive(Clone, Default)]
pub struct InMemoryLog {
    queue: Arc<Mutex<VecDeque<Bytes>>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently waiting for delivery (excludes in-flight ones).
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }
}

#[async_trait]
impl EnvelopePublisher for InMemoryLog {
    async fn publish(&self, envelope: &LoggedEnvelope) -> Result<(), LogError> {
        let payload = serde_json::to_vec(envelope)?;
        self.queue.lock().await.push_back(payload.into());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}

struct InMemoryAck {
    queue: Arc<Mutex<VecDeque<Bytes>>>,
    payload: Bytes,
}

#[async_trait]
impl MessageAck for InMemoryAck {
    async fn ack(&self) -> Result<(), LogError> {
        Ok(())
    }

    async fn nak(&self) -> Result<(), LogError> {
        self.queue.lock().await.push_front(self.payload.clone());
        Ok(())
    }
}

#[async_trait]
impl EnvelopeConsumer for InMemoryLog {
    async fn fetch(
        &self,
        max_messages: usize,
        _max_wait: Duration,
    ) -> Result<Vec<PulledMessage>, LogError> {
        let mut queue = self.queue.lock().await;
        let mut messages = Vec::new();
        while messages.len() < max_messages {
            let Some(payload) = queue.pop_front() else { break };
            messages.push(PulledMessage::new(
                payload.clone(),
                Box::new(InMemoryAck {
                    queue: self.queue.clone(),
                    payload,
                }),
            ));
        }
        Ok(messages)
    }
}
