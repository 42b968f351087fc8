use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fleetd_domain::LoggedEnvelope;

use crate::error::LogError;

/// Acknowledgement side of a pulled message. Ack removes the message from
/// the log; nak requests redelivery.
#[async_trait]
pub trait MessageAck: Send + Sync {
    async fn ack(&self) -> Result<(), LogError>;
    async fn nak(&self) -> Result<(), LogError>;
}

/// One message pulled from the durable log, payload plus its ack handle.
pub struct PulledMessage {
    payload: Bytes,
    acker: Box<dyn MessageAck>,
}

impl PulledMessage {
    pub fn new(payload: Bytes, acker: Box<dyn MessageAck>) -> Self {
        Self { payload, acker }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub async fn ack(&self) -> Result<(), LogError> {
        self.acker.ack().await
    }

    pub async fn nak(&self) -> Result<(), LogError> {
        self.acker.nak().await
    }
}

/// Write side of the durable log. `publish` returns only once the log has
/// acknowledged the message; the ingest endpoint's `202` depends on it.
#[async_trait]
pub trait EnvelopePublisher: Send + Sync + 'static {
    async fn publish(&self, envelope: &LoggedEnvelope) -> Result<(), LogError>;

    /// Cheap connectivity probe for the health endpoint.
    fn is_connected(&self) -> bool;
}

/// Read side: pull-based, batched, at-least-once. Everything downstream must
/// be idempotent by the envelope key.
#[async_trait]
pub trait EnvelopeConsumer: Send + Sync + 'static {
    /// Pull up to `max_messages`, waiting at most `max_wait`. An empty vec
    /// after `max_wait` is normal.
    async fn fetch(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<PulledMessage>, LogError>;
}
