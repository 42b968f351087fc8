use std::time::Duration;

use async_nats::jetstream::consumer::{pull, AckPolicy, PullConsumer};
use async_nats::jetstream::{self, stream, AckKind, Context};
use async_trait::async_trait;
use fleetd_domain::LoggedEnvelope;
use futures_util::StreamExt;
use tracing::{debug, info};

use crate::error::LogError;
use crate::seam::{EnvelopeConsumer, EnvelopePublisher, MessageAck, PulledMessage};
use crate::{STREAM_NAME, SUBJECT};

/// Durable log backed by NATS JetStream.
///
/// One file-backed stream (`TELEMETRY`, subject `telemetry.ingest`) and a
/// named durable pull consumer. Single replica; operators may raise
/// replication on the stream without any change here.
pub struct JetStreamLog {
    client: async_nats::Client,
    context: Context,
    consumer: PullConsumer,
}

impl JetStreamLog {
    /// Connect, ensure the stream exists, and bind the durable consumer.
    pub async fn connect(url: &str, consumer_name: &str) -> Result<Self, LogError> {
        info!(url = %url, "connecting to durable log");
        let client = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .connect(url)
            .await
            .map_err(|e| LogError::Connect(e.to_string()))?;

        let context = jetstream::new(client.clone());
        let stream = context
            .get_or_create_stream(stream::Config {
                name: STREAM_NAME.to_string(),
                subjects: vec![SUBJECT.to_string()],
                storage: stream::StorageType::File,
                num_replicas: 1,
                ..Default::default()
            })
            .await
            .map_err(|e| LogError::Connect(format!("ensure stream: {e}")))?;

        let consumer = stream
            .get_or_create_consumer(
                consumer_name,
                pull::Config {
                    durable_name: Some(consumer_name.to_string()),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| LogError::Connect(format!("ensure consumer: {e}")))?;

        info!(stream = STREAM_NAME, consumer = consumer_name, "durable log ready");
        Ok(Self { client, context, consumer })
    }
}

#[async_trait]
impl EnvelopePublisher for JetStreamLog {
    async fn publish(&self, envelope: &LoggedEnvelope) -> Result<(), LogError> {
        let payload = serde_json::to_vec(envelope)?;
        let ack = self
            .context
            .publish(SUBJECT, payload.into())
            .await
            .map_err(|e| LogError::Publish(e.to_string()))?;
        // The 202 contract: don't report acceptance until the log has the
        // message on disk.
        ack.await.map_err(|e| LogError::Publish(e.to_string()))?;
        debug!(ingestion_id = %envelope.ingestion_id, "envelope published");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }
}

struct JetStreamAck {
    message: jetstream::Message,
}

#[async_trait]
impl MessageAck for JetStreamAck {
    async fn ack(&self) -> Result<(), LogError> {
        self.message
            .ack()
            .await
            .map_err(|e| LogError::Ack(e.to_string()))
    }

    async fn nak(&self) -> Result<(), LogError> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| LogError::Ack(e.to_string()))
    }
}

#[async_trait]
impl EnvelopeConsumer for JetStreamLog {
    async fn fetch(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<PulledMessage>, LogError> {
        let mut batch = self
            .consumer
            .batch()
            .max_messages(max_messages)
            .expires(max_wait)
            .messages()
            .await
            .map_err(|e| LogError::Consume(e.to_string()))?;

        let mut messages = Vec::new();
        while let Some(next) = batch.next().await {
            let message = next.map_err(|e| LogError::Consume(e.to_string()))?;
            let payload = message.payload.clone();
            messages.push(PulledMessage::new(
                payload,
                Box::new(JetStreamAck { message }),
            ));
        }
        Ok(messages)
    }
}
