use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use fleetd_domain::LoggedEnvelope;
use fleetd_log::{EnvelopeConsumer, PulledMessage};
use fleetd_store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::PipelineMetrics;

/// Max wait per pull batch.
pub const MAX_WAIT: Duration = Duration::from_secs(5);

/// Durable-log consumer that materializes envelopes into the partitioned
/// store. One logical consumer per subscription name; at-least-once input,
/// idempotent output by `(device_id, collected_at, seq)`.
pub struct TelemetryWriter {
    store: Arc<dyn Store>,
    consumer: Arc<dyn EnvelopeConsumer>,
    retention_days: u32,
    max_batch: usize,
    metrics: Arc<PipelineMetrics>,
    // Days whose partition this process has already ensured. One entry per
    // day, so this never grows meaningfully.
    ensured_days: HashSet<NaiveDate>,
}

impl TelemetryWriter {
    pub fn new(
        store: Arc<dyn Store>,
        consumer: Arc<dyn EnvelopeConsumer>,
        retention_days: u32,
        max_batch: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            store,
            consumer,
            retention_days,
            max_batch,
            metrics,
            ensured_days: HashSet::new(),
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(max_batch = self.max_batch, "telemetry writer started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("telemetry writer shutting down");
                    return;
                }
                result = self.consumer.fetch(self.max_batch, MAX_WAIT) => match result {
                    Ok(batch) => {
                        for message in batch {
                            self.process(&message).await;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "log fetch failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }
    }

    /// One message to one acknowledgement. Transient storage failures nak
    /// for redelivery; permanently bad messages are acked away so they
    /// can't wedge the subscription.
    pub async fn process(&mut self, message: &PulledMessage) {
        let envelope: LoggedEnvelope = match serde_json::from_slice(message.payload()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "undecodable envelope; discarding");
                self.metrics.envelopes_discarded.inc();
                self.ack(message).await;
                return;
            }
        };

        let day = envelope.envelope.collected_at.date_naive();
        let today = Utc::now().date_naive();
        let oldest = today - chrono::Duration::days(i64::from(self.retention_days));
        if day < oldest {
            // Out of retention: the covering partition is gone (or about to
            // be); this can never succeed, so it's a terminal reject.
            warn!(
                device_id = %envelope.envelope.device_id,
                collected_at = %envelope.envelope.collected_at,
                "envelope out of retention; discarding"
            );
            self.metrics.envelopes_discarded.inc();
            self.ack(message).await;
            return;
        }

        if !self.ensured_days.contains(&day) {
            match self.store.ensure_partition(day).await {
                Ok(created) => {
                    if created {
                        self.metrics.partitions_created.inc();
                    }
                    self.ensured_days.insert(day);
                }
                Err(e) => {
                    warn!(error = %e, day = %day, "partition ensure failed");
                    self.nak(message).await;
                    return;
                }
            }
        }

        match self.store.record_envelope(&envelope).await {
            Ok(inserted) => {
                if inserted {
                    self.metrics.envelopes_written.inc();
                } else {
                    // Redelivery absorbed by the uniqueness constraint.
                    self.metrics.envelopes_duplicate.inc();
                }
                self.ack(message).await;
            }
            Err(e) => {
                warn!(
                    device_id = %envelope.envelope.device_id,
                    error = %e,
                    "envelope write failed; requesting redelivery"
                );
                self.nak(message).await;
            }
        }
    }

    async fn ack(&self, message: &PulledMessage) {
        if let Err(e) = message.ack().await {
            warn!(error = %e, "ack failed");
        }
    }

    async fn nak(&self, message: &PulledMessage) {
        self.metrics.envelopes_redelivered.inc();
        if let Err(e) = message.nak().await {
            warn!(error = %e, "nak failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use fleetd_domain::{DeviceId, Envelope};
    use fleetd_log::{EnvelopeConsumer as _, EnvelopePublisher, InMemoryLog};
    use fleetd_store::InMemoryStore;
    use prometheus::Registry;
    use std::collections::BTreeMap;

    fn writer(
        store: Arc<InMemoryStore>,
        log: Arc<InMemoryLog>,
    ) -> (TelemetryWriter, Arc<PipelineMetrics>) {
        let metrics =
            Arc::new(PipelineMetrics::register(&Registry::new()).unwrap());
        (
            TelemetryWriter::new(store, log, 30, 100, metrics.clone()),
            metrics,
        )
    }

    fn envelope(device: DeviceId, seq: u64, age_days: i64) -> LoggedEnvelope {
        let mut metrics = BTreeMap::new();
        metrics.insert(
            fleetd_domain::MetricName::CpuUtilization,
            serde_json::json!({ "cpu_percent": 10.0 }),
        );
        LoggedEnvelope::new(
            Envelope {
                device_id: device,
                agent_version: "1.0.0".into(),
                collected_at: Utc::now() - ChronoDuration::days(age_days),
                seq,
                metrics,
                tags: None,
            },
            Utc::now(),
        )
    }

    async fn drain(writer: &mut TelemetryWriter, log: &InMemoryLog) {
        let batch = log.fetch(100, MAX_WAIT).await.unwrap();
        for message in batch {
            writer.process(&message).await;
        }
    }

    #[tokio::test]
    async fn accepted_envelope_lands_exactly_once_in_history() {
        let store = Arc::new(InMemoryStore::new());
        let log = Arc::new(InMemoryLog::new());
        let (mut writer, metrics) = writer(store.clone(), log.clone());

        let device = DeviceId::generate();
        let env = envelope(device, 1, 0);
        log.publish(&env).await.unwrap();
        // Redelivery: the same message twice.
        log.publish(&env).await.unwrap();

        drain(&mut writer, &log).await;

        let rows = store
            .history_for_device(device, Utc::now() - ChronoDuration::days(1), 100)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(metrics.envelopes_written.get(), 1);
        assert_eq!(metrics.envelopes_duplicate.get(), 1);

        let latest = store.latest_for_device(device).await.unwrap().unwrap();
        assert!(latest.envelope.collected_at >= env.envelope.collected_at);
    }

    #[tokio::test]
    async fn out_of_order_redelivery_does_not_regress_latest() {
        let store = Arc::new(InMemoryStore::new());
        let log = Arc::new(InMemoryLog::new());
        let (mut writer, _metrics) = writer(store.clone(), log.clone());

        let device = DeviceId::generate();
        let newer = envelope(device, 2, 0);
        let older = envelope(device, 1, 1);
        // Delivered newest-first, as a redelivery storm might.
        log.publish(&newer).await.unwrap();
        log.publish(&older).await.unwrap();

        drain(&mut writer, &log).await;

        let latest = store.latest_for_device(device).await.unwrap().unwrap();
        assert_eq!(latest.envelope.seq, 2);

        let rows = store
            .history_for_device(device, Utc::now() - ChronoDuration::days(7), 100)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn out_of_retention_envelope_discarded_not_redelivered() {
        let store = Arc::new(InMemoryStore::new());
        let log = Arc::new(InMemoryLog::new());
        let (mut writer, metrics) = writer(store.clone(), log.clone());

        let device = DeviceId::generate();
        log.publish(&envelope(device, 1, 45)).await.unwrap();

        drain(&mut writer, &log).await;

        assert_eq!(metrics.envelopes_discarded.get(), 1);
        assert_eq!(log.pending().await, 0); // acked away, not nak'd
        let rows = store
            .history_for_device(device, Utc::now() - ChronoDuration::days(365), 100)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn undecodable_message_discarded() {
        let store = Arc::new(InMemoryStore::new());
        let log = Arc::new(InMemoryLog::new());
        let (mut writer, metrics) = writer(store, log.clone());

        let garbage = fleetd_log::PulledMessage::new(
            bytes::Bytes::from_static(b"not json"),
            Box::new(NoopAck),
        );
        writer.process(&garbage).await;
        assert_eq!(metrics.envelopes_discarded.get(), 1);
        assert_eq!(metrics.envelopes_written.get(), 0);
    }

    struct NoopAck;

    #[async_trait::async_trait]
    impl fleetd_log::MessageAck for NoopAck {
        async fn ack(&self) -> Result<(), fleetd_log::LogError> {
            Ok(())
        }
        async fn nak(&self) -> Result<(), fleetd_log::LogError> {
            Ok(())
        }
    }
}
