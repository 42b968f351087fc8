use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleetd_collect::Collector;
use fleetd_domain::{DeviceId, Envelope, MetricName};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::writer::EnvelopeWriter;

/// Deadline for a single collector run. Must stay below the collection
/// interval, whose floor is 60 s.
pub const COLLECTOR_DEADLINE: Duration = Duration::from_secs(30);

/// Reconfiguration and triggering happen by message-passing into the
/// scheduler task; no shared mutable flags.
pub enum SchedulerMsg {
    /// Replace the ticker; takes effect from the next tick boundary.
    SetInterval(Duration),
    /// Flip one collector's enable bit. Unknown names are ignored.
    SetEnabled(String, bool),
    /// One out-of-band collection; does not reset the periodic clock.
    /// Replies with the metric names actually collected.
    TriggerNow {
        metrics: Option<Vec<MetricName>>,
        done: oneshot::Sender<Vec<MetricName>>,
    },
}

#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerMsg>,
}

impl SchedulerHandle {
    pub async fn set_interval(&self, interval: Duration) -> Result<(), AgentError> {
        self.tx
            .send(SchedulerMsg::SetInterval(interval))
            .await
            .map_err(|_| AgentError::SchedulerUnavailable)
    }

    pub async fn set_enabled(&self, name: String, enabled: bool) -> Result<(), AgentError> {
        self.tx
            .send(SchedulerMsg::SetEnabled(name, enabled))
            .await
            .map_err(|_| AgentError::SchedulerUnavailable)
    }

    pub async fn trigger_now(
        &self,
        metrics: Option<Vec<MetricName>>,
    ) -> Result<Vec<MetricName>, AgentError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(SchedulerMsg::TriggerNow { metrics, done })
            .await
            .map_err(|_| AgentError::SchedulerUnavailable)?;
        rx.await.map_err(|_| AgentError::SchedulerUnavailable)
    }
}

/// Periodic driver: runs enabled collectors, assembles one envelope per
/// cycle and hands it to every writer in order.
pub struct Scheduler {
    device_id: DeviceId,
    agent_version: String,
    collectors: Vec<Arc<dyn Collector>>,
    enabled: BTreeMap<MetricName, bool>,
    interval: Duration,
    writers: Vec<Arc<dyn EnvelopeWriter>>,
    seq: u64,
    rx: mpsc::Receiver<SchedulerMsg>,
}

impl Scheduler {
    pub fn new(
        device_id: DeviceId,
        agent_version: String,
        collectors: Vec<Arc<dyn Collector>>,
        enabled_metrics: &BTreeMap<String, bool>,
        interval: Duration,
        writers: Vec<Arc<dyn EnvelopeWriter>>,
    ) -> (Self, SchedulerHandle) {
        let enabled = collectors
            .iter()
            .map(|c| {
                let name = c.name();
                let on = enabled_metrics
                    .get(name.as_str())
                    .copied()
                    .unwrap_or(false);
                (name, on)
            })
            .collect();
        let (tx, rx) = mpsc::channel(16);
        (
            Self {
                device_id,
                agent_version,
                collectors,
                enabled,
                interval,
                writers,
                seq: 0,
                rx,
            },
            SchedulerHandle { tx },
        )
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        // Uniform jitter in [0, interval/10) so a fleet provisioned at the
        // same moment doesn't tick in lockstep.
        let jitter = self
            .interval
            .mul_f64(rand::thread_rng().gen_range(0.0..0.1));
        debug!(jitter_ms = jitter.as_millis() as u64, "scheduler start delay");
        tokio::select! {
            _ = tokio::time::sleep(jitter) => {}
            _ = cancel.cancelled() => return,
        }

        // First scheduled cycle one full interval after the jittered start.
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.collect_cycle(None).await;
                }
                Some(msg) = self.rx.recv() => match msg {
                    SchedulerMsg::SetInterval(interval) => {
                        if interval != self.interval {
                            info!(
                                old_seconds = self.interval.as_secs(),
                                new_seconds = interval.as_secs(),
                                "collection interval updated"
                            );
                            self.interval = interval;
                            ticker = tokio::time::interval_at(
                                Instant::now() + interval,
                                interval,
                            );
                            ticker.set_missed_tick_behavior(
                                tokio::time::MissedTickBehavior::Delay,
                            );
                        }
                    }
                    SchedulerMsg::SetEnabled(name, on) => {
                        match name.parse::<MetricName>() {
                            Ok(metric) => {
                                if self.enabled.insert(metric, on) != Some(on) {
                                    info!(metric = %metric, enabled = on, "collector toggled");
                                }
                            }
                            // Forward compatibility: a newer server may steer
                            // metrics this agent doesn't know.
                            Err(_) => debug!(metric = %name, "ignoring unknown metric"),
                        }
                    }
                    SchedulerMsg::TriggerNow { metrics, done } => {
                        let collected = self.collect_cycle(metrics).await;
                        let _ = done.send(collected);
                    }
                },
                _ = cancel.cancelled() => {
                    debug!("scheduler shutting down");
                    return;
                }
            }
        }
    }

    /// One collection cycle. `only` narrows the set (trigger-now with an
    /// explicit metric list); otherwise the enable bits decide.
    async fn collect_cycle(&mut self, only: Option<Vec<MetricName>>) -> Vec<MetricName> {
        let mut metrics = BTreeMap::new();

        for collector in &self.collectors {
            let name = collector.name();
            let selected = match &only {
                Some(list) => list.contains(&name),
                None => self.enabled.get(&name).copied().unwrap_or(false),
            };
            if !selected {
                continue;
            }

            match tokio::time::timeout(COLLECTOR_DEADLINE, collector.collect()).await {
                Ok(Ok(payload)) => {
                    metrics.insert(name, payload);
                }
                // A failed probe is an omission, never a failed envelope.
                Ok(Err(e)) => warn!(metric = %name, error = %e, "collector failed"),
                Err(_) => warn!(metric = %name, "collector exceeded deadline"),
            }
        }

        self.seq += 1;
        let collected: Vec<MetricName> = metrics.keys().copied().collect();
        let envelope = Envelope {
            device_id: self.device_id,
            agent_version: self.agent_version.clone(),
            collected_at: Utc::now(),
            seq: self.seq,
            metrics,
            tags: None,
        };

        for writer in &self.writers {
            if let Err(e) = writer.write(&envelope).await {
                warn!(writer = writer.name(), error = %e, "writer failed");
            }
        }

        debug!(seq = envelope.seq, metrics = collected.len(), "cycle complete");
        collected
    }
}
