use prometheus::{IntCounter, Registry};

/// Background-worker counters, registered against the same process registry
/// the API serves at `/metrics`.
pub struct PipelineMetrics {
    pub envelopes_written: IntCounter,
    pub envelopes_duplicate: IntCounter,
    pub envelopes_discarded: IntCounter,
    pub envelopes_redelivered: IntCounter,
    pub commands_expired: IntCounter,
    pub partitions_created: IntCounter,
    pub partitions_dropped: IntCounter,
}

impl PipelineMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let envelopes_written = IntCounter::new(
            "fleetd_envelopes_written_total",
            "History rows written by the telemetry writer",
        )?;
        let envelopes_duplicate = IntCounter::new(
            "fleetd_envelopes_duplicate_total",
            "Redelivered envelopes absorbed by the history key",
        )?;
        let envelopes_discarded = IntCounter::new(
            "fleetd_envelopes_discarded_total",
            "Envelopes dropped as undecodable or out of retention",
        )?;
        let envelopes_redelivered = IntCounter::new(
            "fleetd_envelopes_redelivered_total",
            "Envelopes negatively acknowledged for redelivery",
        )?;
        let commands_expired = IntCounter::new(
            "fleetd_commands_expired_total",
            "Commands transitioned pending to expired",
        )?;
        let partitions_created = IntCounter::new(
            "fleetd_partitions_created_total",
            "Daily telemetry partitions created",
        )?;
        let partitions_dropped = IntCounter::new(
            "fleetd_partitions_dropped_total",
            "Daily telemetry partitions dropped past retention",
        )?;

        registry.register(Box::new(envelopes_written.clone()))?;
        registry.register(Box::new(envelopes_duplicate.clone()))?;
        registry.register(Box::new(envelopes_discarded.clone()))?;
        registry.register(Box::new(envelopes_redelivered.clone()))?;
        registry.register(Box::new(commands_expired.clone()))?;
        registry.register(Box::new(partitions_created.clone()))?;
        registry.register(Box::new(partitions_dropped.clone()))?;

        Ok(Self {
            envelopes_written,
            envelopes_duplicate,
            envelopes_discarded,
            envelopes_redelivered,
            commands_expired,
            partitions_created,
            partitions_dropped,
        })
    }
}
