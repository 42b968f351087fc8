use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

/// Request-path counters, registered against the shared process registry.
/// Background workers register their own families in `fleetd-pipeline`.
pub struct ApiMetrics {
    pub envelopes_accepted: IntCounter,
    pub envelopes_rejected: IntCounter,
    pub registrations: IntCounter,
    pub commands_claimed: IntCounter,
    pub commands_acked: IntCounter,
    pub rate_limited: IntCounter,
}

impl ApiMetrics {
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let envelopes_accepted = IntCounter::new(
            "fleetd_envelopes_accepted_total",
            "Envelopes acknowledged with 202",
        )?;
        let envelopes_rejected = IntCounter::new(
            "fleetd_envelopes_rejected_total",
            "Envelopes rejected with 4xx",
        )?;
        let registrations = IntCounter::new(
            "fleetd_registrations_total",
            "Device registrations including re-registrations",
        )?;
        let commands_claimed = IntCounter::new(
            "fleetd_commands_claimed_total",
            "Commands handed to devices by poll",
        )?;
        let commands_acked = IntCounter::new(
            "fleetd_commands_acked_total",
            "Command acknowledgements applied",
        )?;
        let rate_limited = IntCounter::new(
            "fleetd_rate_limited_total",
            "Requests refused by the sliding-window limiter",
        )?;

        registry.register(Box::new(envelopes_accepted.clone()))?;
        registry.register(Box::new(envelopes_rejected.clone()))?;
        registry.register(Box::new(registrations.clone()))?;
        registry.register(Box::new(commands_claimed.clone()))?;
        registry.register(Box::new(commands_acked.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;

        Ok(Self {
            envelopes_accepted,
            envelopes_rejected,
            registrations,
            commands_claimed,
            commands_acked,
            rate_limited,
        })
    }
}

/// Render the registry in the Prometheus text exposition format.
pub fn render(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("metrics not utf-8: {e}")))
}
