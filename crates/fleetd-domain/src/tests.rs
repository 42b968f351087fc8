use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use serde_json::json;

use crate::types::*;

fn envelope_with(metrics: BTreeMap<MetricName, serde_json::Value>) -> Envelope {
    Envelope {
        device_id: DeviceId::generate(),
        agent_version: "1.0.0".into(),
        collected_at: Utc::now(),
        seq: 1,
        metrics,
        tags: None,
    }
}

#[test]
fn envelope_without_metrics_is_valid() {
    // Collector failures become omissions; an envelope with no metrics at all
    // still carries identity, time and seq, and is accepted.
    let env = envelope_with(BTreeMap::new());
    assert!(env.validate(Utc::now()).is_ok());
}

#[test]
fn envelope_rejects_future_collected_at() {
    let mut env = envelope_with(BTreeMap::new());
    let now = Utc::now();
    env.collected_at = now + Duration::seconds(MAX_CLOCK_SKEW_SECONDS + 5);
    assert!(env.validate(now).is_err());

    // Within the skew bound is fine.
    env.collected_at = now + Duration::seconds(MAX_CLOCK_SKEW_SECONDS - 5);
    assert!(env.validate(now).is_ok());
}

#[test]
fn envelope_validates_each_metric_payload() {
    let mut metrics = BTreeMap::new();
    metrics.insert(MetricName::CpuUtilization, json!({ "cpu_percent": 250.0 }));
    let env = envelope_with(metrics);
    assert!(env.validate(Utc::now()).is_err());
}

#[test]
fn unknown_metric_name_fails_decode() {
    let body = json!({
        "device_id": "6f9e7a4e-0f4b-4a3e-9d2e-0a2e8f1c5b7d",
        "agent_version": "1.0.0",
        "collected_at": "2026-08-01T10:00:00Z",
        "seq": 3,
        "metrics": { "gpu.temperature": {} }
    });
    assert!(serde_json::from_value::<Envelope>(body).is_err());
}

#[test]
fn envelope_round_trips_with_metric_keys() {
    let mut metrics = BTreeMap::new();
    metrics.insert(
        MetricName::MemoryUsage,
        json!({ "used_bytes": 1, "total_bytes": 2 }),
    );
    let env = envelope_with(metrics);
    let s = serde_json::to_string(&env).unwrap();
    assert!(s.contains("memory.usage"));
    let back: Envelope = serde_json::from_str(&s).unwrap();
    assert_eq!(back, env);
}

#[test]
fn logged_envelope_flattens_agent_fields() {
    let env = envelope_with(BTreeMap::new());
    let logged = LoggedEnvelope::new(env.clone(), Utc::now());
    let v = serde_json::to_value(&logged).unwrap();
    assert_eq!(v["seq"], 1);
    assert!(v["ingestion_id"].is_string());
    let back: LoggedEnvelope = serde_json::from_value(v).unwrap();
    assert_eq!(back.envelope, env);
}

#[test]
fn device_status_round_trips_as_text() {
    for s in [DeviceStatus::Active, DeviceStatus::Inactive, DeviceStatus::Offline] {
        let text = s.to_string();
        assert_eq!(text.parse::<DeviceStatus>().unwrap(), s);
    }
}
