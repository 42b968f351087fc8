use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::DomainError;
use crate::metrics::validate_metric_payload;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    /// New random identity. Minted once by the agent on first start.
    pub fn generate() -> Self {
        DeviceId(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        Uuid::parse_str(s)
            .map(DeviceId)
            .map_err(|_| DomainError::InvalidDeviceId(s.to_string()))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Device ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Active,
    Inactive,
    Offline,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Active => write!(f, "active"),
            DeviceStatus::Inactive => write!(f, "inactive"),
            DeviceStatus::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for DeviceStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(DeviceStatus::Active),
            "inactive" => Ok(DeviceStatus::Inactive),
            "offline" => Ok(DeviceStatus::Offline),
            other => Err(DomainError::InvalidPolicy(format!(
                "unknown device status '{other}'"
            ))),
        }
    }
}

/// A collector the agent advertises it can run. Unordered set per device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: DeviceId,
    pub hostname: String,
    pub agent_version: String,
    pub group_id: Option<String>,
    pub capabilities: Vec<Capability>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: DeviceStatus,
}

impl Device {
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.name == name)
    }
}

// ── Metric names ──────────────────────────────────────────────────────────────

/// The closed set of metrics an envelope may carry. Unknown names fail
/// deserialization, which is what rejects them at the ingest boundary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum MetricName {
    #[serde(rename = "os.info")]
    OsInfo,
    #[serde(rename = "cpu.utilization")]
    CpuUtilization,
    #[serde(rename = "memory.usage")]
    MemoryUsage,
    #[serde(rename = "disk.utilization")]
    DiskUtilization,
    #[serde(rename = "software.inventory")]
    SoftwareInventory,
}

impl MetricName {
    pub const ALL: [MetricName; 5] = [
        MetricName::OsInfo,
        MetricName::CpuUtilization,
        MetricName::MemoryUsage,
        MetricName::DiskUtilization,
        MetricName::SoftwareInventory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::OsInfo => "os.info",
            MetricName::CpuUtilization => "cpu.utilization",
            MetricName::MemoryUsage => "memory.usage",
            MetricName::DiskUtilization => "disk.utilization",
            MetricName::SoftwareInventory => "software.inventory",
        }
    }
}

impl std::fmt::Display for MetricName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MetricName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "os.info" => Ok(MetricName::OsInfo),
            "cpu.utilization" => Ok(MetricName::CpuUtilization),
            "memory.usage" => Ok(MetricName::MemoryUsage),
            "disk.utilization" => Ok(MetricName::DiskUtilization),
            "software.inventory" => Ok(MetricName::SoftwareInventory),
            other => Err(DomainError::UnknownMetric(other.to_string())),
        }
    }
}

// ── Telemetry envelope ────────────────────────────────────────────────────────

/// How far ahead of server time an agent's `collected_at` may be.
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 60;

/// One sampling cycle's output, as produced by the agent scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub device_id: DeviceId,
    pub agent_version: String,
    pub collected_at: DateTime<Utc>,
    /// Monotonic per agent process. `(device_id, collected_at, seq)` is the
    /// history key, so replays are idempotent downstream.
    pub seq: u64,
    pub metrics: BTreeMap<MetricName, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl Envelope {
    /// Server-side acceptance check: bounded clock skew plus per-metric
    /// payload shape validation. Metric names are already constrained by the
    /// [`MetricName`] enum at decode time.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.collected_at > now + Duration::seconds(MAX_CLOCK_SKEW_SECONDS) {
            return Err(DomainError::ClockSkew {
                collected_at: self.collected_at,
                skew_seconds: MAX_CLOCK_SKEW_SECONDS,
            });
        }
        for (name, payload) in &self.metrics {
            validate_metric_payload(*name, payload)?;
        }
        Ok(())
    }
}

/// An envelope as published to the durable log: the agent's envelope plus the
/// server-assigned identity and receipt time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedEnvelope {
    pub ingestion_id: Uuid,
    pub server_received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub envelope: Envelope,
}

impl LoggedEnvelope {
    pub fn new(envelope: Envelope, server_received_at: DateTime<Utc>) -> Self {
        Self {
            ingestion_id: Uuid::new_v4(),
            server_received_at,
            envelope,
        }
    }
}

// ── Wire bodies ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub device_id: DeviceId,
    pub hostname: String,
    pub capabilities: Vec<Capability>,
    pub agent_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub device_id: DeviceId,
    pub auth_token: String,
    pub policy_version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub ingestion_id: Uuid,
    pub status: String,
}

/// Body of `POST /v1/agents/{id}/commands/{cmdId}/ack`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandAckRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ── Audit ─────────────────────────────────────────────────────────────────────

/// Append-only administrative trail. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub details: Value,
}

impl AuditRecord {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        details: Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            details,
        }
    }
}
