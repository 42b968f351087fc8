use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;
use crate::types::MetricName;

// ── Payload shapes ────────────────────────────────────────────────────────────
//
// One struct per metric name. The shapes are fixed; agents and the server
// agree on them by construction because both sides use these types.

/// Payload of `os.info`. Fields the platform can't answer are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub caption: String,
    pub version: String,
    pub make: String,
    pub model: String,
    pub serial: String,
    pub hostname: String,
    pub domain: String,
    pub last_user: String,
}

/// Payload of `cpu.utilization`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuUtilization {
    pub cpu_percent: f64,
}

/// Payload of `memory.usage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

/// One fixed volume in a `disk.utilization` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskVolume {
    pub name: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
}

/// One installed package in a `software.inventory` payload.
/// `install_date` is `YYYY-MM-DD` or empty when the platform doesn't track it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwarePackage {
    pub name: String,
    pub version: String,
    pub publisher: String,
    pub install_date: String,
}

// ── Validation ────────────────────────────────────────────────────────────────

fn invalid(metric: MetricName, message: impl Into<String>) -> DomainError {
    DomainError::InvalidMetricPayload {
        metric: metric.to_string(),
        message: message.into(),
    }
}

/// Check that `payload` has the shape required for `name`.
///
/// Used by the ingest endpoint before an envelope is accepted; a payload that
/// fails here is a 400, never retried.
pub fn validate_metric_payload(name: MetricName, payload: &Value) -> Result<(), DomainError> {
    match name {
        MetricName::OsInfo => {
            serde_json::from_value::<OsInfo>(payload.clone())
                .map_err(|e| invalid(name, e.to_string()))?;
        }
        MetricName::CpuUtilization => {
            let cpu: CpuUtilization = serde_json::from_value(payload.clone())
                .map_err(|e| invalid(name, e.to_string()))?;
            if !cpu.cpu_percent.is_finite() || !(0.0..=100.0).contains(&cpu.cpu_percent) {
                return Err(invalid(
                    name,
                    format!("cpu_percent {} outside [0, 100]", cpu.cpu_percent),
                ));
            }
        }
        MetricName::MemoryUsage => {
            let mem: MemoryUsage = serde_json::from_value(payload.clone())
                .map_err(|e| invalid(name, e.to_string()))?;
            if mem.used_bytes > mem.total_bytes {
                return Err(invalid(
                    name,
                    format!("used_bytes {} > total_bytes {}", mem.used_bytes, mem.total_bytes),
                ));
            }
        }
        MetricName::DiskUtilization => {
            let volumes: Vec<DiskVolume> = serde_json::from_value(payload.clone())
                .map_err(|e| invalid(name, e.to_string()))?;
            for v in &volumes {
                if v.used_bytes > v.total_bytes {
                    return Err(invalid(
                        name,
                        format!("volume '{}' used_bytes exceeds total_bytes", v.name),
                    ));
                }
            }
        }
        MetricName::SoftwareInventory => {
            let packages: Vec<SoftwarePackage> = serde_json::from_value(payload.clone())
                .map_err(|e| invalid(name, e.to_string()))?;
            for p in &packages {
                if p.name.is_empty() {
                    return Err(invalid(name, "package with empty name"));
                }
                if !p.install_date.is_empty()
                    && NaiveDate::parse_from_str(&p.install_date, "%Y-%m-%d").is_err()
                {
                    return Err(invalid(
                        name,
                        format!("install_date '{}' is not YYYY-MM-DD", p.install_date),
                    ));
                }
            }
        }
    }
    Ok(())
}
