use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::DomainError;
use crate::types::{Device, DeviceId};

pub const MIN_INTERVAL_SECONDS: u32 = 60;
pub const MAX_INTERVAL_SECONDS: u32 = 3600;
/// Interval a device runs at when no policy matches it.
pub const DEFAULT_INTERVAL_SECONDS: u32 = 900;

// ── Scope ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyScope {
    Global,
    Group,
    Device,
}

impl std::fmt::Display for PolicyScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyScope::Global => write!(f, "global"),
            PolicyScope::Group => write!(f, "group"),
            PolicyScope::Device => write!(f, "device"),
        }
    }
}

impl std::str::FromStr for PolicyScope {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(PolicyScope::Global),
            "group" => Ok(PolicyScope::Group),
            "device" => Ok(PolicyScope::Device),
            other => Err(DomainError::InvalidPolicy(format!("unknown scope '{other}'"))),
        }
    }
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricToggle {
    pub enabled: bool,
}

/// The collection directive a policy carries: cadence plus per-metric enable
/// bits. Metric keys are plain strings so a newer server can steer metrics an
/// older agent doesn't know; agents ignore unknown names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub interval_seconds: u32,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricToggle>,
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.interval_seconds < MIN_INTERVAL_SECONDS
            || self.interval_seconds > MAX_INTERVAL_SECONDS
        {
            return Err(DomainError::InvalidInterval(self.interval_seconds));
        }
        Ok(())
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            metrics: BTreeMap::new(),
        }
    }
}

// ── Policy ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: Uuid,
    pub scope: PolicyScope,
    /// Set iff scope is `group`.
    pub group_id: Option<String>,
    /// Set iff scope is `device`.
    pub device_id: Option<DeviceId>,
    /// Monotonic within a policy identity; the resolver keeps the max per scope.
    pub version: i64,
    pub config: PolicyConfig,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Policy {
    /// Scope coherence plus config bounds.
    pub fn validate(&self) -> Result<(), DomainError> {
        match self.scope {
            PolicyScope::Global => {
                if self.group_id.is_some() || self.device_id.is_some() {
                    return Err(DomainError::InvalidPolicy(
                        "global policy must not set group_id or device_id".into(),
                    ));
                }
            }
            PolicyScope::Group => {
                if self.group_id.is_none() || self.device_id.is_some() {
                    return Err(DomainError::InvalidPolicy(
                        "group policy must set group_id and not device_id".into(),
                    ));
                }
            }
            PolicyScope::Device => {
                if self.device_id.is_none() || self.group_id.is_some() {
                    return Err(DomainError::InvalidPolicy(
                        "device policy must set device_id and not group_id".into(),
                    ));
                }
            }
        }
        self.config.validate()
    }

    /// Whether this policy is in the candidate set for `device`.
    pub fn applies_to(&self, device: &Device) -> bool {
        match self.scope {
            PolicyScope::Global => true,
            PolicyScope::Group => {
                self.group_id.is_some() && self.group_id == device.group_id
            }
            PolicyScope::Device => self.device_id == Some(device.device_id),
        }
    }
}

// ── Resolution ────────────────────────────────────────────────────────────────

/// The single policy a device should obey, after scope resolution and
/// capability filtering. Only `version` and `config` cross the wire; the
/// ETag travels as an HTTP header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivePolicy {
    pub version: i64,
    pub config: PolicyConfig,
    #[serde(skip)]
    pub etag: String,
}

/// Compute the effective policy for a device. Pure over its inputs: equal
/// `(policies, device)` always yields an equal result, ETag included.
///
/// Resolution order: per scope keep the max `version`, then pick the most
/// specific scope present (device > group > global), then drop metrics the
/// device does not advertise as capabilities.
pub fn resolve_policy(policies: &[Policy], device: &Device) -> EffectivePolicy {
    let best_for = |scope: PolicyScope| -> Option<&Policy> {
        policies
            .iter()
            .filter(|p| p.scope == scope && p.applies_to(device))
            .max_by_key(|p| p.version)
    };

    let chosen = best_for(PolicyScope::Device)
        .or_else(|| best_for(PolicyScope::Group))
        .or_else(|| best_for(PolicyScope::Global));

    match chosen {
        Some(policy) => {
            let mut config = policy.config.clone();
            config
                .metrics
                .retain(|name, _| device.has_capability(name));
            EffectivePolicy {
                version: policy.version,
                config,
                etag: policy_etag(policy),
            }
        }
        None => EffectivePolicy {
            version: 0,
            config: PolicyConfig::default(),
            etag: default_etag(),
        },
    }
}

/// Stable hash of `(policy_id, scope, version)`.
fn policy_etag(policy: &Policy) -> String {
    let digest = Sha256::digest(
        format!("{}:{}:{}", policy.policy_id, policy.scope, policy.version).as_bytes(),
    );
    format!("\"{:x}\"", digest)
}

fn default_etag() -> String {
    let digest = Sha256::digest(b"default:0");
    format!("\"{:x}\"", digest)
}
