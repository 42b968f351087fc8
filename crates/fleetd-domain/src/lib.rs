pub mod command;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod types;

#[cfg(test)]
mod tests;

pub use command::{
    CollectNowParams, Command, CommandStatus, COMMAND_TYPE_COLLECT_NOW, MAX_TTL_SECONDS,
};
pub use error::DomainError;
pub use metrics::{
    CpuUtilization, DiskVolume, MemoryUsage, OsInfo, SoftwarePackage, validate_metric_payload,
};
pub use policy::{
    resolve_policy, EffectivePolicy, MetricToggle, Policy, PolicyConfig, PolicyScope,
    DEFAULT_INTERVAL_SECONDS, MAX_INTERVAL_SECONDS, MIN_INTERVAL_SECONDS,
};
pub use types::{
    AuditRecord, Capability, CommandAckRequest, Device, DeviceId, DeviceStatus, Envelope,
    IngestResponse, LoggedEnvelope, MetricName, RegisterRequest, RegisterResponse,
    MAX_CLOCK_SKEW_SECONDS,
};
