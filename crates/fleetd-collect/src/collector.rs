use std::sync::Arc;

use async_trait::async_trait;
use fleetd_domain::{Capability, MetricName};
use serde_json::Value;

use crate::error::CollectError;

/// One host probe. Collectors never fail an envelope: the scheduler logs an
/// error and omits the metric. Deadlines are enforced by the caller.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> MetricName;

    /// Probe schema version advertised as a capability.
    fn version(&self) -> &'static str {
        "1.0"
    }

    async fn collect(&self) -> Result<Value, CollectError>;
}

/// The canonical probe set, one collector per metric name.
pub fn default_collectors() -> Vec<Arc<dyn Collector>> {
    vec![
        Arc::new(crate::os_info::OsInfoCollector),
        Arc::new(crate::cpu::CpuCollector),
        Arc::new(crate::memory::MemoryCollector),
        Arc::new(crate::disk::DiskCollector),
        Arc::new(crate::software::SoftwareCollector),
    ]
}

/// What the agent advertises at registration.
pub fn capabilities(collectors: &[Arc<dyn Collector>]) -> Vec<Capability> {
    collectors
        .iter()
        .map(|c| Capability {
            name: c.name().to_string(),
            version: c.version().to_string(),
        })
        .collect()
}
