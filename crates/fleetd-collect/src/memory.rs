use async_trait::async_trait;
use fleetd_domain::{MemoryUsage, MetricName};
use serde_json::Value;
use sysinfo::System;

use crate::collector::Collector;
use crate::error::CollectError;

/// `memory.usage`: used/total physical memory in bytes.
pub struct MemoryCollector;

#[async_trait]
impl Collector for MemoryCollector {
    fn name(&self) -> MetricName {
        MetricName::MemoryUsage
    }

    async fn collect(&self) -> Result<Value, CollectError> {
        let mut sys = System::new();
        sys.refresh_memory();

        let usage = MemoryUsage {
            used_bytes: sys.used_memory().min(sys.total_memory()),
            total_bytes: sys.total_memory(),
        };
        Ok(serde_json::to_value(usage)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn used_never_exceeds_total() {
        let payload = MemoryCollector.collect().await.unwrap();
        fleetd_domain::validate_metric_payload(MetricName::MemoryUsage, &payload).unwrap();
    }
}
