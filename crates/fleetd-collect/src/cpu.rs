use async_trait::async_trait;
use fleetd_domain::{CpuUtilization, MetricName};
use serde_json::Value;
use sysinfo::System;

use crate::collector::Collector;
use crate::error::CollectError;

/// `cpu.utilization`: two-sample global CPU usage.
pub struct CpuCollector;

#[async_trait]
impl Collector for CpuCollector {
    fn name(&self) -> MetricName {
        MetricName::CpuUtilization
    }

    async fn collect(&self) -> Result<Value, CollectError> {
        let mut sys = System::new();
        // Usage is a delta between two refreshes; the first sample alone
        // reads as zero.
        sys.refresh_cpu_usage();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        sys.refresh_cpu_usage();

        let cpu_percent = f64::from(sys.global_cpu_usage()).clamp(0.0, 100.0);
        Ok(serde_json::to_value(CpuUtilization { cpu_percent })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn payload_is_in_range() {
        let payload = CpuCollector.collect().await.unwrap();
        fleetd_domain::validate_metric_payload(MetricName::CpuUtilization, &payload).unwrap();
    }
}
