use async_trait::async_trait;
use fleetd_domain::{DiskVolume, MetricName};
use serde_json::Value;
use sysinfo::Disks;

use crate::collector::Collector;
use crate::error::CollectError;

/// `disk.utilization`: fixed volumes only, ordered by mount point.
/// Removable media and pseudo-filesystems with zero capacity are skipped.
pub struct DiskCollector;

#[async_trait]
impl Collector for DiskCollector {
    fn name(&self) -> MetricName {
        MetricName::DiskUtilization
    }

    async fn collect(&self) -> Result<Value, CollectError> {
        let disks = Disks::new_with_refreshed_list();

        let mut volumes: Vec<DiskVolume> = disks
            .list()
            .iter()
            .filter(|d| !d.is_removable() && d.total_space() > 0)
            .map(|d| {
                let total = d.total_space();
                let free = d.available_space().min(total);
                DiskVolume {
                    name: d.mount_point().display().to_string(),
                    total_bytes: total,
                    free_bytes: free,
                    used_bytes: total - free,
                }
            })
            .collect();
        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        volumes.dedup_by(|a, b| a.name == b.name);

        Ok(serde_json::to_value(volumes)?)
    }
}
