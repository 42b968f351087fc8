use async_trait::async_trait;
use fleetd_domain::{MetricName, OsInfo};
use serde_json::Value;
use sysinfo::System;

use crate::collector::Collector;
use crate::error::CollectError;

/// `os.info`: OS identity plus hardware make/model/serial from DMI.
/// Fields the platform can't answer stay empty strings.
pub struct OsInfoCollector;

#[async_trait]
impl Collector for OsInfoCollector {
    fn name(&self) -> MetricName {
        MetricName::OsInfo
    }

    async fn collect(&self) -> Result<Value, CollectError> {
        let info = OsInfo {
            caption: System::long_os_version().unwrap_or_default(),
            version: System::os_version().unwrap_or_default(),
            make: dmi_field("sys_vendor"),
            model: dmi_field("product_name"),
            serial: dmi_field("product_serial"),
            hostname: System::host_name().unwrap_or_default(),
            domain: domain_name(),
            last_user: std::env::var("USER").unwrap_or_default(),
        };
        Ok(serde_json::to_value(info)?)
    }
}

/// Read one field from the firmware tables. Requires root for some fields
/// (e.g. product_serial); absence is not an error.
fn dmi_field(field: &str) -> String {
    std::fs::read_to_string(format!("/sys/class/dmi/id/{field}"))
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn domain_name() -> String {
    match std::fs::read_to_string("/proc/sys/kernel/domainname") {
        Ok(s) => {
            let s = s.trim();
            if s == "(none)" {
                String::new()
            } else {
                s.to_string()
            }
        }
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn payload_matches_declared_shape() {
        let payload = OsInfoCollector.collect().await.unwrap();
        // Whatever the host answers, the shape must validate.
        fleetd_domain::validate_metric_payload(MetricName::OsInfo, &payload).unwrap();
    }
}
