use async_trait::async_trait;
use fleetd_domain::{MetricName, SoftwarePackage};
use serde_json::Value;

use crate::collector::Collector;
use crate::error::CollectError;

const DPKG_STATUS_PATH: &str = "/var/lib/dpkg/status";

// System and update packages suppressed from the inventory.
// TODO: extend with an rpm reader for RHEL-family hosts.
const SUPPRESSED_PREFIXES: &[&str] = &[
    "lib",
    "linux-image-",
    "linux-headers-",
    "linux-modules-",
    "fonts-",
];

/// `software.inventory`: the installed package list, deduplicated
/// case-insensitively by name and with system entries suppressed by
/// name prefix.
pub struct SoftwareCollector;

#[async_trait]
impl Collector for SoftwareCollector {
    fn name(&self) -> MetricName {
        MetricName::SoftwareInventory
    }

    async fn collect(&self) -> Result<Value, CollectError> {
        let status = std::fs::read_to_string(DPKG_STATUS_PATH).map_err(|e| {
            CollectError::Unavailable(format!("{DPKG_STATUS_PATH}: {e}"))
        })?;
        Ok(serde_json::to_value(parse_dpkg_status(&status))?)
    }
}

/// Parse the dpkg status database into inventory entries.
///
/// Stanzas are blank-line separated; only packages whose `Status` line ends
/// in `installed` count. dpkg doesn't record install dates, so
/// `install_date` is always empty here.
fn parse_dpkg_status(status: &str) -> Vec<SoftwarePackage> {
    let mut packages = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for stanza in status.split("\n\n") {
        let mut name = None;
        let mut version = None;
        let mut publisher = None;
        let mut installed = false;

        for line in stanza.lines() {
            if let Some(v) = line.strip_prefix("Package: ") {
                name = Some(v.trim());
            } else if let Some(v) = line.strip_prefix("Version: ") {
                version = Some(v.trim());
            } else if let Some(v) = line.strip_prefix("Maintainer: ") {
                publisher = Some(v.trim());
            } else if let Some(v) = line.strip_prefix("Status: ") {
                installed = v.trim().ends_with("installed");
            }
        }

        let Some(name) = name else { continue };
        if !installed {
            continue;
        }
        let lower = name.to_lowercase();
        if SUPPRESSED_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            continue;
        }
        if !seen.insert(lower) {
            continue;
        }

        packages.push(SoftwarePackage {
            name: name.to_string(),
            version: version.unwrap_or_default().to_string(),
            publisher: publisher.unwrap_or_default().to_string(),
            install_date: String::new(),
        });
    }

    packages.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    packages
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Package: curl
Status: install ok installed
Maintainer: Debian Curl Maintainers
Version: 8.5.0-2

Package: libssl3
Status: install ok installed
Maintainer: Debian OpenSSL Team
Version: 3.1.4-2

Package: linux-image-6.1.0-18-amd64
Status: install ok installed
Version: 6.1.76-1

Package: removed-tool
Status: deinstall ok config-files
Version: 1.0

Package: CURL
Status: install ok installed
Version: 9.9.9
";

    #[test]
    fn only_installed_packages_survive() {
        let packages = parse_dpkg_status(SAMPLE);
        assert!(!packages.iter().any(|p| p.name == "removed-tool"));
    }

    #[test]
    fn system_prefixes_suppressed() {
        let packages = parse_dpkg_status(SAMPLE);
        assert!(!packages.iter().any(|p| p.name.starts_with("lib")));
        assert!(!packages.iter().any(|p| p.name.starts_with("linux-image-")));
    }

    #[test]
    fn dedup_is_case_insensitive_first_wins() {
        let packages = parse_dpkg_status(SAMPLE);
        let curls: Vec<_> = packages
            .iter()
            .filter(|p| p.name.eq_ignore_ascii_case("curl"))
            .collect();
        assert_eq!(curls.len(), 1);
        assert_eq!(curls[0].version, "8.5.0-2");
    }

    #[test]
    fn output_is_sorted_and_validates() {
        let packages = parse_dpkg_status(SAMPLE);
        let payload = serde_json::to_value(&packages).unwrap();
        fleetd_domain::validate_metric_payload(MetricName::SoftwareInventory, &payload).unwrap();

        let mut sorted = packages.clone();
        sorted.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        assert_eq!(packages, sorted);
    }
}
