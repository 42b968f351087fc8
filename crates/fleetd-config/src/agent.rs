use std::collections::BTreeMap;
use std::path::Path;

use fleetd_domain::{DeviceId, MetricName, MAX_INTERVAL_SECONDS, MIN_INTERVAL_SECONDS};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

/// Retry behaviour of the agent's cloud writer and registrar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub max_backoff_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_multiplier: 2.0,
            max_backoff_seconds: 300,
        }
    }
}

/// The agent's on-disk configuration. Read by every agent task; written only
/// by the registrar (token) and the policy client (interval, enable bits),
/// always through [`AgentConfig::save`] so the file is replaced atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub device_id: DeviceId,
    pub api_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Seconds between collection cycles. Bounded to [60, 3600].
    pub collection_interval: u32,
    #[serde(default)]
    pub enabled_metrics: BTreeMap<String, bool>,
    pub local_output_path: std::path::PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AgentConfig {
    /// Fresh config for a first start: new device identity, every metric
    /// enabled, default cadence.
    pub fn bootstrap(api_endpoint: impl Into<String>) -> Self {
        let enabled_metrics = MetricName::ALL
            .iter()
            .map(|m| (m.as_str().to_string(), true))
            .collect();
        Self {
            device_id: DeviceId::generate(),
            api_endpoint: api_endpoint.into(),
            auth_token: None,
            collection_interval: fleetd_domain::DEFAULT_INTERVAL_SECONDS,
            enabled_metrics,
            local_output_path: std::path::PathBuf::from("/var/lib/fleetd/latest.yml"),
            log_level: default_log_level(),
            retry: RetryConfig::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: AgentConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
                path: path.display().to_string(),
                source: e,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config, or create and persist a fresh one when the file does
    /// not exist yet. Returns `(config, created)`.
    pub fn load_or_bootstrap(
        path: &Path,
        api_endpoint: &str,
    ) -> Result<(Self, bool), ConfigError> {
        if path.exists() {
            return Ok((Self::load(path)?, false));
        }
        let config = Self::bootstrap(api_endpoint);
        config.save(path)?;
        info!(device_id = %config.device_id, path = %path.display(), "created agent config");
        Ok((config, true))
    }

    /// Write-to-temp then rename, so readers never observe a torn file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let content = serde_yaml::to_string(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                    path: parent.display().to_string(),
                    source: e,
                })?;
            }
        }

        let tmp = path.with_extension("yml.tmp");
        std::fs::write(&tmp, content).map_err(|e| ConfigError::Io {
            path: tmp.display().to_string(),
            source: e,
        })?;
        std::fs::rename(&tmp, path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection_interval < MIN_INTERVAL_SECONDS
            || self.collection_interval > MAX_INTERVAL_SECONDS
        {
            return Err(ConfigError::Invalid(format!(
                "collection_interval {}s out of range [{}, {}]",
                self.collection_interval, MIN_INTERVAL_SECONDS, MAX_INTERVAL_SECONDS
            )));
        }
        if self.api_endpoint.is_empty() {
            return Err(ConfigError::Invalid("api_endpoint must not be empty".into()));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_enables_all_metrics() {
        let config = AgentConfig::bootstrap("https://fleet.example.com");
        assert_eq!(config.enabled_metrics.len(), MetricName::ALL.len());
        assert!(config.enabled_metrics.values().all(|v| *v));
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.yml");

        let mut config = AgentConfig::bootstrap("https://fleet.example.com");
        config.auth_token = Some("tkn-1".into());
        config.save(&path).unwrap();

        let loaded = AgentConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        // No temp file left behind.
        assert!(!path.with_extension("yml.tmp").exists());
    }

    #[test]
    fn load_or_bootstrap_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.yml");

        let (first, created) =
            AgentConfig::load_or_bootstrap(&path, "https://fleet.example.com").unwrap();
        assert!(created);

        let (second, created) =
            AgentConfig::load_or_bootstrap(&path, "https://fleet.example.com").unwrap();
        assert!(!created);
        assert_eq!(first.device_id, second.device_id);
    }

    #[test]
    fn interval_below_minimum_rejected() {
        let mut config = AgentConfig::bootstrap("https://fleet.example.com");
        config.collection_interval = 59;
        assert!(config.validate().is_err());

        config.collection_interval = 60;
        assert!(config.validate().is_ok());

        config.collection_interval = 3601;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_refuses_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.yml");
        let mut config = AgentConfig::bootstrap("https://fleet.example.com");
        config.collection_interval = 10;
        assert!(config.save(&path).is_err());
        assert!(!path.exists());
    }
}
