use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Server configuration, sourced entirely from the environment.
///
/// Required: `DATABASE_URL`, `NATS_URL`, `ADMIN_TOKEN`. Everything else has a
/// default. Invalid values are fatal at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub nats_url: String,
    pub listen_addr: SocketAddr,
    pub admin_token: String,
    /// Sliding-window request cap per device (agent routes) or per client
    /// address (everything else), per minute.
    pub rate_limit_per_minute: u32,
    /// Max messages per pull batch in the telemetry writer.
    pub ingest_max_batch: usize,
    /// Served to the deployment layer; the listener itself binds plaintext.
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub log_format: LogFormat,
    /// Days of telemetry history kept before partitions are dropped.
    pub retention_days: u32,
    /// Days of future partitions kept pre-created.
    pub horizon_days: u32,
    /// UTC hour at which the partition manager runs its daily pass.
    pub partition_hour: u32,
    /// Durable consumer name for the telemetry writer subscription.
    pub consumer_name: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            database_url: required("DATABASE_URL")?,
            nats_url: required("NATS_URL")?,
            listen_addr: parsed("LISTEN_ADDR", "0.0.0.0:8080")?,
            admin_token: required("ADMIN_TOKEN")?,
            rate_limit_per_minute: parsed("RATE_LIMIT_PER_MINUTE", "120")?,
            ingest_max_batch: parsed("INGEST_MAX_BATCH", "100")?,
            tls_cert_path: optional_path("TLS_CERT_PATH"),
            tls_key_path: optional_path("TLS_KEY_PATH"),
            log_format: log_format()?,
            retention_days: parsed("TELEMETRY_RETENTION_DAYS", "30")?,
            horizon_days: parsed("PARTITION_HORIZON_DAYS", "7")?,
            partition_hour: parsed("PARTITION_MAINTENANCE_HOUR", "3")?,
            consumer_name: std::env::var("TELEMETRY_CONSUMER_NAME")
                .unwrap_or_else(|_| "telemetry-writer".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admin_token.len() < 16 {
            return Err(ConfigError::Invalid(
                "ADMIN_TOKEN must be at least 16 characters".into(),
            ));
        }
        if self.retention_days == 0 {
            return Err(ConfigError::Invalid("TELEMETRY_RETENTION_DAYS must be > 0".into()));
        }
        if self.partition_hour > 23 {
            return Err(ConfigError::Invalid(
                "PARTITION_MAINTENANCE_HOUR must be in [0, 23]".into(),
            ));
        }
        if self.ingest_max_batch == 0 || self.ingest_max_batch > 1000 {
            return Err(ConfigError::Invalid(
                "INGEST_MAX_BATCH must be in [1, 1000]".into(),
            ));
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err(ConfigError::Invalid(
                "TLS_CERT_PATH and TLS_KEY_PATH must be set together".into(),
            ));
        }
        Ok(())
    }
}

fn required(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name.to_string()))
}

fn parsed<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        name: name.to_string(),
        message: e.to_string(),
    })
}

fn optional_path(name: &str) -> Option<PathBuf> {
    std::env::var(name).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn log_format() -> Result<LogFormat, ConfigError> {
    match std::env::var("LOG_FORMAT").as_deref() {
        Err(_) | Ok("text") => Ok(LogFormat::Text),
        Ok("json") => Ok(LogFormat::Json),
        Ok(other) => Err(ConfigError::InvalidEnv {
            name: "LOG_FORMAT".to_string(),
            message: format!("expected 'text' or 'json', got '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ServerConfig {
        ServerConfig {
            database_url: "postgres://fleet:pw@localhost/fleet".into(),
            nats_url: "nats://localhost:4222".into(),
            listen_addr: "0.0.0.0:8080".parse().unwrap(),
            admin_token: "0123456789abcdef0123".into(),
            rate_limit_per_minute: 120,
            ingest_max_batch: 100,
            tls_cert_path: None,
            tls_key_path: None,
            log_format: LogFormat::Text,
            retention_days: 30,
            horizon_days: 7,
            partition_hour: 3,
            consumer_name: "telemetry-writer".into(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn short_admin_token_rejected() {
        let mut config = base_config();
        config.admin_token = "short".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn tls_paths_must_pair() {
        let mut config = base_config();
        config.tls_cert_path = Some("/etc/fleetd/cert.pem".into());
        assert!(config.validate().is_err());
        config.tls_key_path = Some("/etc/fleetd/key.pem".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn batch_bounds() {
        let mut config = base_config();
        config.ingest_max_batch = 0;
        assert!(config.validate().is_err());
        config.ingest_max_batch = 1001;
        assert!(config.validate().is_err());
    }
}
