use std::path::PathBuf;

use async_trait::async_trait;
use fleetd_domain::Envelope;

use crate::error::AgentError;

/// Sink for assembled envelopes. The scheduler publishes to every writer
/// sequentially; one writer's failure never stops the others.
#[async_trait]
pub trait EnvelopeWriter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn write(&self, envelope: &Envelope) -> Result<(), AgentError>;
}

/// Writes the latest envelope as human-readable YAML, replacing the previous
/// one atomically (write-to-temp, rename). Operators can recover last-known
/// state from this file even when the server is unreachable.
pub struct LocalWriter {
    path: PathBuf,
}

impl LocalWriter {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl EnvelopeWriter for LocalWriter {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn write(&self, envelope: &Envelope) -> Result<(), AgentError> {
        let content = serde_yaml::to_string(envelope)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| AgentError::Io {
                    path: parent.display().to_string(),
                    source: e,
                })?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content).map_err(|e| AgentError::Io {
            path: tmp.display().to_string(),
            source: e,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| AgentError::Io {
            path: self.path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }
}
