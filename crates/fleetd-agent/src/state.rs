use std::path::PathBuf;
use std::sync::Arc;

use fleetd_config::{AgentConfig, ConfigError};
use tokio::sync::RwLock;

/// Shared view of the agent config.
///
/// Read by every task; mutated only by the registrar (token) and the policy
/// client (interval, enable bits). Every mutation goes through [`update`],
/// which serializes writers and atomically replaces the file on disk.
///
/// [`update`]: ConfigHandle::update
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AgentConfig>>,
    path: PathBuf,
}

impl ConfigHandle {
    pub fn new(config: AgentConfig, path: PathBuf) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            path,
        }
    }

    pub async fn read(&self) -> AgentConfig {
        self.inner.read().await.clone()
    }

    /// Apply `mutate` and persist. The write lock is held across the file
    /// replace so concurrent updates can't interleave a stale snapshot.
    pub async fn update<F>(&self, mutate: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut AgentConfig),
    {
        let mut guard = self.inner.write().await;
        let mut candidate = guard.clone();
        mutate(&mut candidate);
        candidate.save(&self.path)?;
        *guard = candidate;
        Ok(())
    }
}
