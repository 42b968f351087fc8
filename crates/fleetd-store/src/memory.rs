use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use fleetd_domain::{
    AuditRecord, Command, CommandStatus, Device, DeviceId, LoggedEnvelope, Policy,
    RegisterRequest,
};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{DeviceAuth, Store};

#[derive(Debug, Default)]
struct Inner {
    devices: HashMap<DeviceId, (Device, String)>,
    history: HashMap<(DeviceId, DateTime<Utc>, u64), LoggedEnvelope>,
    latest: HashMap<DeviceId, LoggedEnvelope>,
    policies: HashMap<Uuid, Policy>,
    commands: HashMap<Uuid, Command>,
    audit: Vec<AuditRecord>,
    partitions: BTreeSet<NaiveDate>,
}

/// In-memory implementation of [`Store`].
///
/// All data is lost on process exit. Suitable for tests; mirrors the
/// Postgres implementation's semantics including conditional upserts,
/// claim-on-read and idempotent acknowledgements.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    // ── Devices ──────────────────────────────────────────────────────────────

    async fn create_device(&self, device: &Device, token_hash: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .devices
            .insert(device.device_id, (device.clone(), token_hash.to_string()));
        Ok(())
    }

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.devices.get(&id).map(|(d, _)| d.clone()))
    }

    async fn list_devices(&self, limit: i64) -> Result<Vec<Device>, StoreError> {
        let guard = self.inner.read().await;
        let mut devices: Vec<Device> = guard.devices.values().map(|(d, _)| d.clone()).collect();
        devices.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        devices.truncate(limit as usize);
        Ok(devices)
    }

    async fn device_auth(&self, id: DeviceId) -> Result<Option<DeviceAuth>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.devices.get(&id).map(|(d, hash)| DeviceAuth {
            token_hash: hash.clone(),
            status: d.status,
        }))
    }

    async fn rotate_device_token(
        &self,
        id: DeviceId,
        request: &RegisterRequest,
        token_hash: &str,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let (device, hash) = guard
            .devices
            .get_mut(&id)
            .ok_or(StoreError::DeviceNotFound(id))?;
        device.hostname = request.hostname.clone();
        device.agent_version = request.agent_version.clone();
        device.capabilities = request.capabilities.clone();
        device.status = fleetd_domain::DeviceStatus::Active;
        *hash = token_hash.to_string();
        Ok(())
    }

    async fn touch_last_seen(&self, id: DeviceId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if let Some((device, _)) = guard.devices.get_mut(&id) {
            if at > device.last_seen {
                device.last_seen = at;
            }
        }
        Ok(())
    }

    async fn delete_device(&self, id: DeviceId) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.devices.remove(&id);
        guard.history.retain(|(d, _, _), _| *d != id);
        guard.latest.remove(&id);
        guard.commands.retain(|_, c| c.device_id != id);
        Ok(())
    }

    // ── Telemetry ────────────────────────────────────────────────────────────

    async fn record_envelope(&self, logged: &LoggedEnvelope) -> Result<bool, StoreError> {
        let env = &logged.envelope;
        let key = (env.device_id, env.collected_at, env.seq);
        let mut guard = self.inner.write().await;

        let inserted = if guard.history.contains_key(&key) {
            false
        } else {
            guard.history.insert(key, logged.clone());
            guard.partitions.insert(env.collected_at.date_naive());
            true
        };

        // Conditional upsert: never regress the latest row.
        match guard.latest.get(&env.device_id) {
            Some(current) if current.envelope.collected_at >= env.collected_at => {}
            _ => {
                guard.latest.insert(env.device_id, logged.clone());
            }
        }

        Ok(inserted)
    }

    async fn latest_for_device(&self, id: DeviceId) -> Result<Option<LoggedEnvelope>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.latest.get(&id).cloned())
    }

    async fn history_for_device(
        &self,
        id: DeviceId,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<LoggedEnvelope>, StoreError> {
        let guard = self.inner.read().await;
        let mut rows: Vec<LoggedEnvelope> = guard
            .history
            .iter()
            .filter(|((d, at, _), _)| *d == id && *at >= since)
            .map(|(_, v)| v.clone())
            .collect();
        rows.sort_by(|a, b| b.envelope.collected_at.cmp(&a.envelope.collected_at));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    // ── Policies ─────────────────────────────────────────────────────────────

    async fn upsert_policy(&self, policy: &Policy) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.policies.insert(policy.policy_id, policy.clone());
        Ok(())
    }

    async fn get_policy(&self, id: Uuid) -> Result<Option<Policy>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.policies.get(&id).cloned())
    }

    async fn list_policies(&self) -> Result<Vec<Policy>, StoreError> {
        let guard = self.inner.read().await;
        let mut policies: Vec<Policy> = guard.policies.values().cloned().collect();
        policies.sort_by_key(|p| p.created_at);
        Ok(policies)
    }

    async fn delete_policy(&self, id: Uuid) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .policies
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::PolicyNotFound(id))
    }

    async fn policies_for_device(&self, device: &Device) -> Result<Vec<Policy>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .policies
            .values()
            .filter(|p| p.applies_to(device))
            .cloned()
            .collect())
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    async fn create_command(&self, command: &Command) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.commands.insert(command.command_id, command.clone());
        Ok(())
    }

    async fn get_command(&self, id: Uuid) -> Result<Option<Command>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.commands.get(&id).cloned())
    }

    async fn claim_pending_commands(
        &self,
        device: DeviceId,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Command>, StoreError> {
        let mut guard = self.inner.write().await;
        let mut ids: Vec<Uuid> = guard
            .commands
            .values()
            .filter(|c| {
                c.device_id == device
                    && c.status == CommandStatus::Pending
                    && c.expires_at() >= now
            })
            .map(|c| (c.issued_at, c.command_id))
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .map(|(_, id)| id)
            .collect();
        ids.truncate(limit as usize);

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(c) = guard.commands.get_mut(&id) {
                c.status = CommandStatus::Executing;
                claimed.push(c.clone());
            }
        }
        Ok(claimed)
    }

    async fn ack_command(
        &self,
        id: Uuid,
        result: Option<Value>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CommandStatus, StoreError> {
        let mut guard = self.inner.write().await;
        let command = guard
            .commands
            .get_mut(&id)
            .ok_or(StoreError::CommandNotFound(id))?;

        if command.status.is_terminal() {
            return Ok(command.status);
        }
        if command.status != CommandStatus::Executing {
            return Err(StoreError::CommandNotClaimed {
                command_id: id,
                status: command.status.to_string(),
            });
        }

        command.status = if error.is_some() {
            CommandStatus::Failed
        } else {
            CommandStatus::Completed
        };
        command.result = match (result, error) {
            (_, Some(e)) => Some(serde_json::json!({ "error": e })),
            (Some(r), None) => Some(r),
            (None, None) => None,
        };
        command.completed_at = Some(now);
        Ok(command.status)
    }

    async fn expire_commands(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        let mut count = 0;
        for command in guard.commands.values_mut() {
            if command.status == CommandStatus::Pending && command.expires_at() < now {
                command.status = CommandStatus::Expired;
                command.completed_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn list_commands(&self, device: DeviceId, limit: i64) -> Result<Vec<Command>, StoreError> {
        let guard = self.inner.read().await;
        let mut commands: Vec<Command> = guard
            .commands
            .values()
            .filter(|c| c.device_id == device)
            .cloned()
            .collect();
        commands.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        commands.truncate(limit as usize);
        Ok(commands)
    }

    // ── Audit ────────────────────────────────────────────────────────────────

    async fn append_audit(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.audit.push(record.clone());
        Ok(())
    }

    async fn list_audit(&self, limit: i64) -> Result<Vec<AuditRecord>, StoreError> {
        let guard = self.inner.read().await;
        let start = guard.audit.len().saturating_sub(limit as usize);
        let mut rows = guard.audit[start..].to_vec();
        rows.reverse();
        Ok(rows)
    }

    // ── Telemetry partitions ─────────────────────────────────────────────────

    async fn ensure_partition(&self, day: NaiveDate) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        Ok(guard.partitions.insert(day))
    }

    async fn list_partition_days(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.partitions.iter().copied().collect())
    }

    async fn drop_partition(&self, day: NaiveDate) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.partitions.remove(&day);
        let cutoff_start = day.and_hms_opt(0, 0, 0);
        let cutoff_end = (day + Duration::days(1)).and_hms_opt(0, 0, 0);
        if let (Some(start), Some(end)) = (cutoff_start, cutoff_end) {
            let start = start.and_utc();
            let end = end.and_utc();
            guard
                .history
                .retain(|(_, at, _), _| *at < start || *at >= end);
        }
        Ok(())
    }

    // ── Health ───────────────────────────────────────────────────────────────

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
