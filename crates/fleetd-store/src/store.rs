use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use fleetd_domain::{
    AuditRecord, Command, CommandStatus, Device, DeviceId, DeviceStatus, LoggedEnvelope, Policy,
    RegisterRequest,
};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;

/// What the auth middleware needs to verify a device bearer token.
#[derive(Debug, Clone)]
pub struct DeviceAuth {
    pub token_hash: String,
    pub status: DeviceStatus,
}

/// The one seam between the server and its relational state.
///
/// Implemented by [`crate::PostgresStore`] for production and
/// [`crate::InMemoryStore`] for tests. Every write is transactional in the
/// Postgres implementation; everything downstream of the durable log is
/// idempotent by the `(device_id, collected_at, seq)` envelope key.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ── Devices ──────────────────────────────────────────────────────────────

    async fn create_device(&self, device: &Device, token_hash: &str) -> Result<(), StoreError>;

    async fn get_device(&self, id: DeviceId) -> Result<Option<Device>, StoreError>;

    async fn list_devices(&self, limit: i64) -> Result<Vec<Device>, StoreError>;

    async fn device_auth(&self, id: DeviceId) -> Result<Option<DeviceAuth>, StoreError>;

    /// Re-registration: overwrite the stored hash and refresh the advertised
    /// identity fields.
    async fn rotate_device_token(
        &self,
        id: DeviceId,
        request: &RegisterRequest,
        token_hash: &str,
    ) -> Result<(), StoreError>;

    /// Monotonic liveness update; never moves `last_seen` backwards.
    async fn touch_last_seen(&self, id: DeviceId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Removes the device and cascades to its telemetry and commands.
    async fn delete_device(&self, id: DeviceId) -> Result<(), StoreError>;

    // ── Telemetry ────────────────────────────────────────────────────────────

    /// One transaction: append to history (`ON CONFLICT DO NOTHING`) and
    /// conditionally upsert the latest row (never regressing `collected_at`).
    /// Returns whether a new history row was written.
    async fn record_envelope(&self, envelope: &LoggedEnvelope) -> Result<bool, StoreError>;

    async fn latest_for_device(
        &self,
        id: DeviceId,
    ) -> Result<Option<LoggedEnvelope>, StoreError>;

    async fn history_for_device(
        &self,
        id: DeviceId,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<LoggedEnvelope>, StoreError>;

    // ── Policies ─────────────────────────────────────────────────────────────

    async fn upsert_policy(&self, policy: &Policy) -> Result<(), StoreError>;

    async fn get_policy(&self, id: Uuid) -> Result<Option<Policy>, StoreError>;

    async fn list_policies(&self) -> Result<Vec<Policy>, StoreError>;

    async fn delete_policy(&self, id: Uuid) -> Result<(), StoreError>;

    /// All policies whose scope matches the device: global, the device's
    /// group, or the device itself. Resolution happens in the domain layer.
    async fn policies_for_device(&self, device: &Device) -> Result<Vec<Policy>, StoreError>;

    // ── Commands ─────────────────────────────────────────────────────────────

    async fn create_command(&self, command: &Command) -> Result<(), StoreError>;

    async fn get_command(&self, id: Uuid) -> Result<Option<Command>, StoreError>;

    /// Atomically transition up to `limit` unexpired pending commands for the
    /// device to `executing` and return them. A command is returned by at
    /// most one claim, ever.
    async fn claim_pending_commands(
        &self,
        device: DeviceId,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Command>, StoreError>;

    /// Conditional `executing -> completed|failed`. Idempotent: a repeated
    /// acknowledgement observes the first terminal status and changes nothing.
    async fn ack_command(
        &self,
        id: Uuid,
        result: Option<Value>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<CommandStatus, StoreError>;

    /// Bulk `pending -> expired` for commands whose ttl has elapsed.
    /// Returns the number of rows transitioned.
    async fn expire_commands(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn list_commands(&self, device: DeviceId, limit: i64) -> Result<Vec<Command>, StoreError>;

    // ── Audit ────────────────────────────────────────────────────────────────

    async fn append_audit(&self, record: &AuditRecord) -> Result<(), StoreError>;

    async fn list_audit(&self, limit: i64) -> Result<Vec<AuditRecord>, StoreError>;

    // ── Telemetry partitions ─────────────────────────────────────────────────

    /// Idempotently create the daily partition covering `day`.
    /// Returns whether a partition was actually created.
    async fn ensure_partition(&self, day: NaiveDate) -> Result<bool, StoreError>;

    /// Days currently covered by a partition, derived from catalog names.
    async fn list_partition_days(&self) -> Result<Vec<NaiveDate>, StoreError>;

    async fn drop_partition(&self, day: NaiveDate) -> Result<(), StoreError>;

    // ── Health ───────────────────────────────────────────────────────────────

    async fn ping(&self) -> Result<(), StoreError>;
}
