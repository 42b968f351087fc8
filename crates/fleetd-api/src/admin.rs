use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use fleetd_domain::{
    AuditRecord, Command, DeviceId, Policy, PolicyConfig, PolicyScope,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

fn list_limit(query: &ListQuery) -> i64 {
    query.limit.unwrap_or(100).clamp(1, 1000)
}

// ── Devices ───────────────────────────────────────────────────────────────────

pub async fn list_devices(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let devices = state.store.list_devices(list_limit(&query)).await?;
    let count = devices.len();
    Ok(Json(json!({ "devices": devices, "count": count })))
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let device_id = DeviceId::parse(&id)?;
    let device = state
        .store
        .get_device(device_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("device '{id}' not found")))?;
    let latest = state.store.latest_for_device(device_id).await?;
    Ok(Json(json!({ "device": device, "latest": latest })))
}

pub async fn delete_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let device_id = DeviceId::parse(&id)?;
    state
        .store
        .get_device(device_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("device '{id}' not found")))?;

    // Owned telemetry and commands cascade with the device row.
    state.store.delete_device(device_id).await?;
    state
        .store
        .append_audit(&AuditRecord::new(
            "admin",
            "device.delete",
            "device",
            id.clone(),
            json!({}),
        ))
        .await?;
    info!(device_id = %id, "device deleted");
    Ok(Json(json!({ "deleted": id })))
}

// ── Policies ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PolicyBody {
    pub scope: PolicyScope,
    pub group_id: Option<String>,
    pub device_id: Option<DeviceId>,
    pub version: Option<i64>,
    pub config: PolicyConfig,
    pub created_by: Option<String>,
}

pub async fn list_policies(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let policies = state.store.list_policies().await?;
    let count = policies.len();
    Ok(Json(json!({ "policies": policies, "count": count })))
}

pub async fn create_policy(
    State(state): State<AppState>,
    Json(body): Json<PolicyBody>,
) -> Result<(StatusCode, Json<Policy>), ApiError> {
    let now = Utc::now();
    let policy = Policy {
        policy_id: Uuid::new_v4(),
        scope: body.scope,
        group_id: body.group_id,
        device_id: body.device_id,
        version: body.version.unwrap_or(1),
        config: body.config,
        created_by: body.created_by.unwrap_or_else(|| "admin".to_string()),
        created_at: now,
        updated_at: now,
    };
    policy.validate()?;

    state.store.upsert_policy(&policy).await?;
    state
        .store
        .append_audit(&AuditRecord::new(
            "admin",
            "policy.create",
            "policy",
            policy.policy_id.to_string(),
            json!({ "scope": policy.scope, "version": policy.version }),
        ))
        .await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

pub async fn update_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PolicyBody>,
) -> Result<Json<Policy>, ApiError> {
    let policy_id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::bad_request(format!("invalid policy id: {id}")))?;
    let existing = state
        .store
        .get_policy(policy_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("policy '{id}' not found")))?;

    // Version is monotonic within a policy identity; a non-advancing write
    // is a stale client.
    let version = body.version.unwrap_or(existing.version + 1);
    if version <= existing.version {
        return Err(ApiError::conflict(format!(
            "version {version} does not advance stored version {}",
            existing.version
        )));
    }

    let updated = Policy {
        policy_id,
        scope: body.scope,
        group_id: body.group_id,
        device_id: body.device_id,
        version,
        config: body.config,
        created_by: existing.created_by.clone(),
        created_at: existing.created_at,
        updated_at: Utc::now(),
    };
    updated.validate()?;

    state.store.upsert_policy(&updated).await?;
    state
        .store
        .append_audit(&AuditRecord::new(
            "admin",
            "policy.update",
            "policy",
            id,
            json!({ "version": version }),
        ))
        .await?;
    Ok(Json(updated))
}

pub async fn delete_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let policy_id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::bad_request(format!("invalid policy id: {id}")))?;
    state.store.delete_policy(policy_id).await?;
    state
        .store
        .append_audit(&AuditRecord::new(
            "admin",
            "policy.delete",
            "policy",
            id.clone(),
            json!({}),
        ))
        .await?;
    Ok(Json(json!({ "deleted": id })))
}

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateCommandBody {
    #[serde(rename = "type")]
    pub command_type: String,
    #[serde(default)]
    pub parameters: Value,
    pub ttl_seconds: u32,
}

pub async fn create_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CreateCommandBody>,
) -> Result<(StatusCode, Json<Command>), ApiError> {
    let device_id = DeviceId::parse(&id)?;
    state
        .store
        .get_device(device_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("device '{id}' not found")))?;

    // Command::new enforces the ttl bound (0, 3600].
    let command = Command::new(device_id, body.command_type, body.parameters, body.ttl_seconds)?;
    state.store.create_command(&command).await?;
    state
        .store
        .append_audit(&AuditRecord::new(
            "admin",
            "command.create",
            "command",
            command.command_id.to_string(),
            json!({ "device_id": device_id, "type": command.command_type.clone() }),
        ))
        .await?;
    info!(command_id = %command.command_id, device_id = %device_id, "command created");
    Ok((StatusCode::CREATED, Json(command)))
}

pub async fn get_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Command>, ApiError> {
    let command_id = Uuid::parse_str(&id)
        .map_err(|_| ApiError::bad_request(format!("invalid command id: {id}")))?;
    let command = state
        .store
        .get_command(command_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("command '{id}' not found")))?;
    Ok(Json(command))
}

pub async fn list_device_commands(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let device_id = DeviceId::parse(&id)?;
    let commands = state
        .store
        .list_commands(device_id, list_limit(&query))
        .await?;
    let count = commands.len();
    Ok(Json(json!({ "commands": commands, "count": count })))
}

// ── Audit ─────────────────────────────────────────────────────────────────────

pub async fn list_audit(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let records = state.store.list_audit(list_limit(&query)).await?;
    let count = records.len();
    Ok(Json(json!({ "records": records, "count": count })))
}
