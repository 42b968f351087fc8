use std::io::Read;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_ENCODING, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use fleetd_domain::{
    resolve_policy, Command, CommandAckRequest, Device, DeviceStatus, Envelope,
    IngestResponse, LoggedEnvelope, RegisterRequest, RegisterResponse,
};
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth;
use crate::error::ApiError;
use crate::state::AppState;

// ── Registration ──────────────────────────────────────────────────────────────

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    if request.hostname.is_empty() {
        return Err(ApiError::bad_request("hostname must not be empty"));
    }

    let token = auth::generate_token();
    let token_hash = auth::hash_token(&token)?;
    let now = Utc::now();

    let device = match state.store.get_device(request.device_id).await? {
        Some(existing) => {
            // Re-registration rotates the token silently; the previous token
            // stops working on the next request. A device an administrator
            // has disabled stays disabled.
            if existing.status == DeviceStatus::Inactive {
                return Err(ApiError::conflict(
                    "device is disabled; re-registration requires operator intervention",
                ));
            }
            state
                .store
                .rotate_device_token(request.device_id, &request, &token_hash)
                .await?;
            state
                .store
                .append_audit(&fleetd_domain::AuditRecord::new(
                    "agent",
                    "device.reregister",
                    "device",
                    request.device_id.to_string(),
                    json!({ "hostname": request.hostname.clone() }),
                ))
                .await?;
            Device {
                capabilities: request.capabilities.clone(),
                ..existing
            }
        }
        None => {
            let device = Device {
                device_id: request.device_id,
                hostname: request.hostname.clone(),
                agent_version: request.agent_version.clone(),
                group_id: None,
                capabilities: request.capabilities.clone(),
                first_seen: now,
                last_seen: now,
                status: DeviceStatus::Active,
            };
            state.store.create_device(&device, &token_hash).await?;
            state
                .store
                .append_audit(&fleetd_domain::AuditRecord::new(
                    "agent",
                    "device.register",
                    "device",
                    request.device_id.to_string(),
                    json!({ "hostname": request.hostname.clone() }),
                ))
                .await?;
            device
        }
    };

    let policies = state.store.policies_for_device(&device).await?;
    let effective = resolve_policy(&policies, &device);

    state.metrics.registrations.inc();
    info!(device_id = %request.device_id, hostname = %request.hostname, "device registered");

    Ok(Json(RegisterResponse {
        device_id: request.device_id,
        auth_token: token,
        policy_version: effective.version,
    }))
}

// ── Ingest ────────────────────────────────────────────────────────────────────

pub async fn ingest(
    State(state): State<AppState>,
    Extension(auth::AuthedDevice(device_id)): Extension<auth::AuthedDevice>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    let now = Utc::now();

    let raw = if is_gzip(&headers) {
        let mut decoded = Vec::new();
        GzDecoder::new(body.as_ref())
            .read_to_end(&mut decoded)
            .map_err(|e| {
                state.metrics.envelopes_rejected.inc();
                ApiError::bad_request(format!("gzip body not decompressible: {e}"))
            })?;
        decoded
    } else {
        body.to_vec()
    };

    let envelope: Envelope = serde_json::from_slice(&raw).map_err(|e| {
        state.metrics.envelopes_rejected.inc();
        ApiError::bad_request(format!("invalid envelope: {e}"))
    })?;

    if envelope.device_id != device_id {
        state.metrics.envelopes_rejected.inc();
        return Err(ApiError::bad_request("device_id mismatch between path and body"));
    }
    if let Err(e) = envelope.validate(now) {
        state.metrics.envelopes_rejected.inc();
        return Err(e.into());
    }

    let logged = LoggedEnvelope::new(envelope, now);
    state.log.publish(&logged).await?;
    state.metrics.envelopes_accepted.inc();

    // Liveness is best-effort; the accept path doesn't fail on it.
    if let Err(e) = state.store.touch_last_seen(device_id, now).await {
        warn!(device_id = %device_id, error = %e, "last_seen update failed");
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            ingestion_id: logged.ingestion_id,
            status: "accepted".to_string(),
        }),
    ))
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"))
}

// ── Policy ────────────────────────────────────────────────────────────────────

pub async fn get_policy(
    State(state): State<AppState>,
    Extension(auth::AuthedDevice(device_id)): Extension<auth::AuthedDevice>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let device = state
        .store
        .get_device(device_id)
        .await?
        .ok_or_else(|| ApiError::not_found("device not found"))?;

    let policies = state.store.policies_for_device(&device).await?;
    let effective = resolve_policy(&policies, &device);

    let client_tag = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok());
    if client_tag == Some(effective.etag.as_str()) {
        return Ok((StatusCode::NOT_MODIFIED, [(ETAG, effective.etag)]).into_response());
    }

    Ok((
        StatusCode::OK,
        [(ETAG, effective.etag.clone())],
        Json(effective),
    )
        .into_response())
}

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub limit: Option<i64>,
}

pub async fn poll_commands(
    State(state): State<AppState>,
    Extension(auth::AuthedDevice(device_id)): Extension<auth::AuthedDevice>,
    Query(query): Query<PollQuery>,
) -> Result<Json<Vec<Command>>, ApiError> {
    let limit = query.limit.unwrap_or(10).clamp(1, 50);

    let claimed = state
        .store
        .claim_pending_commands(device_id, limit, Utc::now())
        .await?;
    if !claimed.is_empty() {
        state.metrics.commands_claimed.inc_by(claimed.len() as u64);
        info!(device_id = %device_id, count = claimed.len(), "commands claimed");
    }
    Ok(Json(claimed))
}

pub async fn ack_command(
    State(state): State<AppState>,
    Extension(auth::AuthedDevice(device_id)): Extension<auth::AuthedDevice>,
    Path((_id, cmd_id)): Path<(String, String)>,
    Json(ack): Json<CommandAckRequest>,
) -> Result<Json<Value>, ApiError> {
    let command_id = Uuid::parse_str(&cmd_id)
        .map_err(|_| ApiError::bad_request(format!("invalid command id: {cmd_id}")))?;

    let command = state
        .store
        .get_command(command_id)
        .await?
        .ok_or_else(|| ApiError::not_found("command not found"))?;
    if command.device_id != device_id {
        return Err(ApiError::not_found("command not found"));
    }

    let status = state
        .store
        .ack_command(command_id, ack.result, ack.error, Utc::now())
        .await?;
    state.metrics.commands_acked.inc();

    Ok(Json(json!({ "command_id": command_id, "status": status })))
}

// ── Operations ────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let database = match state.store.ping().await {
        Ok(()) => "ok",
        Err(_) => "unreachable",
    };
    let log = if state.log.is_connected() { "ok" } else { "disconnected" };
    let status = if database == "ok" && log == "ok" { "ok" } else { "degraded" };

    Json(json!({
        "status": status,
        "database": database,
        "log": log,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": (Utc::now() - state.started_at).num_seconds(),
        "timestamp": Utc::now(),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let text = crate::metrics::render(&state.registry)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        text,
    )
        .into_response())
}
