use std::collections::HashMap;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::{Path, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use fleetd_domain::{DeviceId, DeviceStatus};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

const TOKEN_LENGTH: usize = 48;

/// Fresh rotatable device secret. Only ever returned once, in the
/// registration response; the server stores the hash.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

pub fn hash_token(token: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(token.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::internal(format!("token hashing: {e}")))
}

pub fn verify_token(token: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(token.as_bytes(), &parsed)
        .is_ok()
}

/// The device identity resolved by [`require_device`], available to
/// downstream handlers via request extensions.
#[derive(Debug, Clone, Copy)]
pub struct AuthedDevice(pub DeviceId);

fn bearer(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

/// Device-route middleware: `Authorization: Bearer <token>` verified against
/// the stored hash for the `{id}` in the path. Inactive devices are refused.
pub async fn require_device(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(id) = params.get("id") else {
        return ApiError::bad_request("missing device id").into_response();
    };
    let device_id = match DeviceId::parse(id) {
        Ok(id) => id,
        Err(e) => return ApiError::bad_request(e.to_string()).into_response(),
    };

    let Some(token) = bearer(&request) else {
        return ApiError::unauthorized("missing bearer token").into_response();
    };

    let auth = match state.store.device_auth(device_id).await {
        Ok(Some(auth)) => auth,
        Ok(None) => {
            debug!(device_id = %device_id, "unknown device");
            return ApiError::unauthorized("unknown device").into_response();
        }
        Err(e) => return ApiError::from(e).into_response(),
    };

    if !verify_token(token, &auth.token_hash) {
        return ApiError::unauthorized("invalid token").into_response();
    }
    if auth.status != DeviceStatus::Active {
        return ApiError::forbidden(format!("device is {}", auth.status)).into_response();
    }

    request.extensions_mut().insert(AuthedDevice(device_id));
    next.run(request).await
}

/// Admin-route middleware: a separately scoped static token from the
/// server environment.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    match bearer(&request) {
        Some(token) if token == state.admin_token.as_str() => next.run(request).await,
        Some(_) => ApiError::unauthorized("invalid admin token").into_response(),
        None => ApiError::unauthorized("missing bearer token").into_response(),
    }
}
