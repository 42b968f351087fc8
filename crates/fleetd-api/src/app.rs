use std::time::Duration;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{admin, auth, handlers, ratelimit};

/// Per-request deadline across every handler.
const HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

pub fn build_app(state: AppState) -> Router {
    // Device-authenticated agent surface; limiter keyed by device id.
    let agent_routes = Router::new()
        .route("/v1/agents/:id/inventory", post(handlers::ingest))
        .route("/v1/agents/:id/policy", get(handlers::get_policy))
        .route("/v1/agents/:id/commands", get(handlers::poll_commands))
        .route("/v1/agents/:id/commands/:cmd_id/ack", post(handlers::ack_command))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_device))
        .route_layer(middleware::from_fn_with_state(state.clone(), ratelimit::limit_by_device));

    // Admin surface; limiter keyed by client address.
    let admin_routes = Router::new()
        .route("/v1/admin/devices", get(admin::list_devices))
        .route(
            "/v1/admin/devices/:id",
            get(admin::get_device).delete(admin::delete_device),
        )
        .route(
            "/v1/admin/devices/:id/commands",
            get(admin::list_device_commands).post(admin::create_command),
        )
        .route("/v1/admin/commands/:id", get(admin::get_command))
        .route(
            "/v1/admin/policies",
            get(admin::list_policies).post(admin::create_policy),
        )
        .route(
            "/v1/admin/policies/:id",
            axum::routing::put(admin::update_policy).delete(admin::delete_policy),
        )
        .route("/v1/admin/audit", get(admin::list_audit))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_admin))
        .route_layer(middleware::from_fn_with_state(state.clone(), ratelimit::limit_by_addr));

    // Registration is public (a fresh device has no token yet); keyed by
    // client address.
    let register = Router::new()
        .route("/v1/agents/register", post(handlers::register))
        .route_layer(middleware::from_fn_with_state(state.clone(), ratelimit::limit_by_addr));

    Router::new()
        .merge(agent_routes)
        .merge(admin_routes)
        .merge(register)
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(HANDLER_TIMEOUT))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write as _;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use chrono::{Duration, Utc};
    use fleetd_domain::{
        Capability, CommandStatus, DeviceId, LoggedEnvelope, MetricName,
    };
    use fleetd_log::{EnvelopeConsumer, InMemoryLog};
    use fleetd_store::{InMemoryStore, Store};
    use prometheus::Registry;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use crate::metrics::ApiMetrics;
    use crate::ratelimit::RateLimiter;

    const ADMIN_TOKEN: &str = "test-admin-token-0123456789";

    struct Harness {
        app: Router,
        store: Arc<InMemoryStore>,
        log: Arc<InMemoryLog>,
    }

    fn harness() -> Harness {
        harness_with_limit(10_000)
    }

    fn harness_with_limit(rate_limit: u32) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let log = Arc::new(InMemoryLog::new());
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(ApiMetrics::register(&registry).unwrap());
        let state = AppState {
            store: store.clone(),
            log: log.clone(),
            admin_token: Arc::new(ADMIN_TOKEN.to_string()),
            limiter: Arc::new(RateLimiter::new(rate_limit)),
            registry,
            metrics,
            started_at: Utc::now(),
        };
        Harness { app: build_app(state), store, log }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn authed(mut request: Request<Body>, token: &str) -> Request<Body> {
        request.headers_mut().insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {token}").parse().unwrap(),
        );
        request
    }

    /// Register a device and return `(device_id, token)`.
    async fn register_device(app: &Router) -> (DeviceId, String) {
        let device_id = DeviceId::generate();
        let body = json!({
            "device_id": device_id,
            "hostname": "host-1",
            "capabilities": [
                { "name": "os.info", "version": "1.0" },
                { "name": "cpu.utilization", "version": "1.0" }
            ],
            "agent_version": "1.0.0"
        });
        let (status, body) =
            send(app, json_request(Method::POST, "/v1/agents/register", body)).await;
        assert_eq!(status, StatusCode::OK);
        (device_id, body["auth_token"].as_str().unwrap().to_string())
    }

    fn envelope_body(device_id: DeviceId, seq: u64) -> Value {
        json!({
            "device_id": device_id,
            "agent_version": "1.0.0",
            "collected_at": Utc::now(),
            "seq": seq,
            "metrics": {
                "os.info": {
                    "caption": "Debian GNU/Linux 12", "version": "12.5",
                    "make": "", "model": "", "serial": "",
                    "hostname": "host-1", "domain": "", "last_user": ""
                }
            }
        })
    }

    // ── Registration ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn register_returns_token_and_policy_version() {
        let h = harness();
        let device_id = DeviceId::generate();
        let body = json!({
            "device_id": device_id,
            "hostname": "a1",
            "capabilities": [{ "name": "os.info", "version": "1.0" }],
            "agent_version": "1.0.0"
        });
        let (status, body) =
            send(&h.app, json_request(Method::POST, "/v1/agents/register", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["device_id"], json!(device_id));
        assert!(!body["auth_token"].as_str().unwrap().is_empty());
        assert_eq!(body["policy_version"], 0); // no policies yet -> default
    }

    #[tokio::test]
    async fn reregister_rotates_token() {
        let h = harness();
        let (device_id, old_token) = register_device(&h.app).await;

        let body = json!({
            "device_id": device_id,
            "hostname": "host-1",
            "capabilities": [],
            "agent_version": "1.0.1"
        });
        let (status, body) =
            send(&h.app, json_request(Method::POST, "/v1/agents/register", body)).await;
        assert_eq!(status, StatusCode::OK);
        let new_token = body["auth_token"].as_str().unwrap().to_string();
        assert_ne!(new_token, old_token);

        // Old token is dead, new one works.
        let uri = format!("/v1/agents/{device_id}/policy");
        let (status, _) = send(
            &h.app,
            authed(Request::builder().uri(&uri).body(Body::empty()).unwrap(), &old_token),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &h.app,
            authed(Request::builder().uri(&uri).body(Body::empty()).unwrap(), &new_token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    // ── Auth ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn agent_routes_require_bearer() {
        let h = harness();
        let (device_id, _token) = register_device(&h.app).await;
        let uri = format!("/v1/agents/{device_id}/policy");
        let (status, _) = send(
            &h.app,
            Request::builder().uri(&uri).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_routes_require_admin_token() {
        let h = harness();
        let (status, _) = send(
            &h.app,
            Request::builder()
                .uri("/v1/admin/devices")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &h.app,
            authed(
                Request::builder()
                    .uri("/v1/admin/devices")
                    .body(Body::empty())
                    .unwrap(),
                ADMIN_TOKEN,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    // ── Ingest ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn ingest_happy_path_publishes_and_returns_202() {
        let h = harness();
        let (device_id, token) = register_device(&h.app).await;

        let uri = format!("/v1/agents/{device_id}/inventory");
        let (status, body) = send(
            &h.app,
            authed(
                json_request(Method::POST, &uri, envelope_body(device_id, 1)),
                &token,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "accepted");
        assert!(body["ingestion_id"].is_string());
        assert_eq!(h.log.pending().await, 1);

        // Liveness updated best-effort.
        let device = h.store.get_device(device_id).await.unwrap().unwrap();
        assert!(device.last_seen >= device.first_seen);
    }

    #[tokio::test]
    async fn ingest_rejects_device_id_mismatch() {
        let h = harness();
        let (device_id, token) = register_device(&h.app).await;

        let uri = format!("/v1/agents/{device_id}/inventory");
        let other = DeviceId::generate();
        let (status, body) = send(
            &h.app,
            authed(json_request(Method::POST, &uri, envelope_body(other, 1)), &token),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("mismatch"));
        assert_eq!(h.log.pending().await, 0);
    }

    #[tokio::test]
    async fn ingest_rejects_future_collected_at() {
        let h = harness();
        let (device_id, token) = register_device(&h.app).await;

        let mut body = envelope_body(device_id, 1);
        body["collected_at"] = json!(Utc::now() + Duration::seconds(120));
        let uri = format!("/v1/agents/{device_id}/inventory");
        let (status, _) = send(
            &h.app,
            authed(json_request(Method::POST, &uri, body), &token),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.log.pending().await, 0);
    }

    #[tokio::test]
    async fn ingest_rejects_unknown_metric_and_missing_collected_at() {
        let h = harness();
        let (device_id, token) = register_device(&h.app).await;
        let uri = format!("/v1/agents/{device_id}/inventory");

        let mut unknown = envelope_body(device_id, 1);
        unknown["metrics"] = json!({ "gpu.temperature": {} });
        let (status, _) = send(
            &h.app,
            authed(json_request(Method::POST, &uri, unknown), &token),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut missing = envelope_body(device_id, 2);
        missing.as_object_mut().unwrap().remove("collected_at");
        let (status, _) = send(
            &h.app,
            authed(json_request(Method::POST, &uri, missing), &token),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.log.pending().await, 0);
    }

    #[tokio::test]
    async fn ingest_accepts_gzip_and_rejects_garbage_gzip() {
        let h = harness();
        let (device_id, token) = register_device(&h.app).await;
        let uri = format!("/v1/agents/{device_id}/inventory");

        let payload = envelope_body(device_id, 1).to_string();
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(payload.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let request = authed(
            Request::builder()
                .method(Method::POST)
                .uri(&uri)
                .header("content-type", "application/json")
                .header("content-encoding", "gzip")
                .body(Body::from(compressed))
                .unwrap(),
            &token,
        );
        let (status, _) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(h.log.pending().await, 1);

        // Advertised gzip that isn't: 400, nothing published.
        let request = authed(
            Request::builder()
                .method(Method::POST)
                .uri(&uri)
                .header("content-type", "application/json")
                .header("content-encoding", "gzip")
                .body(Body::from("definitely not gzip"))
                .unwrap(),
            &token,
        );
        let (status, _) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.log.pending().await, 1);
    }

    // ── Policy ───────────────────────────────────────────────────────────────

    async fn create_device_policy(app: &Router, device_id: DeviceId, version: i64) {
        let body = json!({
            "scope": "device",
            "device_id": device_id,
            "version": version,
            "config": {
                "interval_seconds": 300,
                "metrics": {
                    "cpu.utilization": { "enabled": true },
                    "memory.usage": { "enabled": true }
                }
            }
        });
        let (status, _) = send(
            app,
            authed(
                json_request(Method::POST, "/v1/admin/policies", body),
                ADMIN_TOKEN,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn policy_fetch_filters_by_capability_and_serves_etag() {
        let h = harness();
        let (device_id, token) = register_device(&h.app).await;
        create_device_policy(&h.app, device_id, 5).await;

        let uri = format!("/v1/agents/{device_id}/policy");
        let response = h
            .app
            .clone()
            .oneshot(authed(
                Request::builder().uri(&uri).body(Body::empty()).unwrap(),
                &token,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let etag = response
            .headers()
            .get("etag")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["version"], 5);
        assert_eq!(body["config"]["interval_seconds"], 300);
        // The device never advertised memory.usage.
        assert!(body["config"]["metrics"].get("memory.usage").is_none());
        assert!(body["config"]["metrics"].get("cpu.utilization").is_some());
        // No scope metadata on the wire.
        assert!(body.get("scope").is_none());
        assert!(body.get("policy_id").is_none());

        // Conditional refetch: 304.
        let request = authed(
            Request::builder()
                .uri(&uri)
                .header("if-none-match", &etag)
                .body(Body::empty())
                .unwrap(),
            &token,
        );
        let (status, _) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn stale_policy_update_conflicts() {
        let h = harness();
        let (device_id, _token) = register_device(&h.app).await;
        create_device_policy(&h.app, device_id, 5).await;

        let (_, listed) = send(
            &h.app,
            authed(
                Request::builder()
                    .uri("/v1/admin/policies")
                    .body(Body::empty())
                    .unwrap(),
                ADMIN_TOKEN,
            ),
        )
        .await;
        let policy_id = listed["policies"][0]["policy_id"].as_str().unwrap().to_string();

        let stale = json!({
            "scope": "device",
            "device_id": device_id,
            "version": 5,
            "config": { "interval_seconds": 600, "metrics": {} }
        });
        let (status, _) = send(
            &h.app,
            authed(
                json_request(Method::PUT, &format!("/v1/admin/policies/{policy_id}"), stale),
                ADMIN_TOKEN,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    async fn create_command(
        app: &Router,
        device_id: DeviceId,
        ttl_seconds: u32,
    ) -> (StatusCode, Value) {
        let body = json!({
            "type": "collect.now",
            "parameters": { "metrics": ["os.info"] },
            "ttl_seconds": ttl_seconds
        });
        send(
            app,
            authed(
                json_request(
                    Method::POST,
                    &format!("/v1/admin/devices/{device_id}/commands"),
                    body,
                ),
                ADMIN_TOKEN,
            ),
        )
        .await
    }

    #[tokio::test]
    async fn command_ttl_bounds_enforced_at_creation() {
        let h = harness();
        let (device_id, _token) = register_device(&h.app).await;

        let (status, _) = create_command(&h.app, device_id, 0).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = create_command(&h.app, device_id, 3601).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = create_command(&h.app, device_id, 120).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn command_flow_claim_ack_idempotent() {
        let h = harness();
        let (device_id, token) = register_device(&h.app).await;
        let (_, created) = create_command(&h.app, device_id, 120).await;
        let command_id = created["command_id"].as_str().unwrap().to_string();

        // Poll claims the command; it shows as executing.
        let uri = format!("/v1/agents/{device_id}/commands");
        let (status, body) = send(
            &h.app,
            authed(Request::builder().uri(&uri).body(Body::empty()).unwrap(), &token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["status"], "executing");

        // A second poll returns nothing: a command appears at most once.
        let (_, body) = send(
            &h.app,
            authed(Request::builder().uri(&uri).body(Body::empty()).unwrap(), &token),
        )
        .await;
        assert!(body.as_array().unwrap().is_empty());

        // Ack completes it.
        let ack_uri = format!("/v1/agents/{device_id}/commands/{command_id}/ack");
        let ack = json!({ "result": { "status": "completed", "metrics": ["os.info"] } });
        let (status, body) = send(
            &h.app,
            authed(json_request(Method::POST, &ack_uri, ack.clone()), &token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");

        // Second ack is a no-op on the first terminal status.
        let late = json!({ "error": "too late" });
        let (status, body) = send(
            &h.app,
            authed(json_request(Method::POST, &ack_uri, late), &token),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");

        // Admin sees the terminal state.
        let (_, body) = send(
            &h.app,
            authed(
                Request::builder()
                    .uri(format!("/v1/admin/commands/{command_id}"))
                    .body(Body::empty())
                    .unwrap(),
                ADMIN_TOKEN,
            ),
        )
        .await;
        assert_eq!(body["status"], "completed");
    }

    #[tokio::test]
    async fn expired_command_invisible_to_poll() {
        let h = harness();
        let (device_id, token) = register_device(&h.app).await;
        let (_, created) = create_command(&h.app, device_id, 60).await;
        let command_id = created["command_id"].as_str().unwrap();

        // The expirer runs while the agent is disconnected.
        let expired = h
            .store
            .expire_commands(Utc::now() + Duration::seconds(120))
            .await
            .unwrap();
        assert_eq!(expired, 1);

        let uri = format!("/v1/agents/{device_id}/commands");
        let (_, body) = send(
            &h.app,
            authed(Request::builder().uri(&uri).body(Body::empty()).unwrap(), &token),
        )
        .await;
        assert!(body.as_array().unwrap().is_empty());

        let cmd = h
            .store
            .get_command(command_id.parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cmd.status, CommandStatus::Expired);
    }

    #[tokio::test]
    async fn poll_limit_leaves_overflow_pending() {
        let h = harness();
        let (device_id, token) = register_device(&h.app).await;
        for _ in 0..3 {
            create_command(&h.app, device_id, 300).await;
        }

        let uri = format!("/v1/agents/{device_id}/commands?limit=2");
        let (_, body) = send(
            &h.app,
            authed(Request::builder().uri(&uri).body(Body::empty()).unwrap(), &token),
        )
        .await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        // The third returns on the next poll.
        let (_, body) = send(
            &h.app,
            authed(Request::builder().uri(&uri).body(Body::empty()).unwrap(), &token),
        )
        .await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    // ── Rate limiting ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn device_rate_limit_returns_429() {
        let h = harness_with_limit(2);
        let (device_id, token) = register_device(&h.app).await;

        let uri = format!("/v1/agents/{device_id}/policy");
        for _ in 0..2 {
            let (status, _) = send(
                &h.app,
                authed(Request::builder().uri(&uri).body(Body::empty()).unwrap(), &token),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _) = send(
            &h.app,
            authed(Request::builder().uri(&uri).body(Body::empty()).unwrap(), &token),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    // ── Operations ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn health_reports_dependencies() {
        let h = harness();
        let (status, body) = send(
            &h.app,
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "ok");
        assert_eq!(body["log"], "ok");
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn metrics_exposition_includes_counters() {
        let h = harness();
        let (device_id, token) = register_device(&h.app).await;
        let uri = format!("/v1/agents/{device_id}/inventory");
        send(
            &h.app,
            authed(json_request(Method::POST, &uri, envelope_body(device_id, 1)), &token),
        )
        .await;

        let response = h
            .app
            .clone()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("fleetd_envelopes_accepted_total 1"));
        assert!(text.contains("fleetd_registrations_total 1"));
    }

    // ── End-to-end: published payload shape ──────────────────────────────────

    #[tokio::test]
    async fn published_envelope_carries_server_fields() {
        let h = harness();
        let (device_id, token) = register_device(&h.app).await;
        let uri = format!("/v1/agents/{device_id}/inventory");
        send(
            &h.app,
            authed(json_request(Method::POST, &uri, envelope_body(device_id, 7)), &token),
        )
        .await;

        let batch = h
            .log
            .fetch(10, std::time::Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        let logged: LoggedEnvelope = serde_json::from_slice(batch[0].payload()).unwrap();
        assert_eq!(logged.envelope.device_id, device_id);
        assert_eq!(logged.envelope.seq, 7);
        assert!(logged.server_received_at <= Utc::now());
        let _: &BTreeMap<MetricName, Value> = &logged.envelope.metrics;
    }

    #[tokio::test]
    async fn disabled_device_refused_and_conflicts_on_reregister() {
        let h = harness();
        let (device_id, token) = register_device(&h.app).await;

        // Administrator disables the device out-of-band.
        let mut device = h.store.get_device(device_id).await.unwrap().unwrap();
        device.status = fleetd_domain::DeviceStatus::Inactive;
        let auth = h.store.device_auth(device_id).await.unwrap().unwrap();
        h.store.create_device(&device, &auth.token_hash).await.unwrap();

        let uri = format!("/v1/agents/{device_id}/policy");
        let (status, _) = send(
            &h.app,
            authed(Request::builder().uri(&uri).body(Body::empty()).unwrap(), &token),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Re-registration cannot resurrect a disabled device.
        let body = json!({
            "device_id": device_id,
            "hostname": "host-1",
            "capabilities": [],
            "agent_version": "1.0.0"
        });
        let (status, _) =
            send(&h.app, json_request(Method::POST, "/v1/agents/register", body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn reregistered_device_remains_usable() {
        // Registering twice with the same device_id leaves the device usable
        // either way.
        let h = harness();
        let (device_id, _t1) = register_device(&h.app).await;
        let (_d, t2) = {
            let body = json!({
                "device_id": device_id,
                "hostname": "host-1",
                "capabilities": [{ "name": "os.info", "version": "1.0" }],
                "agent_version": "1.0.0"
            });
            let (status, body) =
                send(&h.app, json_request(Method::POST, "/v1/agents/register", body)).await;
            assert_eq!(status, StatusCode::OK);
            (device_id, body["auth_token"].as_str().unwrap().to_string())
        };
        let uri = format!("/v1/agents/{device_id}/policy");
        let (status, _) = send(
            &h.app,
            authed(Request::builder().uri(&uri).body(Body::empty()).unwrap(), &t2),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn registered_capabilities_are_stored() {
        let h = harness();
        let (device_id, _token) = register_device(&h.app).await;
        let device = h.store.get_device(device_id).await.unwrap().unwrap();
        assert!(device
            .capabilities
            .iter()
            .any(|c: &Capability| c.name == "os.info"));
    }
}
