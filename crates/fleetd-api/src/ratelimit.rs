use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Path, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;

use crate::error::ApiError;
use crate::state::AppState;

/// Sliding-window request limiter.
///
/// One timestamp deque per key; a request is admitted while fewer than
/// `max_per_window` timestamps fall inside the window. Keys are
/// `device:<id>` on agent routes and `addr:<ip>` elsewhere.
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    entries: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_window: max_per_minute,
            window: Duration::from_secs(60),
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn with_window(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record an arrival for `key`; false means over the cap.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        // Drop keys whose whole window has drained, so the map doesn't grow
        // with one entry per device forever.
        if entries.len() > 10_000 {
            entries.retain(|_, q| {
                q.back()
                    .is_some_and(|t| now.duration_since(*t) < self.window)
            });
        }

        let queue = entries.entry(key.to_string()).or_default();
        while queue
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            queue.pop_front();
        }

        if queue.len() >= self.max_per_window as usize {
            return false;
        }
        queue.push_back(now);
        true
    }
}

/// Agent routes: keyed by the device id in the path.
pub async fn limit_by_device(
    State(state): State<AppState>,
    Path(params): Path<std::collections::HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Response {
    let key = match params.get("id") {
        Some(id) => format!("device:{id}"),
        None => "device:unknown".to_string(),
    };
    if !state.limiter.check(&key) {
        state.metrics.rate_limited.inc();
        return ApiError::too_many_requests("rate limit exceeded").into_response();
    }
    next.run(request).await
}

/// Everything else: keyed by client address.
pub async fn limit_by_addr(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let key = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| format!("addr:{}", addr.ip()))
        .unwrap_or_else(|| "addr:unknown".to_string());
    if !state.limiter.check(&key) {
        state.metrics.rate_limited.inc();
        return ApiError::too_many_requests("rate limit exceeded").into_response();
    }
    next.run(request).await
}
