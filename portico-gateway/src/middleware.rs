use crate::reply::{ApiError, PendingError, RequestContext};
use crate::state::AppState;
use axum::Json;
use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use http::HeaderValue;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use portico_core::envelope::{ErrorBody, failure};
use portico_core::error::GatewayError;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_SCHEMA_VERSION: &str = "x-schema-version";
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Route attribution attached to responses by the dispatcher so the metrics
/// wrap can label plugin traffic.
#[derive(Clone)]
pub struct MatchedRoute {
    pub pattern: String,
    pub plugin_id: Option<String>,
}

/// Outermost middleware: assigns the request ID, threads the request
/// context, finalizes pending error envelopes, and echoes the ID and schema
/// version on every response.
pub async fn request_context(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    let ctx = RequestContext {
        request_id,
        started: Instant::now(),
        api_version: state.config.api_version.clone(),
        expose_internal: state.config.expose_internal_errors(),
    };
    req.extensions_mut().insert(ctx.clone());

    let res = next.run(req).await;
    let mut res = finalize_pending_error(res, &ctx);

    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        res.headers_mut().insert(X_REQUEST_ID, value);
    }
    if let Ok(value) = HeaderValue::from_str(&ctx.api_version) {
        res.headers_mut().insert(X_SCHEMA_VERSION, value);
    }
    res
}

/// Rewrite a response carrying a [`PendingError`] into the full error
/// envelope, preserving status and non-body headers (e.g. `Retry-After`).
fn finalize_pending_error(res: Response, ctx: &RequestContext) -> Response {
    let Some(pending) = res.extensions().get::<PendingError>().cloned() else {
        return res;
    };

    let (parts, _) = res.into_parts();
    let body = ErrorBody::from_error(&pending.0, ctx.expose_internal);
    let mut rebuilt = (parts.status, Json(failure(body, ctx.meta()))).into_response();
    for (name, value) in parts.headers.iter() {
        if *name != CONTENT_TYPE && *name != CONTENT_LENGTH {
            rebuilt.headers_mut().insert(name.clone(), value.clone());
        }
    }
    rebuilt
}

/// Token-bucket rate limiting keyed by client IP. Disabled unless
/// configured; plugin routes may additionally carry their own overrides,
/// consulted by the dispatcher.
pub async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(cfg) = state.config.rate_limit.clone() else {
        return next.run(req).await;
    };

    let key = format!("ip:{}", client_ip(&req));
    let decision = state
        .rate_limiter
        .check(&key, cfg.max, cfg.time_window_ms);

    if !decision.allowed {
        let mut res = ApiError(GatewayError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        })
        .into_response();
        set_rate_headers(&mut res, &decision);
        return res;
    }

    let mut res = next.run(req).await;
    set_rate_headers(&mut res, &decision);
    res
}

fn set_rate_headers(res: &mut Response, decision: &RateDecision) {
    res.headers_mut()
        .insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    res.headers_mut()
        .insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
}

pub(crate) fn client_ip(req: &Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Per-request timeout: the route budget when one is registered, else the
/// global request timeout. SSE streams are exempt.
pub async fn enforce_timeout(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if path.ends_with("/events/registry") {
        return next.run(req).await;
    }

    let budget_ms = state
        .metrics
        .route_budget(req.method().as_str(), &path)
        .map(|b| b.timeout_ms)
        .unwrap_or(state.config.timeouts.request_timeout_ms);

    match tokio::time::timeout(Duration::from_millis(budget_ms), next.run(req)).await {
        Ok(res) => res,
        Err(_) => ApiError(GatewayError::Timeout(budget_ms)).into_response(),
    }
}

/// Metrics wrap: records `(method, matched pattern, status, duration,
/// plugin)` once the response is produced.
pub async fn track_metrics(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().as_str().to_string();
    let fallback_pattern = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let started = Instant::now();
    let res = next.run(req).await;
    let duration = started.elapsed();

    let (pattern, plugin_id) = match res.extensions().get::<MatchedRoute>() {
        Some(matched) => (matched.pattern.clone(), matched.plugin_id.clone()),
        None => (fallback_pattern, None),
    };

    let status = res.status().as_u16();
    state.metrics.record_request(
        &method,
        &pattern,
        status,
        duration.as_millis() as u64,
        plugin_id.as_deref(),
    );
    state
        .exporter
        .record_request(&pattern, &method, status, duration.as_secs_f64());
    res
}

/// Outcome of a rate-limit check.
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub retry_after_secs: u64,
}

/// Token-bucket limiter. Buckets are keyed (per IP, or per route for
/// overrides) and refill continuously.
pub struct RateLimiter {
    buckets: DashMap<String, Mutex<Bucket>>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    pub fn check(&self, key: &str, max: u64, window_ms: u64) -> RateDecision {
        let max_tokens = max.max(1) as f64;
        let refill_per_sec = max_tokens / (window_ms.max(1) as f64 / 1000.0);

        let entry = self.buckets.entry(key.to_string()).or_insert_with(|| {
            Mutex::new(Bucket {
                tokens: max_tokens,
                last_refill: Instant::now(),
            })
        });
        let mut bucket = entry.lock().expect("rate bucket lock poisoned");

        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(max_tokens);
        bucket.last_refill = Instant::now();

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateDecision {
                allowed: true,
                limit: max,
                remaining: bucket.tokens as u64,
                retry_after_secs: 0,
            }
        } else {
            let deficit = 1.0 - bucket.tokens;
            RateDecision {
                allowed: false,
                limit: max,
                remaining: 0,
                retry_after_secs: ((deficit / refill_per_sec).ceil() as u64).max(1),
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
