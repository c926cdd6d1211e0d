use crate::middleware::MatchedRoute;
use crate::reply::{ApiError, RequestContext};
use crate::state::AppState;
use crate::backend::ExecuteRequest;
use axum::extract::{Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use http::HeaderValue;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName};
use portico_core::error::GatewayError;
use portico_observability::MetricsCollector;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Headers never forwarded to the backend.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Fallback handler: dispatch a request into a mounted plugin route.
pub async fn dispatch(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<HashMap<String, String>>,
    req: Request,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let Some(matched) = state.plugin_router.match_route(method.as_str(), &path) else {
        return ApiError(GatewayError::NotFound(format!("{method} {path}"))).into_response();
    };
    let route = matched.route;
    let attribution = MatchedRoute {
        pattern: route.full_path.clone(),
        plugin_id: Some(route.plugin_id.clone()),
    };

    // Per-route rate-limit override (still keyed per client).
    if let Some(limit) = route.rate_limit {
        let key = format!("route:{}:{}", route.full_path, crate::middleware::client_ip(&req));
        let decision = state
            .rate_limiter
            .check(&key, limit.max, limit.time_window_ms);
        if !decision.allowed {
            let mut res = ApiError(GatewayError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            })
            .into_response();
            res.extensions_mut().insert(attribution);
            return res;
        }
    }

    let timeout_ms = state
        .metrics
        .route_budget(method.as_str(), &route.full_path)
        .map(|budget| budget.timeout_ms)
        .unwrap_or(route.timeout_ms);

    let mut headers: HashMap<String, String> = HashMap::new();
    for (name, value) in req.headers() {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) {
            continue;
        }
        if let Ok(text) = value.to_str() {
            headers.insert(lower, text.to_string());
        }
    }

    let tenant_id = header_value(&headers, &["x-tenant-id"]);
    let actor = header_value(&headers, &["x-user-id", "x-actor", "x-user"]);
    let idempotency_key = header_value(&headers, &["idempotency-key", "x-idempotency-key"]);

    let body = match axum::body::to_bytes(req.into_body(), state.config.timeouts.body_limit).await
    {
        Ok(body) => body,
        Err(e) => {
            let mut res =
                ApiError(GatewayError::BadRequest(format!("unreadable request body: {e}")))
                    .into_response();
            res.extensions_mut().insert(attribution);
            return res;
        }
    };

    let execute_request = ExecuteRequest {
        route: route.full_path.clone(),
        method: method.as_str().to_string(),
        params: matched.params.into_iter().collect(),
        query,
        headers,
        body,
        tenant_id,
        actor,
        idempotency_key,
        capabilities: route.capabilities.clone(),
        timeout_ms,
        request_id: ctx.request_id.clone(),
    };

    // The token fires on timeout, and — through the drop probe — when the
    // client disconnects and this future is dropped mid-flight.
    let cancel = CancellationToken::new();
    let mut probe = DisconnectProbe::new(Arc::clone(&state.metrics), cancel.clone());

    let outcome = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        state
            .backend
            .execute(&route.entry, execute_request, cancel.clone()),
    )
    .await;
    probe.completed();

    let mut res = match outcome {
        Err(_) => {
            cancel.cancel();
            debug!(
                plugin = %route.plugin_id,
                path = %route.full_path,
                timeout_ms,
                "Plugin execution timed out"
            );
            ApiError(GatewayError::Timeout(timeout_ms)).into_response()
        }
        Ok(Err(e)) => ApiError(e).into_response(),
        Ok(Ok(result)) => {
            let status =
                StatusCode::from_u16(result.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let data: Value = serde_json::from_slice(&result.body).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&result.body).into_owned())
            });
            let mut res = ctx.respond(status, data);
            for (name, value) in &result.headers {
                let Ok(name) = name.parse::<HeaderName>() else {
                    continue;
                };
                if name == CONTENT_TYPE || name == CONTENT_LENGTH {
                    continue;
                }
                if let Ok(value) = HeaderValue::from_str(value) {
                    res.headers_mut().insert(name, value);
                }
            }
            res
        }
    };

    res.extensions_mut().insert(attribution);
    res
}

fn header_value(headers: &HashMap<String, String>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| headers.get(*name))
        .cloned()
        .filter(|v| !v.is_empty())
}

/// Cancels the backend and counts the request as cancelled if the dispatch
/// future is dropped (client disconnect) before a response was produced.
struct DisconnectProbe {
    metrics: Arc<MetricsCollector>,
    cancel: CancellationToken,
    completed: bool,
}

impl DisconnectProbe {
    fn new(metrics: Arc<MetricsCollector>, cancel: CancellationToken) -> Self {
        Self {
            metrics,
            cancel,
            completed: false,
        }
    }

    fn completed(&mut self) {
        self.completed = true;
    }
}

impl Drop for DisconnectProbe {
    fn drop(&mut self) {
        if !self.completed {
            self.cancel.cancel();
            self.metrics.record_cancelled();
        }
    }
}
