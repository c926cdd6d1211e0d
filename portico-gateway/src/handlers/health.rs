use crate::reply::RequestContext;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use portico_core::envelope::ErrorBody;
use portico_registry::validator;
use serde_json::json;

/// `GET {base}/plugins/health` — registry/mount health envelope.
pub async fn plugins_health(ctx: RequestContext, State(state): State<AppState>) -> Response {
    let snapshot = state.discovery.snapshot();
    let readiness = state.readiness.snapshot();

    let issues: Vec<serde_json::Value> = snapshot
        .manifests
        .iter()
        .filter_map(|entry| {
            let errors = validator::validate_structure(&entry.manifest);
            if errors.is_empty() {
                None
            } else {
                Some(json!({ "pluginId": entry.plugin_id, "errors": errors }))
            }
        })
        .collect();

    let reason = readiness.reason();
    let message = if readiness.ready() {
        format!(
            "registry rev {} healthy, {} routes mounted",
            snapshot.rev, readiness.routes_count
        )
    } else {
        format!("registry rev {} degraded: {}", snapshot.rev, reason.as_str())
    };

    ctx.ok(json!({
        "status": if readiness.ready() { "healthy" } else { "degraded" },
        "ready": readiness.ready(),
        "reason": reason,
        "snapshot": {
            "rev": snapshot.rev,
            "generatedAt": snapshot.generated_at,
            "expiresAt": snapshot.expires_at,
            "checksum": snapshot.checksum,
            "partial": snapshot.partial,
            "stale": snapshot.stale,
            "corrupted": snapshot.corrupted,
        },
        "discovery": { "errors": snapshot.errors },
        "validation": { "issues": issues },
        "mount": {
            "routesCount": readiness.routes_count,
            "routeErrors": readiness.route_errors,
            "routeFailures": readiness.route_failures,
            "lastMountTs": readiness.last_mount_ts,
            "lastMountDurationMs": readiness.last_mount_duration_ms,
        },
        "message": message,
    }))
}

/// Liveness: the process is up.
pub async fn live(ctx: RequestContext) -> Response {
    ctx.ok(json!({ "status": "alive" }))
}

/// Readiness: 200 when ready, 503 with the blocking reason otherwise.
pub async fn ready(ctx: RequestContext, State(state): State<AppState>) -> Response {
    let readiness = state.readiness.snapshot();
    if readiness.ready() {
        return ctx.ok(json!({ "status": "ready", "reason": "ready" }));
    }

    let reason = readiness.reason();
    ctx.fail(
        StatusCode::SERVICE_UNAVAILABLE,
        ErrorBody {
            code: "BACKEND_UNAVAILABLE".to_string(),
            message: format!("gateway not ready: {}", reason.as_str()),
            details: Some(json!({
                "reason": reason,
                "registryLoaded": readiness.registry_loaded,
                "registryPartial": readiness.registry_partial,
                "registryStale": readiness.registry_stale,
                "mountInProgress": readiness.mount_in_progress,
            })),
        },
    )
}
