use crate::reply::RequestContext;
use crate::state::AppState;
use axum::extract::State;
use axum::response::Response;
use portico_registry::validator;
use serde_json::json;

/// `GET {base}/plugins/registry` — every discovered manifest plus its
/// validation verdict.
pub async fn plugins_registry(ctx: RequestContext, State(state): State<AppState>) -> Response {
    let snapshot = state.discovery.snapshot();

    let manifests: Vec<serde_json::Value> = snapshot
        .manifests
        .iter()
        .map(|entry| {
            let errors = validator::validate_structure(&entry.manifest);
            json!({
                "pluginId": entry.plugin_id,
                "manifest": entry.manifest,
                "pluginRoot": entry.plugin_root,
                "source": entry.source,
                "discoveredAt": entry.discovered_at,
                "buildTimestamp": entry.build_timestamp,
                "validation": {
                    "valid": errors.is_empty(),
                    "errors": errors,
                },
            })
        })
        .collect();

    ctx.ok(json!({
        "manifests": manifests,
        "apiBasePath": state.config.base_path,
    }))
}
