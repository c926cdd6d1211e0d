use crate::reply::RequestContext;
use crate::state::AppState;
use axum::extract::State;
use axum::response::Response;
use serde_json::json;

/// `GET {base}/studio/registry` — aggregated UI metadata for manifests
/// carrying a `studio` section.
pub async fn studio_registry(ctx: RequestContext, State(state): State<AppState>) -> Response {
    let snapshot = state.discovery.snapshot();

    let plugins: Vec<serde_json::Value> = snapshot
        .manifests
        .iter()
        .filter_map(|entry| {
            entry.manifest.studio.as_ref().map(|studio| {
                json!({
                    "pluginId": entry.plugin_id,
                    "version": entry.manifest.version,
                    "studio": studio,
                })
            })
        })
        .collect();

    ctx.ok(json!({
        "rev": snapshot.rev,
        "plugins": plugins,
    }))
}
