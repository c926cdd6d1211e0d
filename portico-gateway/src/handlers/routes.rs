use crate::reply::RequestContext;
use crate::state::AppState;
use axum::extract::State;
use axum::response::Response;
use serde_json::json;

/// `GET {base}/routes` — debug listing of the API surface: core endpoints
/// plus every mounted plugin route, ordered by url then method.
pub async fn list_routes(ctx: RequestContext, State(state): State<AppState>) -> Response {
    let base = &state.config.base_path;

    let mut routes: Vec<serde_json::Value> = core_routes(base)
        .into_iter()
        .map(|(method, url)| json!({ "method": method, "url": url }))
        .collect();

    for route in state.plugin_router.all_routes() {
        if route.alias {
            continue;
        }
        routes.push(json!({
            "method": route.method.as_str(),
            "url": route.full_path,
            "pluginId": route.plugin_id,
        }));
    }

    routes.sort_by(|a, b| {
        let left = (a["url"].as_str().unwrap_or(""), a["method"].as_str().unwrap_or(""));
        let right = (b["url"].as_str().unwrap_or(""), b["method"].as_str().unwrap_or(""));
        left.cmp(&right)
    });

    ctx.ok(json!({ "routes": routes, "total": routes.len() }))
}

fn core_routes(base: &str) -> Vec<(&'static str, String)> {
    vec![
        ("GET", format!("{base}/events/registry")),
        ("GET", format!("{base}/plugins/registry")),
        ("GET", format!("{base}/plugins/health")),
        ("GET", format!("{base}/studio/registry")),
        ("POST", format!("{base}/cache/invalidate")),
        ("GET", format!("{base}/routes")),
        ("GET", format!("{base}/openapi.json")),
        ("GET", format!("{base}/health/live")),
        ("GET", format!("{base}/health/ready")),
    ]
}
