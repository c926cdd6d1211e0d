use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use http::HeaderValue;
use http::header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH};
use serde_json::{Map, Value, json};

/// `GET /openapi.json` and `GET {base}/openapi.json` — generated document.
///
/// The ETag derives from the snapshot rev and the route-table version, so
/// clients revalidate cheaply across mounts.
pub async fn openapi(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let snapshot = state.discovery.snapshot();
    let etag = format!(
        "\"portico-{}-{}\"",
        snapshot.rev,
        state.plugin_router.version()
    );

    if headers
        .get(IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|inm| inm == etag)
    {
        let mut res = StatusCode::NOT_MODIFIED.into_response();
        set_cache_headers(&mut res, &etag);
        return res;
    }

    let mut paths: Map<String, Value> = Map::new();
    for (method, path, summary) in core_operations(&state.config.base_path) {
        upsert_operation(&mut paths, &path, method, json!({ "summary": summary }));
    }
    for route in state.plugin_router.all_routes() {
        if route.alias {
            continue;
        }
        upsert_operation(
            &mut paths,
            &to_openapi_path(&route.full_path),
            route.method.as_str(),
            json!({
                "summary": format!("Plugin route ({})", route.plugin_id),
                "tags": [route.plugin_id],
            }),
        );
    }

    let doc = json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Portico Gateway API",
            "version": state.config.api_version,
        },
        "paths": paths,
    });

    let mut res = Json(doc).into_response();
    set_cache_headers(&mut res, &etag);
    res
}

fn set_cache_headers(res: &mut Response, etag: &str) {
    if let Ok(value) = HeaderValue::from_str(etag) {
        res.headers_mut().insert(ETAG, value);
    }
    res.headers_mut().insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );
}

fn upsert_operation(paths: &mut Map<String, Value>, path: &str, method: &str, operation: Value) {
    let entry = paths.entry(path.to_string()).or_insert_with(|| json!({}));
    if let Some(map) = entry.as_object_mut() {
        map.insert(method.to_ascii_lowercase(), operation);
    }
}

/// `:param` segments become OpenAPI `{param}` placeholders.
fn to_openapi_path(path: &str) -> String {
    path.split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => format!("{{{name}}}"),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn core_operations(base: &str) -> Vec<(&'static str, String, &'static str)> {
    vec![
        ("get", format!("{base}/events/registry"), "Registry/health SSE stream"),
        ("get", format!("{base}/plugins/registry"), "Discovered plugin manifests"),
        ("get", format!("{base}/plugins/health"), "Registry and mount health"),
        ("get", format!("{base}/studio/registry"), "Aggregated studio metadata"),
        ("post", format!("{base}/cache/invalidate"), "Force discovery refresh"),
        ("get", format!("{base}/routes"), "Debug route listing"),
        ("get", format!("{base}/health/live"), "Liveness"),
        ("get", format!("{base}/health/ready"), "Readiness"),
    ]
}
