//! Integration tests for the core-owned gateway endpoints.
//!
//! Uses `tower::ServiceExt::oneshot` against the in-memory router — every
//! test boots a fresh gateway over a temporary plugin directory.

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use portico_core::config::GatewayConfig;
use portico_gateway::platform::PlatformServices;
use portico_gateway::{AppState, EchoBackend, Gateway};
use portico_registry::FsDiscoveryProvider;
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt; // .oneshot()

// ── Helpers ───────────────────────────────────────────────────

fn write_plugin(root: &Path, id: &str, manifest: serde_json::Value, handler_files: &[&str]) {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("manifest.json"),
        serde_json::to_vec_pretty(&manifest).unwrap(),
    )
    .unwrap();
    for file in handler_files {
        std::fs::write(dir.join(file), "export default () => ({});").unwrap();
    }
}

fn hello_manifest(id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "version": "1.0.0",
        "rest": {
            "routes": [
                { "method": "GET", "path": "/hello", "handler": "./h.js#default" }
            ]
        },
        "studio": { "panel": "default" }
    })
}

async fn boot(root: &Path, mutate: impl FnOnce(&mut GatewayConfig)) -> Gateway {
    let mut config = GatewayConfig::default();
    config.plugins.dir = root.to_path_buf();
    mutate(&mut config);
    Gateway::bootstrap(
        config,
        Arc::new(FsDiscoveryProvider::new(root)),
        Arc::new(EchoBackend::new()),
        Arc::new(PlatformServices::with_defaults()),
    )
    .await
    .unwrap()
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Liveness / readiness ─────────────────────────────────────

#[tokio::test]
async fn live_returns_enveloped_200() {
    let tmp = tempfile::tempdir().unwrap();
    let gateway = boot(tmp.path(), |_| {}).await;

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/health/live"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["ok"], true);
    assert_eq!(j["data"]["status"], "alive");
    assert!(j["meta"]["requestId"].as_str().is_some());
}

#[tokio::test]
async fn ready_returns_200_after_clean_bootstrap() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(tmp.path(), "p1", hello_manifest("p1"), &["h.js"]);
    let gateway = boot(tmp.path(), |_| {}).await;

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/health/ready"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["data"]["reason"], "ready");
}

#[tokio::test]
async fn ready_returns_503_when_registry_partial() {
    // A missing plugins directory yields a partial snapshot.
    let missing = std::env::temp_dir().join("portico-no-such-dir-e4f1");
    let gateway = boot(&missing, |_| {}).await;

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/health/ready"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let j = body_json(resp).await;
    assert_eq!(j["ok"], false);
    assert_eq!(j["error"]["details"]["reason"], "registry_partial");
}

// ── Request IDs & envelope metadata ──────────────────────────

#[tokio::test]
async fn inbound_request_id_is_echoed_everywhere() {
    let tmp = tempfile::tempdir().unwrap();
    let gateway = boot(tmp.path(), |_| {}).await;

    let req = Request::builder()
        .method(Method::GET)
        .uri("/api/v1/health/live")
        .header("x-request-id", "req-abc-123")
        .body(Body::empty())
        .unwrap();
    let resp = gateway.router().oneshot(req).await.unwrap();
    assert_eq!(resp.headers()["x-request-id"], "req-abc-123");
    let j = body_json(resp).await;
    assert_eq!(j["meta"]["requestId"], "req-abc-123");
}

#[tokio::test]
async fn generated_request_id_matches_header_and_meta() {
    let tmp = tempfile::tempdir().unwrap();
    let gateway = boot(tmp.path(), |_| {}).await;

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/health/live"))
        .await
        .unwrap();
    let header_id = resp.headers()["x-request-id"].to_str().unwrap().to_string();
    assert!(!header_id.is_empty());
    let j = body_json(resp).await;
    assert_eq!(j["meta"]["requestId"], header_id.as_str());
}

#[tokio::test]
async fn schema_version_header_is_present() {
    let tmp = tempfile::tempdir().unwrap();
    let gateway = boot(tmp.path(), |_| {}).await;

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/health/live"))
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-schema-version"], "v1");
}

#[tokio::test]
async fn unknown_path_gets_enveloped_404() {
    let tmp = tempfile::tempdir().unwrap();
    let gateway = boot(tmp.path(), |_| {}).await;

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/nope/nothing"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let j = body_json(resp).await;
    assert_eq!(j["ok"], false);
    assert_eq!(j["error"]["code"], "NOT_FOUND");
    assert!(j["meta"]["requestId"].as_str().is_some());
    assert!(j["meta"]["durationMs"].as_u64().is_some());
}

// ── Registry endpoints ───────────────────────────────────────

#[tokio::test]
async fn plugins_registry_lists_manifests_with_validation() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(tmp.path(), "p1", hello_manifest("p1"), &["h.js"]);
    let gateway = boot(tmp.path(), |_| {}).await;

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/plugins/registry"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["data"]["apiBasePath"], "/api/v1");
    let manifests = j["data"]["manifests"].as_array().unwrap();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0]["pluginId"], "p1");
    assert_eq!(manifests[0]["validation"]["valid"], true);
    assert!(manifests[0]["discoveredAt"].as_str().is_some());
}

#[tokio::test]
async fn plugins_health_reports_healthy_registry() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(tmp.path(), "p1", hello_manifest("p1"), &["h.js"]);
    let gateway = boot(tmp.path(), |_| {}).await;

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/plugins/health"))
        .await
        .unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["data"]["status"], "healthy");
    assert_eq!(j["data"]["snapshot"]["rev"], 1);
    assert_eq!(j["data"]["mount"]["routesCount"], 1);
    assert!(j["data"]["message"].as_str().unwrap().contains("rev 1"));
}

#[tokio::test]
async fn studio_registry_filters_plugins_with_studio_section() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(tmp.path(), "p1", hello_manifest("p1"), &["h.js"]);
    write_plugin(
        tmp.path(),
        "quiet",
        serde_json::json!({ "id": "quiet", "version": "0.1.0" }),
        &[],
    );
    let gateway = boot(tmp.path(), |_| {}).await;

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/studio/registry"))
        .await
        .unwrap();
    let j = body_json(resp).await;
    let plugins = j["data"]["plugins"].as_array().unwrap();
    assert_eq!(plugins.len(), 1);
    assert_eq!(plugins[0]["pluginId"], "p1");
    assert_eq!(plugins[0]["studio"]["panel"], "default");
}

// ── Cache invalidation ───────────────────────────────────────

#[tokio::test]
async fn cache_invalidate_without_changes_keeps_rev() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(tmp.path(), "p1", hello_manifest("p1"), &["h.js"]);
    let gateway = boot(tmp.path(), |_| {}).await;

    let resp = gateway
        .router()
        .oneshot(post_req("/api/v1/cache/invalidate"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["data"]["previousRev"], 1);
    assert_eq!(j["data"]["newRev"], 1);
    assert_eq!(j["data"]["pluginsDiscovered"], 1);
    assert!(j["data"]["durationMs"].as_u64().is_some());
}

#[tokio::test]
async fn concurrent_cache_invalidations_agree_on_rev() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(tmp.path(), "p1", hello_manifest("p1"), &["h.js"]);
    let gateway = boot(tmp.path(), |_| {}).await;

    let (a, b) = tokio::join!(
        gateway.router().oneshot(post_req("/api/v1/cache/invalidate")),
        gateway.router().oneshot(post_req("/api/v1/cache/invalidate")),
    );
    let a = body_json(a.unwrap()).await;
    let b = body_json(b.unwrap()).await;
    assert_eq!(a["data"]["newRev"], b["data"]["newRev"]);
}

#[tokio::test]
async fn cache_invalidate_picks_up_new_plugins() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(tmp.path(), "p1", hello_manifest("p1"), &["h.js"]);
    let gateway = boot(tmp.path(), |_| {}).await;

    write_plugin(tmp.path(), "p2", hello_manifest("p2"), &["h.js"]);
    let resp = gateway
        .router()
        .oneshot(post_req("/api/v1/cache/invalidate"))
        .await
        .unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["data"]["previousRev"], 1);
    assert_eq!(j["data"]["newRev"], 2);
    assert_eq!(j["data"]["pluginsDiscovered"], 2);
}

// ── Debug routes & OpenAPI ───────────────────────────────────

#[tokio::test]
async fn routes_endpoint_lists_core_and_plugin_routes_ordered() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(tmp.path(), "p1", hello_manifest("p1"), &["h.js"]);
    let gateway = boot(tmp.path(), |_| {}).await;

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/routes"))
        .await
        .unwrap();
    let j = body_json(resp).await;
    let routes = j["data"]["routes"].as_array().unwrap();

    let urls: Vec<&str> = routes.iter().map(|r| r["url"].as_str().unwrap()).collect();
    let mut sorted = urls.clone();
    sorted.sort();
    assert_eq!(urls, sorted, "routes must be ordered by url");

    assert!(routes.iter().any(|r| r["url"] == "/api/v1/plugins/health"));
    let plugin_route = routes
        .iter()
        .find(|r| r["url"] == "/api/v1/plugins/p1/hello")
        .expect("plugin route listed");
    assert_eq!(plugin_route["method"], "GET");
    assert_eq!(plugin_route["pluginId"], "p1");
}

#[tokio::test]
async fn openapi_carries_etag_and_revalidates() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(tmp.path(), "p1", hello_manifest("p1"), &["h.js"]);
    let gateway = boot(tmp.path(), |_| {}).await;

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/openapi.json"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let etag = resp.headers()["etag"].to_str().unwrap().to_string();
    assert_eq!(resp.headers()["cache-control"], "public, max-age=3600");

    let j = body_json(resp).await;
    assert_eq!(j["openapi"], "3.0.3");
    assert!(j["paths"].get("/api/v1/plugins/p1/hello").is_some());

    let req = Request::builder()
        .method(Method::GET)
        .uri("/api/v1/openapi.json")
        .header("if-none-match", etag)
        .body(Body::empty())
        .unwrap();
    let resp = gateway.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn openapi_is_also_served_at_root() {
    let tmp = tempfile::tempdir().unwrap();
    let gateway = boot(tmp.path(), |_| {}).await;

    let resp = gateway.router().oneshot(get_req("/openapi.json")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ── Metrics ──────────────────────────────────────────────────

#[tokio::test]
async fn prometheus_exposition_reflects_served_requests() {
    let tmp = tempfile::tempdir().unwrap();
    let gateway = boot(tmp.path(), |_| {}).await;
    let state: AppState = gateway.state().clone();

    gateway
        .router()
        .oneshot(get_req("/api/v1/health/live"))
        .await
        .unwrap();

    let resp = gateway.router().oneshot(get_req("/metrics")).await.unwrap();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("portico_http_requests_total"));

    let snapshot = state.metrics.snapshot();
    assert!(snapshot.requests.total >= 1);
}

// ── Rate limiting ────────────────────────────────────────────

#[tokio::test]
async fn global_rate_limit_rejects_with_429_and_retry_after() {
    let tmp = tempfile::tempdir().unwrap();
    let gateway = boot(tmp.path(), |config| {
        config.rate_limit = Some(portico_core::config::RateLimitConfig {
            max: 2,
            time_window_ms: 60_000,
        });
    })
    .await;

    for _ in 0..2 {
        let resp = gateway
            .router()
            .oneshot(get_req("/api/v1/health/live"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-ratelimit-limit"], "2");
    }

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/health/live"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key("retry-after"));
    let j = body_json(resp).await;
    assert_eq!(j["error"]["code"], "RATE_LIMITED");
}

// ── CORS ─────────────────────────────────────────────────────

#[tokio::test]
async fn dev_profile_allows_localhost_origin() {
    let tmp = tempfile::tempdir().unwrap();
    let gateway = boot(tmp.path(), |_| {}).await;

    let req = Request::builder()
        .method(Method::GET)
        .uri("/api/v1/health/live")
        .header("origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let resp = gateway.router().oneshot(req).await.unwrap();
    assert_eq!(
        resp.headers()["access-control-allow-origin"],
        "http://localhost:3000"
    );
}
