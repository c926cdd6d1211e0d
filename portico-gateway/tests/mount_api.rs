//! Mount orchestrator scenarios: happy mounts, validation drops, failures,
//! conflicts, idempotent re-application, and incremental change cycles.

use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use portico_core::config::GatewayConfig;
use portico_core::error::GatewayError;
use portico_core::manifest::{ManifestV3, RestRoute};
use portico_gateway::backend::{EntryHandle, ExecuteRequest, ExecuteResult};
use portico_gateway::platform::PlatformServices;
use portico_gateway::{EchoBackend, ExecuteBackend, Gateway, MountOrchestrator};
use portico_registry::FsDiscoveryProvider;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
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

async fn boot_with_backend(
    root: &Path,
    backend: Arc<dyn ExecuteBackend>,
    mutate: impl FnOnce(&mut GatewayConfig),
) -> Gateway {
    let mut config = GatewayConfig::default();
    config.plugins.dir = root.to_path_buf();
    mutate(&mut config);
    Gateway::bootstrap(
        config,
        Arc::new(FsDiscoveryProvider::new(root)),
        backend,
        Arc::new(PlatformServices::with_defaults()),
    )
    .await
    .unwrap()
}

async fn boot(root: &Path) -> Gateway {
    boot_with_backend(root, Arc::new(EchoBackend::new()), |_| {}).await
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Backend that refuses every mount.
struct RefusingBackend;

#[async_trait]
impl ExecuteBackend for RefusingBackend {
    async fn prepare(
        &self,
        _manifest: &ManifestV3,
        _route: &RestRoute,
    ) -> Result<EntryHandle, GatewayError> {
        Err(GatewayError::Mount("loader rejected artifact".into()))
    }

    async fn execute(
        &self,
        _entry: &EntryHandle,
        _request: ExecuteRequest,
        _cancel: CancellationToken,
    ) -> Result<ExecuteResult, GatewayError> {
        Err(GatewayError::BackendUnavailable("unreachable".into()))
    }
}

/// Backend whose handlers block until cancelled (for timeout tests).
struct SlowBackend {
    inner: EchoBackend,
}

#[async_trait]
impl ExecuteBackend for SlowBackend {
    async fn prepare(
        &self,
        manifest: &ManifestV3,
        route: &RestRoute,
    ) -> Result<EntryHandle, GatewayError> {
        self.inner.prepare(manifest, route).await
    }

    async fn execute(
        &self,
        entry: &EntryHandle,
        request: ExecuteRequest,
        cancel: CancellationToken,
    ) -> Result<ExecuteResult, GatewayError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(GatewayError::Internal("cancelled".into())),
            _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {
                self.inner.execute(entry, request, cancel).await
            }
        }
    }
}

// ── Scenario: happy mount ────────────────────────────────────

#[tokio::test]
async fn happy_mount_serves_wrapped_plugin_responses() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(
        tmp.path(),
        "p1",
        serde_json::json!({
            "id": "p1", "version": "1.0.0",
            "rest": { "routes": [
                { "method": "GET", "path": "/hello", "handler": "./h.js#default" }
            ]}
        }),
        &["h.js"],
    );
    write_plugin(
        tmp.path(),
        "p2",
        serde_json::json!({
            "id": "p2", "version": "1.0.0",
            "rest": { "routes": [
                { "method": "POST", "path": "/echo", "handler": "./e.js#echoHandler" }
            ]}
        }),
        &["e.js"],
    );

    let gateway = boot(tmp.path()).await;

    let readiness = gateway.state().readiness.snapshot();
    assert!(readiness.plugin_routes_mounted);
    assert!(!readiness.mount_in_progress);
    assert_eq!(readiness.routes_count, 2);
    assert_eq!(readiness.route_errors, 0);
    assert!(readiness.last_mount_ts.is_some());

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/plugins/p1/hello"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["ok"], true);
    assert_eq!(j["data"]["plugin"], "p1");
    assert!(j["meta"]["requestId"].as_str().is_some());

    let resp = gateway
        .router()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/plugins/p2/echo")
                .header("content-type", "application/json")
                .header("x-tenant-id", "acme")
                .body(Body::from(r#"{"msg":"hi"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["data"]["echo"]["msg"], "hi");
    assert_eq!(j["data"]["tenantId"], "acme");
}

#[tokio::test]
async fn path_params_reach_the_backend() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(
        tmp.path(),
        "audit",
        serde_json::json!({
            "id": "audit", "version": "1.0.0",
            "rest": {
                "basePath": "/v1/audit",
                "routes": [
                    { "method": "GET", "path": "/reports/:id", "handler": "./h.js#getReport" }
                ]
            }
        }),
        &["h.js"],
    );
    let gateway = boot(tmp.path()).await;

    // Versioned basePath is rebased onto the gateway base path.
    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/audit/reports/42"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["data"]["params"]["id"], "42");
}

#[tokio::test]
async fn unprefixed_alias_serves_during_transition() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(
        tmp.path(),
        "audit",
        serde_json::json!({
            "id": "audit", "version": "1.0.0",
            "rest": {
                "basePath": "/v1/audit",
                "routes": [
                    { "method": "GET", "path": "/summary", "handler": "./h.js#summary" }
                ]
            }
        }),
        &["h.js"],
    );
    let gateway = boot(tmp.path()).await;

    let resp = gateway
        .router()
        .oneshot(get_req("/summary"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ── Scenario: partial validation failure ─────────────────────

#[tokio::test]
async fn missing_handler_drops_only_that_route() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(
        tmp.path(),
        "p1",
        serde_json::json!({
            "id": "p1", "version": "1.0.0",
            "rest": { "routes": [
                { "method": "GET", "path": "/good", "handler": "./h.js#default" },
                { "method": "GET", "path": "/bad", "handler": "./missing.js#default" }
            ]}
        }),
        &["h.js"],
    );
    let gateway = boot(tmp.path()).await;

    let readiness = gateway.state().readiness.snapshot();
    assert_eq!(readiness.routes_count, 1);
    assert_eq!(readiness.route_errors, 0);
    assert!(readiness.plugin_routes_mounted);

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/plugins/p1/good"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/plugins/p1/bad"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // The dropped route is absent from the debug listing.
    let resp = gateway.router().oneshot(get_req("/api/v1/routes")).await.unwrap();
    let j = body_json(resp).await;
    let urls: Vec<&str> = j["data"]["routes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["url"].as_str().unwrap())
        .collect();
    assert!(urls.contains(&"/api/v1/plugins/p1/good"));
    assert!(!urls.contains(&"/api/v1/plugins/p1/bad"));
}

#[tokio::test]
async fn plugin_with_every_route_invalid_fails_once() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(
        tmp.path(),
        "broken",
        serde_json::json!({
            "id": "broken", "version": "1.0.0",
            "rest": { "routes": [
                { "method": "GET", "path": "/a", "handler": "./gone.js#a" },
                { "method": "GET", "path": "/b", "handler": "./gone.js#b" }
            ]}
        }),
        &[],
    );
    let gateway = boot(tmp.path()).await;

    let readiness = gateway.state().readiness.snapshot();
    assert!(!readiness.plugin_routes_mounted);
    assert_eq!(readiness.routes_count, 0);
    assert_eq!(readiness.route_failures.len(), 1);
    assert_eq!(readiness.route_failures[0].id, "broken");
    assert!(
        readiness.route_failures[0]
            .error
            .starts_with("rest_validation_failed")
    );
}

#[tokio::test]
async fn plugin_without_rest_routes_is_a_noop() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(
        tmp.path(),
        "quiet",
        serde_json::json!({ "id": "quiet", "version": "0.1.0" }),
        &[],
    );
    let gateway = boot(tmp.path()).await;

    let readiness = gateway.state().readiness.snapshot();
    assert!(readiness.plugin_routes_mounted);
    assert_eq!(readiness.routes_count, 0);
    assert_eq!(readiness.route_errors, 0);
}

// ── Scenario: mount failures ─────────────────────────────────

#[tokio::test]
async fn backend_refusal_is_recorded_per_plugin() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(
        tmp.path(),
        "p1",
        serde_json::json!({
            "id": "p1", "version": "1.0.0",
            "rest": { "routes": [
                { "method": "GET", "path": "/x", "handler": "./h.js#default" }
            ]}
        }),
        &["h.js"],
    );
    let gateway = boot_with_backend(tmp.path(), Arc::new(RefusingBackend), |_| {}).await;

    let readiness = gateway.state().readiness.snapshot();
    assert!(!readiness.plugin_routes_mounted);
    assert_eq!(readiness.route_failures.len(), 1);
    assert_eq!(readiness.route_failures[0].id, "p1");
    assert!(
        readiness.route_failures[0]
            .error
            .starts_with("rest_mount_failed")
    );

    let mount = gateway.state().metrics.last_plugin_mount_snapshot().unwrap();
    assert_eq!(mount.succeeded, 0);
    assert_eq!(mount.failed, 1);
}

#[tokio::test]
async fn route_conflict_records_failure_and_keeps_first_writer() {
    let tmp = tempfile::tempdir().unwrap();
    for id in ["alpha", "beta"] {
        write_plugin(
            tmp.path(),
            id,
            serde_json::json!({
                "id": id, "version": "1.0.0",
                "rest": {
                    "basePath": "/v1/shared",
                    "routes": [
                        { "method": "GET", "path": "/thing", "handler": "./h.js#default" }
                    ]
                }
            }),
            &["h.js"],
        );
    }
    let gateway = boot(tmp.path()).await;

    let readiness = gateway.state().readiness.snapshot();
    assert_eq!(readiness.routes_count, 1, "exactly one owner of the path");
    assert_eq!(readiness.route_failures.len(), 1);
    assert!(
        readiness.route_failures[0]
            .error
            .contains("rest_route_conflict")
    );

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/shared/thing"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ── Budgets & timeouts ───────────────────────────────────────

#[tokio::test]
async fn every_mounted_route_has_exactly_one_budget_owner() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(
        tmp.path(),
        "p1",
        serde_json::json!({
            "id": "p1", "version": "1.0.0",
            "rest": { "routes": [
                { "method": "GET", "path": "/a", "handler": "./h.js#a", "timeoutMs": 5000 },
                { "method": "POST", "path": "/b", "handler": "./h.js#b" }
            ]}
        }),
        &["h.js"],
    );
    let gateway = boot(tmp.path()).await;
    let state = gateway.state();

    for route in state.plugin_router.all_routes() {
        if route.alias {
            continue;
        }
        let budget = state
            .metrics
            .route_budget(route.method.as_str(), &route.full_path)
            .expect("budget registered for every mounted route");
        assert_eq!(budget.plugin_id, route.plugin_id);
    }

    let budget = state
        .metrics
        .route_budget("GET", "/api/v1/plugins/p1/a")
        .unwrap();
    assert_eq!(budget.timeout_ms, 5000);

    let budget = state
        .metrics
        .route_budget("POST", "/api/v1/plugins/p1/b")
        .unwrap();
    assert_eq!(budget.timeout_ms, 30_000);
}

#[tokio::test]
async fn slow_backend_times_out_with_504() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(
        tmp.path(),
        "slow",
        serde_json::json!({
            "id": "slow", "version": "1.0.0",
            "rest": { "routes": [
                { "method": "GET", "path": "/crawl", "handler": "./h.js#crawl", "timeoutMs": 50 }
            ]}
        }),
        &["h.js"],
    );
    let gateway = boot_with_backend(
        tmp.path(),
        Arc::new(SlowBackend {
            inner: EchoBackend::new(),
        }),
        |_| {},
    )
    .await;

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/plugins/slow/crawl"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    let j = body_json(resp).await;
    assert_eq!(j["error"]["code"], "REQUEST_TIMEOUT");
}

#[tokio::test]
async fn per_route_rate_limit_override_applies() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(
        tmp.path(),
        "limited",
        serde_json::json!({
            "id": "limited", "version": "1.0.0",
            "rest": { "routes": [
                {
                    "method": "GET", "path": "/scarce", "handler": "./h.js#scarce",
                    "rateLimit": { "max": 1, "timeWindowMs": 60000 }
                }
            ]}
        }),
        &["h.js"],
    );
    let gateway = boot(tmp.path()).await;

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/plugins/limited/scarce"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/plugins/limited/scarce"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key("retry-after"));
}

// ── Idempotent re-application & incremental cycles ───────────

#[tokio::test]
async fn reapplying_the_same_snapshot_mounts_nothing_new() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(
        tmp.path(),
        "p1",
        serde_json::json!({
            "id": "p1", "version": "1.0.0",
            "rest": { "routes": [
                { "method": "GET", "path": "/hello", "handler": "./h.js#default" }
            ]}
        }),
        &["h.js"],
    );
    let gateway = boot(tmp.path()).await;
    let state = gateway.state();

    let before = state.metrics.last_plugin_mount_snapshot().unwrap();
    let orchestrator = MountOrchestrator::from_state(state);
    let snapshot = state.discovery.snapshot();
    let stats = orchestrator.mount_snapshot(&snapshot).await;

    assert_eq!(stats.newly_mounted_routes, 0);
    assert_eq!(stats.mounted_routes, 1);
    assert_eq!(stats.errors, 0);

    let after = state.metrics.last_plugin_mount_snapshot().unwrap();
    assert_eq!(before.succeeded, after.succeeded);
    assert_eq!(before.failed, after.failed);

    // The route still serves and its budget survived.
    assert!(
        state
            .metrics
            .route_budget("GET", "/api/v1/plugins/p1/hello")
            .is_some()
    );
    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/plugins/p1/hello"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn incremental_change_cycle_mounts_added_and_unmounts_removed() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(
        tmp.path(),
        "p1",
        serde_json::json!({
            "id": "p1", "version": "1.0.0",
            "rest": { "routes": [
                { "method": "GET", "path": "/one", "handler": "./h.js#one" }
            ]}
        }),
        &["h.js"],
    );
    let gateway = boot(tmp.path()).await;
    let state = gateway.state();
    let orchestrator = MountOrchestrator::from_state(state);

    // Add p2, drop p1.
    write_plugin(
        tmp.path(),
        "p2",
        serde_json::json!({
            "id": "p2", "version": "1.0.0",
            "rest": { "routes": [
                { "method": "GET", "path": "/two", "handler": "./h.js#two" }
            ]}
        }),
        &["h.js"],
    );
    std::fs::remove_dir_all(tmp.path().join("p1")).unwrap();

    let outcome = state.discovery.refresh().await.unwrap();
    assert_eq!(outcome.changes.added, vec!["p2"]);
    assert_eq!(outcome.changes.removed, vec!["p1"]);

    let snapshot = state.discovery.snapshot();
    orchestrator.mount_changes(&snapshot, &outcome.changes).await;

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/plugins/p2/two"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = gateway
        .router()
        .oneshot(get_req("/api/v1/plugins/p1/one"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // Budgets follow the route set.
    assert!(state.metrics.route_budget("GET", "/api/v1/plugins/p1/one").is_none());
    assert!(state.metrics.route_budget("GET", "/api/v1/plugins/p2/two").is_some());
}

#[tokio::test]
async fn plugin_metrics_attribute_requests_to_the_plugin() {
    let tmp = tempfile::tempdir().unwrap();
    write_plugin(
        tmp.path(),
        "p1",
        serde_json::json!({
            "id": "p1", "version": "1.0.0",
            "rest": { "routes": [
                { "method": "GET", "path": "/hello", "handler": "./h.js#default" }
            ]}
        }),
        &["h.js"],
    );
    let gateway = boot(tmp.path()).await;

    gateway
        .router()
        .oneshot(get_req("/api/v1/plugins/p1/hello"))
        .await
        .unwrap();

    let snapshot = gateway.state().metrics.snapshot();
    let aggregate = snapshot.plugins.get("p1").expect("plugin aggregate exists");
    assert_eq!(aggregate.total, 1);
    assert_eq!(aggregate.statuses_by_code[&200], 1);
    assert!(snapshot.routes.contains_key("GET /api/v1/plugins/p1/hello"));
}
