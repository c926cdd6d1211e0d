use crate::backend::ExecuteBackend;
use crate::cors::build_cors_layer;
use crate::dispatch;
use crate::handlers;
use crate::middleware as mw;
use crate::mount::MountOrchestrator;
use crate::platform::PlatformServices;
use crate::sse;
use crate::state::AppState;
use crate::tasks;
use axum::Router as AxumRouter;
use axum::extract::State;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use portico_core::config::GatewayConfig;
use portico_registry::{DiscoveryClient, DiscoveryProvider};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Shutdown grace period for in-flight requests.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Build the axum router: core-owned endpoints, the plugin-dispatch
/// fallback, and the middleware chain.
pub fn build_router(state: AppState) -> AxumRouter {
    let base = state.config.base_path.clone();

    let mut app = AxumRouter::new()
        .route(&format!("{base}/events/registry"), get(sse::registry_events))
        .route(
            &format!("{base}/plugins/registry"),
            get(handlers::registry::plugins_registry),
        )
        .route(
            &format!("{base}/plugins/health"),
            get(handlers::health::plugins_health),
        )
        .route(
            &format!("{base}/studio/registry"),
            get(handlers::studio::studio_registry),
        )
        .route(
            &format!("{base}/cache/invalidate"),
            post(handlers::cache::cache_invalidate),
        )
        .route(&format!("{base}/routes"), get(handlers::routes::list_routes))
        .route(&format!("{base}/health/live"), get(handlers::health::live))
        .route(&format!("{base}/health/ready"), get(handlers::health::ready))
        .route("/openapi.json", get(handlers::openapi::openapi))
        .route("/metrics", get(metrics_text));

    if !base.is_empty() {
        app = app.route(&format!("{base}/openapi.json"), get(handlers::openapi::openapi));
    }
    if state.platform.llm.is_some() {
        app = app.route(&format!("{base}/plugins/{{id}}/ask"), get(handlers::ask::ask));
    }

    // Unmatched requests fall through to the plugin dispatcher.
    let app = app.fallback(dispatch::dispatch);

    // Chain, outermost first: request context → CORS → rate limit →
    // metrics wrap → timeout → handler.
    let mut app = app
        .layer(from_fn_with_state(state.clone(), mw::enforce_timeout))
        .layer(from_fn_with_state(state.clone(), mw::track_metrics))
        .layer(from_fn_with_state(state.clone(), mw::rate_limit));
    if let Some(cors) = build_cors_layer(&state.config) {
        app = app.layer(cors);
    }
    app.layer(from_fn_with_state(state.clone(), mw::request_context))
        .with_state(state)
}

async fn metrics_text(State(state): State<AppState>) -> String {
    state.exporter.gather_text()
}

/// The assembled gateway: state plus the mount orchestrator, ready to
/// serve.
pub struct Gateway {
    state: AppState,
    orchestrator: MountOrchestrator,
}

impl Gateway {
    /// Boot order: platform capabilities are supplied, discovery
    /// initializes (blocking until the first snapshot), the first mount
    /// cycle runs, and the gateway is ready to bind.
    pub async fn bootstrap(
        config: GatewayConfig,
        provider: Arc<dyn DiscoveryProvider>,
        backend: Arc<dyn ExecuteBackend>,
        platform: Arc<PlatformServices>,
    ) -> anyhow::Result<Self> {
        let ttl_ms = config.snapshot_ttl_ms();
        let discovery = Arc::new(DiscoveryClient::new(provider, ttl_ms));
        let state = AppState::new(config, discovery, backend, platform)?;

        state.readiness.set_cli_initialized(true);

        state
            .discovery
            .initialize()
            .await
            .map_err(|e| anyhow::anyhow!("initial discovery failed: {e}"))?;
        let snapshot = state.discovery.snapshot();
        state
            .readiness
            .apply_registry(snapshot.rev > 0, snapshot.partial, snapshot.stale);
        tasks::update_redis_readiness(&state);

        let orchestrator = MountOrchestrator::from_state(&state);
        let stats = orchestrator.mount_snapshot(&snapshot).await;
        info!(
            rev = snapshot.rev,
            plugins = snapshot.manifests.len(),
            routes = stats.mounted_routes,
            errors = stats.errors,
            "Gateway bootstrapped"
        );

        Ok(Self {
            state,
            orchestrator,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn orchestrator(&self) -> &MountOrchestrator {
        &self.orchestrator
    }

    pub fn router(&self) -> AxumRouter {
        build_router(self.state.clone())
    }

    /// Bind the listener, run background tasks, serve until SIGTERM/SIGINT,
    /// then shut down in reverse order.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.state.config.bind_addr()?;
        if self.state.config.ssl.is_some() {
            warn!("TLS certificates configured; termination is delegated to the fronting proxy");
        }

        let shutdown = CancellationToken::new();
        let task_handles = tasks::spawn_background_tasks(
            self.state.clone(),
            self.orchestrator.clone(),
            shutdown.clone(),
        );

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(
            addr = %addr,
            base_path = %self.state.config.base_path,
            "Portico gateway listening"
        );

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let serve_shutdown = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
                .await
        });

        wait_for_signal().await;
        info!("Shutdown signal received, stopping...");

        // Stop accepting, then give in-flight requests the grace period.
        shutdown.cancel();
        match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!(error = %e, "Server error during shutdown"),
            Ok(Err(e)) => error!(error = %e, "Server task failed"),
            Err(_) => warn!("Grace period elapsed with requests still in flight"),
        }

        for handle in task_handles {
            handle.abort();
        }
        self.state.discovery.dispose().await;
        self.state.platform.shutdown().await;

        info!("Portico gateway stopped");
        Ok(())
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
