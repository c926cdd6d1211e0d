use crate::backend::ExecuteBackend;
use crate::middleware::RateLimiter;
use crate::platform::PlatformServices;
use crate::router::PluginRouter;
use portico_core::config::GatewayConfig;
use portico_core::readiness::ReadinessState;
use portico_events::EventBus;
use portico_observability::{MetricsCollector, PrometheusExporter};
use portico_registry::DiscoveryClient;
use std::sync::Arc;

/// Shared state for the gateway's HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub discovery: Arc<DiscoveryClient>,
    pub readiness: Arc<ReadinessState>,
    pub metrics: Arc<MetricsCollector>,
    pub exporter: Arc<PrometheusExporter>,
    pub bus: Arc<EventBus>,
    pub plugin_router: Arc<PluginRouter>,
    pub backend: Arc<dyn ExecuteBackend>,
    pub platform: Arc<PlatformServices>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        discovery: Arc<DiscoveryClient>,
        backend: Arc<dyn ExecuteBackend>,
        platform: Arc<PlatformServices>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            config: Arc::new(config),
            discovery,
            readiness: Arc::new(ReadinessState::new()),
            metrics: Arc::new(MetricsCollector::new()),
            exporter: Arc::new(PrometheusExporter::new()?),
            bus: Arc::new(EventBus::default()),
            plugin_router: Arc::new(PluginRouter::new()),
            backend,
            platform,
            rate_limiter: Arc::new(RateLimiter::new()),
        })
    }

    /// Succeeded/failed plugin counts from the last mount cycle.
    pub fn mount_counts(&self) -> (usize, usize) {
        self.metrics
            .last_plugin_mount_snapshot()
            .map(|s| (s.succeeded, s.failed))
            .unwrap_or((0, 0))
    }
}
