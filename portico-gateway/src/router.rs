use crate::backend::EntryHandle;
use dashmap::DashMap;
use matchit::Router as MatchitRouter;
use portico_core::error::GatewayError;
use portico_core::manifest::{RateLimitOverride, RouteMethod};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// A plugin route registered on the gateway.
#[derive(Debug, Clone)]
pub struct MountedRoute {
    pub plugin_id: String,
    pub method: RouteMethod,

    /// Absolute mount path with `:param` placeholders preserved.
    pub full_path: String,

    /// Handler reference (`file#export`), kept for diagnostics.
    pub handler: String,

    pub entry: EntryHandle,
    pub timeout_ms: u64,
    pub capabilities: Vec<String>,
    pub rate_limit: Option<RateLimitOverride>,

    /// Alias path (e.g. the unprefixed form accepted during transition
    /// windows). Aliases never claim ownership of a (method, path) pair.
    pub alias: bool,
}

impl MountedRoute {
    /// Signature used to decide whether a re-mount would change anything.
    pub fn signature(&self) -> (String, String, String, u64) {
        (
            self.method.as_str().to_string(),
            self.full_path.clone(),
            self.handler.clone(),
            self.timeout_ms,
        )
    }
}

/// Result of a dispatch match.
pub struct RouteMatch {
    pub route: Arc<MountedRoute>,
    pub params: Vec<(String, String)>,
}

/// Thread-safe table of mounted plugin routes.
///
/// Source of truth is a concurrent map keyed by `(method, path)`; matching
/// runs against a pre-compiled radix tree swapped in atomically on
/// `rebuild()`. Inserts are visible for conflict detection immediately but
/// only matchable after a rebuild — the mount orchestrator rebuilds once
/// per cycle.
pub struct PluginRouter {
    inner: arc_swap::ArcSwap<CompiledRouter>,
    routes: DashMap<String, Arc<MountedRoute>>,
    version: AtomicU64,
}

struct CompiledRouter {
    method_routers: HashMap<&'static str, MatchitRouter<Arc<MountedRoute>>>,
}

impl PluginRouter {
    pub fn new() -> Self {
        Self {
            inner: arc_swap::ArcSwap::new(Arc::new(CompiledRouter {
                method_routers: HashMap::new(),
            })),
            routes: DashMap::new(),
            version: AtomicU64::new(0),
        }
    }

    /// Route-table version, bumped on every rebuild.
    #[inline]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Register a route. First writer wins a `(method, full_path)` pair; a
    /// later non-alias attempt is a conflict.
    pub fn insert(&self, route: MountedRoute) -> Result<(), GatewayError> {
        let key = route_key(route.method.as_str(), &route.full_path);
        match self.routes.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                if route.alias {
                    // Aliases are best-effort; the primary owner keeps it.
                    debug!(
                        path = %route.full_path,
                        owner = %existing.get().plugin_id,
                        loser = %route.plugin_id,
                        "Alias path already taken"
                    );
                    return Ok(());
                }
                Err(GatewayError::Mount(format!(
                    "rest_route_conflict {} {} already mounted by {}",
                    route.method,
                    route.full_path,
                    existing.get().plugin_id
                )))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                debug!(
                    plugin = %route.plugin_id,
                    method = %route.method,
                    path = %route.full_path,
                    "Route registered"
                );
                slot.insert(Arc::new(route));
                Ok(())
            }
        }
    }

    /// Remove every route owned by a plugin. Returns how many were removed.
    pub fn remove_plugin(&self, plugin_id: &str) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, route| route.plugin_id != plugin_id);
        let removed = before - self.routes.len();
        if removed > 0 {
            info!(plugin = %plugin_id, removed, "Plugin routes removed");
        }
        removed
    }

    /// Non-alias routes owned by a plugin.
    pub fn plugin_routes(&self, plugin_id: &str) -> Vec<Arc<MountedRoute>> {
        self.routes
            .iter()
            .filter(|e| e.value().plugin_id == plugin_id && !e.value().alias)
            .map(|e| Arc::clone(e.value()))
            .collect()
    }

    /// Plugin ids currently owning at least one route.
    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .routes
            .iter()
            .map(|e| e.value().plugin_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn all_routes(&self) -> Vec<Arc<MountedRoute>> {
        let mut routes: Vec<Arc<MountedRoute>> =
            self.routes.iter().map(|e| Arc::clone(e.value())).collect();
        routes.sort_by(|a, b| {
            a.full_path
                .cmp(&b.full_path)
                .then_with(|| a.method.as_str().cmp(b.method.as_str()))
        });
        routes
    }

    /// Non-alias route count.
    pub fn route_count(&self) -> usize {
        self.routes.iter().filter(|e| !e.value().alias).count()
    }

    /// Match an incoming request against the compiled table.
    #[inline]
    pub fn match_route(&self, method: &str, path: &str) -> Option<RouteMatch> {
        let compiled = self.inner.load();
        let router = compiled.method_routers.get(method)?;
        let matched = router.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Some(RouteMatch {
            route: Arc::clone(matched.value),
            params,
        })
    }

    /// Recompile the radix tree from the current route set and swap it in.
    pub fn rebuild(&self) {
        let mut method_routers: HashMap<&'static str, MatchitRouter<Arc<MountedRoute>>> =
            HashMap::new();

        for entry in self.routes.iter() {
            let route = entry.value();
            let router = method_routers
                .entry(route.method.as_str())
                .or_insert_with(MatchitRouter::new);
            let pattern = to_matchit_pattern(&route.full_path);
            if let Err(e) = router.insert(pattern, Arc::clone(route)) {
                warn!(
                    plugin = %route.plugin_id,
                    path = %route.full_path,
                    error = %e,
                    "Failed to insert route into compiled router"
                );
            }
        }

        self.inner.store(Arc::new(CompiledRouter { method_routers }));
        self.version.fetch_add(1, Ordering::Release);
        info!(count = self.routes.len(), "Plugin router rebuilt");
    }
}

impl Default for PluginRouter {
    fn default() -> Self {
        Self::new()
    }
}

fn route_key(method: &str, path: &str) -> String {
    format!("{method} {path}")
}

/// Convert `:param` segments to the `{param}` syntax the radix router
/// expects.
fn to_matchit_pattern(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
