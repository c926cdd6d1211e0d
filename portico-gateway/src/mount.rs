use crate::backend::ExecuteBackend;
use crate::router::{MountedRoute, PluginRouter};
use crate::state::AppState;
use chrono::Utc;
use portico_core::config::GatewayConfig;
use portico_core::error::short_reason;
use portico_core::manifest::ManifestV3;
use portico_core::paths::resolve_paths;
use portico_core::readiness::{ReadinessState, RouteFailure};
use portico_core::snapshot::{ManifestEntry, RegistrySnapshot};
use portico_events::{BroadcastEvent, EventBus};
use portico_observability::metrics::MountCycle;
use portico_observability::MetricsCollector;
use portico_registry::client::ChangeSet;
use portico_registry::validator;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Per-plugin outcome of one mount cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountRecord {
    pub plugin_id: String,
    /// Routes serving after this cycle (newly inserted or already present).
    pub routes_mounted: usize,
    /// Routes dropped by validation or the handler-presence check.
    pub routes_skipped: usize,
    pub failures: Vec<String>,
    pub duration_ms: u64,
    #[serde(skip)]
    newly_mounted: usize,
}

/// Aggregate of one mount cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountStats {
    pub mounted_routes: usize,
    pub newly_mounted_routes: usize,
    pub skipped_routes: usize,
    pub errors: usize,
    pub per_plugin: Vec<MountRecord>,
}

/// Applies registry snapshots to the gateway: validates manifests, mounts
/// routes in parallel through the execute backend, registers budgets, and
/// reflects the outcome into readiness, metrics, and the event bus.
#[derive(Clone)]
pub struct MountOrchestrator {
    config: Arc<GatewayConfig>,
    router: Arc<PluginRouter>,
    backend: Arc<dyn ExecuteBackend>,
    metrics: Arc<MetricsCollector>,
    readiness: Arc<ReadinessState>,
    bus: Arc<EventBus>,
}

impl MountOrchestrator {
    pub fn new(
        config: Arc<GatewayConfig>,
        router: Arc<PluginRouter>,
        backend: Arc<dyn ExecuteBackend>,
        metrics: Arc<MetricsCollector>,
        readiness: Arc<ReadinessState>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            router,
            backend,
            metrics,
            readiness,
            bus,
        }
    }

    pub fn from_state(state: &AppState) -> Self {
        Self::new(
            Arc::clone(&state.config),
            Arc::clone(&state.plugin_router),
            Arc::clone(&state.backend),
            Arc::clone(&state.metrics),
            Arc::clone(&state.readiness),
            Arc::clone(&state.bus),
        )
    }

    /// Full mount cycle: apply a snapshot, removing plugins that left it.
    pub async fn mount_snapshot(&self, snapshot: &RegistrySnapshot) -> MountStats {
        let snapshot_ids: HashSet<&str> = snapshot.plugin_ids().into_iter().collect();
        for plugin_id in self.router.plugin_ids() {
            if !snapshot_ids.contains(plugin_id.as_str()) {
                self.router.remove_plugin(&plugin_id);
                self.metrics.remove_plugin_route_budgets(&plugin_id);
            }
        }
        self.apply(snapshot, None).await
    }

    /// Incremental cycle for a change diff: unmount removed plugins,
    /// re-validate and re-register added/changed ones, leave the rest in
    /// place.
    pub async fn mount_changes(&self, snapshot: &RegistrySnapshot, changes: &ChangeSet) -> MountStats {
        for plugin_id in &changes.removed {
            self.router.remove_plugin(plugin_id);
            self.metrics.remove_plugin_route_budgets(plugin_id);
        }
        let targets = changes.to_remount();
        for plugin_id in &targets {
            self.router.remove_plugin(plugin_id);
            self.metrics.remove_plugin_route_budgets(plugin_id);
        }
        self.apply(snapshot, Some(targets)).await
    }

    /// A top-level discovery failure ends the cycle with a single
    /// `discovery` failure entry.
    pub fn record_discovery_failure(&self, message: &str) {
        self.readiness.begin_mount_cycle();
        let cycle = self.metrics.begin_plugin_mount();
        let reason = short_reason("rest_discovery_failed", message);
        cycle.record_failure("discovery", &reason);
        let snapshot = self.metrics.complete_plugin_mount(&cycle);
        let completed_at = Utc::now();
        self.readiness.complete_mount_cycle(
            self.router.route_count(),
            vec![RouteFailure {
                id: "discovery".to_string(),
                error: reason,
            }],
            snapshot.duration_ms,
            completed_at,
        );
        self.publish_health(completed_at);
    }

    async fn apply(&self, snapshot: &RegistrySnapshot, only: Option<Vec<String>>) -> MountStats {
        let full_cycle = only.is_none();
        self.readiness.begin_mount_cycle();
        if full_cycle {
            self.metrics.reset_plugin_route_budgets();
        }
        let cycle = Arc::new(self.metrics.begin_plugin_mount());

        if snapshot.partial || snapshot.stale {
            warn!(
                rev = snapshot.rev,
                partial = snapshot.partial,
                stale = snapshot.stale,
                "Mounting from a degraded snapshot"
            );
        }

        let workspace_root = resolve_workspace_root();
        let targets: Vec<ManifestEntry> = snapshot
            .manifests
            .iter()
            .filter(|entry| entry.manifest.has_rest_routes())
            .filter(|entry| {
                only.as_ref()
                    .is_none_or(|ids| ids.contains(&entry.plugin_id))
            })
            .cloned()
            .collect();

        let concurrency = targets.len().min(default_concurrency()).max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut join_set: JoinSet<MountRecord> = JoinSet::new();

        for entry in targets {
            let this = self.clone();
            let cycle = Arc::clone(&cycle);
            let semaphore = Arc::clone(&semaphore);
            let workspace_root = workspace_root.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                this.mount_plugin(entry, cycle, workspace_root).await
            });
        }

        let mut records = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(record) => records.push(record),
                Err(e) => {
                    // A mount task died; siblings keep going.
                    error!(error = %e, "Mount task failed");
                    let reason = short_reason("rest_mount_failed", &e.to_string());
                    cycle.record_failure("unknown", &reason);
                    records.push(MountRecord {
                        plugin_id: "unknown".to_string(),
                        routes_mounted: 0,
                        routes_skipped: 0,
                        failures: vec![reason],
                        duration_ms: 0,
                        newly_mounted: 0,
                    });
                }
            }
        }
        records.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));

        self.router.rebuild();

        let mount_snapshot = self.metrics.complete_plugin_mount(&cycle);
        let failures: Vec<RouteFailure> = records
            .iter()
            .flat_map(|record| {
                record.failures.iter().map(|failure| RouteFailure {
                    id: record.plugin_id.clone(),
                    error: failure.clone(),
                })
            })
            .collect();

        let stats = MountStats {
            mounted_routes: records.iter().map(|r| r.routes_mounted).sum(),
            newly_mounted_routes: records.iter().map(|r| r.newly_mounted).sum(),
            skipped_routes: records.iter().map(|r| r.routes_skipped).sum(),
            errors: records.iter().filter(|r| !r.failures.is_empty()).count(),
            per_plugin: records,
        };

        let completed_at = Utc::now();
        self.readiness.complete_mount_cycle(
            self.router.route_count(),
            failures,
            mount_snapshot.duration_ms,
            completed_at,
        );
        self.publish_health(completed_at);

        info!(
            rev = snapshot.rev,
            mounted = stats.mounted_routes,
            newly = stats.newly_mounted_routes,
            skipped = stats.skipped_routes,
            errors = stats.errors,
            "Mount cycle applied"
        );
        stats
    }

    async fn mount_plugin(
        &self,
        entry: ManifestEntry,
        cycle: Arc<MountCycle>,
        workspace_root: PathBuf,
    ) -> MountRecord {
        let started = Instant::now();
        let plugin_id = entry.plugin_id.clone();
        let manifest = &entry.manifest;
        let mut record = MountRecord {
            plugin_id: plugin_id.clone(),
            routes_mounted: 0,
            routes_skipped: 0,
            failures: Vec::new(),
            duration_ms: 0,
            newly_mounted: 0,
        };

        // Manifest-level problems fail the plugin as a whole.
        let issues = validator::manifest_issues(manifest);
        if let Some(first) = issues.first() {
            let reason = short_reason("rest_validation_failed", first);
            cycle.record_failure(&plugin_id, &reason);
            record.failures.push(reason);
            record.duration_ms = started.elapsed().as_millis() as u64;
            return record;
        }

        // Drop structurally bad routes; siblings survive.
        let bad_routes: HashSet<usize> = validator::route_issues(manifest)
            .iter()
            .map(|(idx, _)| *idx)
            .collect();
        let mut dropped_errors: Vec<String> = validator::route_issues(manifest)
            .into_iter()
            .map(|(_, e)| e)
            .collect();
        let structurally_ok: Vec<_> = manifest
            .rest_routes()
            .iter()
            .enumerate()
            .filter(|(idx, _)| !bad_routes.contains(idx))
            .map(|(_, route)| route.clone())
            .collect();
        record.routes_skipped += bad_routes.len();

        // Handler-presence check against the plugin root.
        let plugin_root = if entry.plugin_root.is_absolute() {
            entry.plugin_root.clone()
        } else {
            workspace_root.join(&entry.plugin_root)
        };
        let (surviving, presence_errors) = validator::check_routes(&structurally_ok, &plugin_root);
        record.routes_skipped += presence_errors.len();
        dropped_errors.extend(presence_errors);

        if surviving.is_empty() {
            let first = dropped_errors
                .first()
                .map(String::as_str)
                .unwrap_or("no rest routes");
            let reason = short_reason("rest_validation_failed", first);
            cycle.record_failure(&plugin_id, &reason);
            record.failures.push(reason);
            record.duration_ms = started.elapsed().as_millis() as u64;
            return record;
        }

        let plugin_base = compute_plugin_base(&self.config.base_path, manifest);
        let granted = manifest
            .permissions
            .granted(&self.config.plugins.granted_capabilities);

        // Idempotent re-apply: if the plugin's routes are already mounted
        // with identical signatures, only the budgets need re-registering.
        let desired_signatures: HashSet<(String, String, String, u64)> = surviving
            .iter()
            .map(|route| {
                let full_path = join_route_path(&plugin_base, &route.path);
                (
                    route.method.as_str().to_string(),
                    full_path,
                    route.handler.clone(),
                    route.timeout_ms.unwrap_or(self.config.timeouts.request_timeout_ms),
                )
            })
            .collect();
        let existing = self.router.plugin_routes(&plugin_id);
        let existing_signatures: HashSet<_> =
            existing.iter().map(|route| route.signature()).collect();
        if !existing.is_empty() && existing_signatures == desired_signatures {
            for route in &existing {
                self.metrics.register_route_budget(
                    route.method.as_str(),
                    &route.full_path,
                    route.timeout_ms,
                    &plugin_id,
                );
            }
            record.routes_mounted = existing.len();
            record.duration_ms = started.elapsed().as_millis() as u64;
            cycle.record_success(&plugin_id, existing.len(), record.duration_ms);
            return record;
        }
        // A changed plugin re-registers from scratch.
        if !existing.is_empty() {
            self.router.remove_plugin(&plugin_id);
            self.metrics.remove_plugin_route_budgets(&plugin_id);
        }

        for route in surviving {
            let full_path = join_route_path(&plugin_base, &route.path);
            let timeout_ms = route
                .timeout_ms
                .unwrap_or(self.config.timeouts.request_timeout_ms);

            let entry_handle = match self.backend.prepare(manifest, &route).await {
                Ok(handle) => handle,
                Err(e) => {
                    let reason = short_reason("rest_mount_failed", &e.to_string());
                    record.failures.push(reason);
                    continue;
                }
            };

            let mounted = MountedRoute {
                plugin_id: plugin_id.clone(),
                method: route.method,
                full_path: full_path.clone(),
                handler: route.handler.clone(),
                entry: entry_handle.clone(),
                timeout_ms,
                capabilities: granted.clone(),
                rate_limit: route.rate_limit,
                alias: false,
            };

            match self.router.insert(mounted) {
                Ok(()) => {
                    record.routes_mounted += 1;
                    record.newly_mounted += 1;
                    self.metrics.register_route_budget(
                        route.method.as_str(),
                        &full_path,
                        timeout_ms,
                        &plugin_id,
                    );

                    // Unprefixed alias, kept working during transition
                    // windows. Best-effort; never owns the path.
                    let paths = resolve_paths(&plugin_base, &route.path);
                    if let Some(bare) = paths.first()
                        && *bare != full_path
                    {
                        let alias = MountedRoute {
                            plugin_id: plugin_id.clone(),
                            method: route.method,
                            full_path: bare.clone(),
                            handler: route.handler.clone(),
                            entry: entry_handle,
                            timeout_ms,
                            capabilities: granted.clone(),
                            rate_limit: route.rate_limit,
                            alias: true,
                        };
                        let _ = self.router.insert(alias);
                    }
                }
                Err(e) => {
                    record.failures.push(short_reason("", &e.to_string()));
                }
            }
        }

        record.duration_ms = started.elapsed().as_millis() as u64;
        if record.failures.is_empty() {
            cycle.record_success(&plugin_id, record.routes_mounted, record.duration_ms);
        } else {
            cycle.record_failure(&plugin_id, &record.failures[0]);
        }
        record
    }

    fn publish_health(&self, completed_at: chrono::DateTime<Utc>) {
        let readiness = self.readiness.snapshot();
        let (mounted, failed) = self
            .metrics
            .last_plugin_mount_snapshot()
            .map(|s| (s.succeeded, s.failed))
            .unwrap_or((0, 0));
        self.bus
            .publish(BroadcastEvent::health(&readiness, mounted, failed, completed_at));
    }
}

/// Compute the plugin's mount base: a versioned `rest.basePath` has its
/// `/vN` prefix replaced by the gateway base path; otherwise the plugin
/// lands under `{base}/plugins/{id}`.
pub fn compute_plugin_base(base_path: &str, manifest: &ManifestV3) -> String {
    if let Some(bp) = manifest.rest.as_ref().and_then(|r| r.base_path.as_deref())
        && has_version_prefix(bp)
    {
        let remainder = match bp[1..].find('/') {
            Some(i) => &bp[1 + i..],
            None => "",
        };
        return format!("{base_path}{remainder}");
    }
    format!("{base_path}/plugins/{}", manifest.id)
}

fn has_version_prefix(base_path: &str) -> bool {
    let Some(rest) = base_path.strip_prefix("/v") else {
        return false;
    };
    let end = rest.find('/').unwrap_or(rest.len());
    end > 0 && rest[..end].chars().all(|c| c.is_ascii_digit())
}

fn join_route_path(base: &str, route_path: &str) -> String {
    if route_path.starts_with('/') {
        format!("{base}{route_path}")
    } else {
        format!("{base}/{route_path}")
    }
}

fn resolve_workspace_root() -> PathBuf {
    std::env::var("KB_LABS_WORKSPACE_ROOT")
        .ok()
        .or_else(|| std::env::var("KB_LABS_REPO_ROOT").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        * 4
}
