use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Fixed latency bucket ladder (milliseconds).
pub const BUCKETS_MS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

/// Timeout budget registered for a mounted route.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteBudget {
    pub method: String,
    pub full_path: String,
    pub timeout_ms: u64,
    pub plugin_id: String,
}

/// Metrics collector for the gateway.
///
/// Global counters are atomic; per-route histograms and per-plugin
/// aggregates sit behind route-local locks so contention stays local to the
/// key being updated.
pub struct MetricsCollector {
    total: AtomicU64,
    success: AtomicU64,
    client_errors: AtomicU64,
    server_errors: AtomicU64,
    cancelled: AtomicU64,

    routes: DashMap<String, Mutex<RouteHistogram>>,
    plugins: DashMap<String, Mutex<PluginAggregate>>,
    budgets: DashMap<String, RouteBudget>,

    last_mount: Mutex<Option<MountCycleSnapshot>>,
}

#[derive(Debug, Default)]
struct RouteHistogram {
    buckets: [u64; BUCKETS_MS.len()],
    overflow: u64,
    count: u64,
    sum_ms: u64,
    min_ms: u64,
    max_ms: u64,
}

impl RouteHistogram {
    fn new() -> Self {
        Self {
            // +inf until the first sample; coerced to 0 in serialization.
            min_ms: u64::MAX,
            ..Default::default()
        }
    }

    fn observe(&mut self, duration_ms: u64) {
        self.count += 1;
        self.sum_ms += duration_ms;
        self.min_ms = self.min_ms.min(duration_ms);
        self.max_ms = self.max_ms.max(duration_ms);
        match BUCKETS_MS.iter().position(|&le| duration_ms <= le) {
            Some(idx) => self.buckets[idx] += 1,
            None => self.overflow += 1,
        }
    }
}

#[derive(Debug, Default)]
struct PluginAggregate {
    total: u64,
    total_duration_ms: u64,
    statuses_by_code: BTreeMap<u16, u64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            client_errors: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            routes: DashMap::new(),
            plugins: DashMap::new(),
            budgets: DashMap::new(),
            last_mount: Mutex::new(None),
        }
    }

    /// Record a completed request against the matched route pattern.
    pub fn record_request(
        &self,
        method: &str,
        route_pattern: &str,
        status: u16,
        duration_ms: u64,
        plugin_id: Option<&str>,
    ) {
        self.total.fetch_add(1, Ordering::Relaxed);
        match status {
            200..=399 => self.success.fetch_add(1, Ordering::Relaxed),
            400..=499 => self.client_errors.fetch_add(1, Ordering::Relaxed),
            _ => self.server_errors.fetch_add(1, Ordering::Relaxed),
        };

        let key = route_key(method, route_pattern);
        let entry = self
            .routes
            .entry(key)
            .or_insert_with(|| Mutex::new(RouteHistogram::new()));
        entry
            .lock()
            .expect("route histogram lock poisoned")
            .observe(duration_ms);

        if let Some(plugin_id) = plugin_id {
            let entry = self
                .plugins
                .entry(plugin_id.to_string())
                .or_insert_with(|| Mutex::new(PluginAggregate::default()));
            let mut agg = entry.lock().expect("plugin aggregate lock poisoned");
            agg.total += 1;
            agg.total_duration_ms += duration_ms;
            *agg.statuses_by_code.entry(status).or_insert(0) += 1;
        }
    }

    /// A request cancelled by client disconnect before any byte was written.
    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    // ── Route budgets ───────────────────────────────────────────

    pub fn register_route_budget(
        &self,
        method: &str,
        full_path: &str,
        timeout_ms: u64,
        plugin_id: &str,
    ) {
        self.budgets.insert(
            route_key(method, full_path),
            RouteBudget {
                method: method.to_string(),
                full_path: full_path.to_string(),
                timeout_ms,
                plugin_id: plugin_id.to_string(),
            },
        );
    }

    /// Drop all registered budgets; called at the start of a full mount
    /// cycle.
    pub fn reset_plugin_route_budgets(&self) {
        self.budgets.clear();
    }

    /// Drop one plugin's budgets; used by incremental re-mounts.
    pub fn remove_plugin_route_budgets(&self, plugin_id: &str) {
        self.budgets.retain(|_, budget| budget.plugin_id != plugin_id);
    }

    pub fn route_budget(&self, method: &str, full_path: &str) -> Option<RouteBudget> {
        self.budgets
            .get(&route_key(method, full_path))
            .map(|b| b.clone())
    }

    pub fn route_budgets(&self) -> Vec<RouteBudget> {
        let mut budgets: Vec<RouteBudget> = self.budgets.iter().map(|b| b.clone()).collect();
        budgets.sort_by(|a, b| {
            a.full_path
                .cmp(&b.full_path)
                .then_with(|| a.method.cmp(&b.method))
        });
        budgets
    }

    // ── Mount cycles ────────────────────────────────────────────

    pub fn begin_plugin_mount(&self) -> MountCycle {
        MountCycle {
            started: Instant::now(),
            outcomes: Mutex::new(Vec::new()),
        }
    }

    /// Seal a mount cycle: logs the outcome and stores the snapshot.
    pub fn complete_plugin_mount(&self, cycle: &MountCycle) -> MountCycleSnapshot {
        let outcomes = std::mem::take(
            &mut *cycle.outcomes.lock().expect("mount cycle lock poisoned"),
        );
        let succeeded = outcomes.iter().filter(|o| o.ok).count();
        let failed = outcomes.len() - succeeded;
        let snapshot = MountCycleSnapshot {
            succeeded,
            failed,
            duration_ms: cycle.started.elapsed().as_millis() as u64,
            completed_at: Utc::now(),
            per_plugin: outcomes,
        };

        if failed > 0 {
            warn!(
                succeeded,
                failed,
                duration_ms = snapshot.duration_ms,
                "Plugin mount cycle completed with failures"
            );
        } else {
            info!(
                succeeded,
                duration_ms = snapshot.duration_ms,
                "Plugin mount cycle completed"
            );
        }

        *self.last_mount.lock().expect("mount snapshot lock poisoned") = Some(snapshot.clone());
        snapshot
    }

    pub fn last_plugin_mount_snapshot(&self) -> Option<MountCycleSnapshot> {
        self.last_mount
            .lock()
            .expect("mount snapshot lock poisoned")
            .clone()
    }

    // ── Snapshots ───────────────────────────────────────────────

    pub fn snapshot(&self) -> MetricsSnapshot {
        let routes = self
            .routes
            .iter()
            .map(|entry| {
                let hist = entry.value().lock().expect("route histogram lock poisoned");
                let buckets = BUCKETS_MS
                    .iter()
                    .zip(hist.buckets.iter())
                    .map(|(&le, &count)| BucketCount { le_ms: le, count })
                    .collect();
                (
                    entry.key().clone(),
                    RouteHistogramSnapshot {
                        count: hist.count,
                        sum_ms: hist.sum_ms,
                        min_ms: if hist.count == 0 { 0 } else { hist.min_ms },
                        max_ms: hist.max_ms,
                        buckets,
                        overflow: hist.overflow,
                    },
                )
            })
            .collect();

        let plugins = self
            .plugins
            .iter()
            .map(|entry| {
                let agg = entry.value().lock().expect("plugin aggregate lock poisoned");
                (
                    entry.key().clone(),
                    PluginAggregateSnapshot {
                        total: agg.total,
                        total_duration_ms: agg.total_duration_ms,
                        statuses_by_code: agg.statuses_by_code.clone(),
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            requests: RequestCounters {
                total: self.total.load(Ordering::Relaxed),
                success: self.success.load(Ordering::Relaxed),
                client_errors: self.client_errors.load(Ordering::Relaxed),
                server_errors: self.server_errors.load(Ordering::Relaxed),
                cancelled: self.cancelled.load(Ordering::Relaxed),
            },
            routes,
            plugins,
            last_mount: self.last_plugin_mount_snapshot(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn route_key(method: &str, path: &str) -> String {
    format!("{method} {path}")
}

/// An in-flight mount cycle. Shared across mount tasks; outcomes are
/// recorded exactly once per plugin reaching a terminal state.
pub struct MountCycle {
    started: Instant,
    outcomes: Mutex<Vec<PluginMountOutcome>>,
}

impl MountCycle {
    pub fn record_success(&self, plugin_id: &str, route_count: usize, duration_ms: u64) {
        self.outcomes
            .lock()
            .expect("mount cycle lock poisoned")
            .push(PluginMountOutcome {
                plugin_id: plugin_id.to_string(),
                ok: true,
                route_count,
                duration_ms,
                error: None,
            });
    }

    pub fn record_failure(&self, plugin_id: &str, short_reason: &str) {
        self.outcomes
            .lock()
            .expect("mount cycle lock poisoned")
            .push(PluginMountOutcome {
                plugin_id: plugin_id.to_string(),
                ok: false,
                route_count: 0,
                duration_ms: 0,
                error: Some(short_reason.to_string()),
            });
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMountOutcome {
    pub plugin_id: String,
    pub ok: bool,
    pub route_count: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountCycleSnapshot {
    pub succeeded: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
    pub per_plugin: Vec<PluginMountOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCounters {
    pub total: u64,
    pub success: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketCount {
    pub le_ms: u64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteHistogramSnapshot {
    pub count: u64,
    pub sum_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub buckets: Vec<BucketCount>,
    pub overflow: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginAggregateSnapshot {
    pub total: u64,
    pub total_duration_ms: u64,
    pub statuses_by_code: BTreeMap<u16, u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub requests: RequestCounters,
    pub routes: BTreeMap<String, RouteHistogramSnapshot>,
    pub plugins: BTreeMap<String, PluginAggregateSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_mount: Option<MountCycleSnapshot>,
}
