use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Why the gateway is (or is not) ready to serve traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Ready,
    CliApiNotInitialized,
    RegistryNotLoaded,
    RegistryPartial,
    RegistrySnapshotStale,
    RedisUnavailable,
    PluginMountInProgress,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Ready => "ready",
            Reason::CliApiNotInitialized => "cli_api_not_initialized",
            Reason::RegistryNotLoaded => "registry_not_loaded",
            Reason::RegistryPartial => "registry_partial",
            Reason::RegistrySnapshotStale => "registry_snapshot_stale",
            Reason::RedisUnavailable => "redis_unavailable",
            Reason::PluginMountInProgress => "plugin_mount_in_progress",
        }
    }
}

/// One failed plugin in a mount cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteFailure {
    pub id: String,
    pub error: String,
}

/// Connection states of the optional Redis roles.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedisStates {
    pub publisher: String,
    pub subscriber: String,
    pub cache: String,
}

/// A consistent view of the initialization state. Produced by
/// [`ReadinessState::snapshot`]; all readers derive from this.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessSnapshot {
    pub cli_initialized: bool,
    pub registry_loaded: bool,
    pub registry_partial: bool,
    pub registry_stale: bool,
    pub plugin_routes_mounted: bool,
    pub mount_in_progress: bool,
    pub routes_count: usize,
    pub route_errors: usize,
    pub route_failures: Vec<RouteFailure>,
    pub last_mount_ts: Option<DateTime<Utc>>,
    pub last_mount_duration_ms: Option<u64>,
    pub redis_enabled: bool,
    pub redis_connected: bool,
    pub redis_states: Option<RedisStates>,
}

impl ReadinessSnapshot {
    pub fn reason(&self) -> Reason {
        resolve_reason(self)
    }

    pub fn ready(&self) -> bool {
        self.reason() == Reason::Ready
    }
}

/// Derive the single readiness reason from the boolean flags.
///
/// `plugin_mount_in_progress` is reported only while a cycle is running and
/// routes are not yet mounted, so `ready() == true` iff the reason is
/// `ready`.
pub fn resolve_reason(s: &ReadinessSnapshot) -> Reason {
    if !s.cli_initialized {
        return Reason::CliApiNotInitialized;
    }
    if !s.registry_loaded {
        return Reason::RegistryNotLoaded;
    }
    if s.registry_partial {
        return Reason::RegistryPartial;
    }
    if s.registry_stale {
        return Reason::RegistrySnapshotStale;
    }
    if s.redis_enabled && !s.redis_connected {
        return Reason::RedisUnavailable;
    }
    if s.mount_in_progress && !s.plugin_routes_mounted {
        return Reason::PluginMountInProgress;
    }
    Reason::Ready
}

/// Shared readiness state. Writers are the mount orchestrator and the
/// discovery change path; each field has a single writer. Readers always see
/// a consistent snapshot.
pub struct ReadinessState {
    inner: Mutex<ReadinessSnapshot>,
}

impl ReadinessState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ReadinessSnapshot {
                cli_initialized: false,
                registry_loaded: false,
                registry_partial: false,
                registry_stale: false,
                plugin_routes_mounted: false,
                mount_in_progress: false,
                routes_count: 0,
                route_errors: 0,
                route_failures: Vec::new(),
                last_mount_ts: None,
                last_mount_duration_ms: None,
                redis_enabled: false,
                redis_connected: false,
                redis_states: None,
            }),
        }
    }

    pub fn snapshot(&self) -> ReadinessSnapshot {
        self.inner.lock().expect("readiness lock poisoned").clone()
    }

    pub fn ready(&self) -> bool {
        self.snapshot().ready()
    }

    pub fn reason(&self) -> Reason {
        self.snapshot().reason()
    }

    pub fn set_cli_initialized(&self, value: bool) {
        self.mutate(|s| s.cli_initialized = value);
    }

    /// Discovery change path: a new snapshot arrived (or the current one
    /// changed classification).
    pub fn apply_registry(&self, loaded: bool, partial: bool, stale: bool) {
        self.mutate(|s| {
            s.registry_loaded = loaded;
            s.registry_partial = partial;
            s.registry_stale = stale;
        });
    }

    pub fn mark_registry_stale(&self) {
        self.mutate(|s| s.registry_stale = true);
    }

    pub fn set_redis(&self, enabled: bool, connected: bool, states: Option<RedisStates>) {
        self.mutate(|s| {
            s.redis_enabled = enabled;
            s.redis_connected = connected;
            s.redis_states = states;
        });
    }

    /// Mount orchestrator: a cycle begins. Counters reset; mounted flag
    /// drops until the cycle completes.
    pub fn begin_mount_cycle(&self) {
        self.mutate(|s| {
            s.mount_in_progress = true;
            s.plugin_routes_mounted = false;
            s.routes_count = 0;
            s.route_errors = 0;
            s.route_failures.clear();
        });
    }

    /// Mount orchestrator: a cycle finished.
    pub fn complete_mount_cycle(
        &self,
        routes_count: usize,
        failures: Vec<RouteFailure>,
        duration_ms: u64,
        completed_at: DateTime<Utc>,
    ) {
        self.mutate(|s| {
            s.mount_in_progress = false;
            s.routes_count = routes_count;
            s.route_errors = failures.len();
            s.plugin_routes_mounted = failures.is_empty();
            s.route_failures = failures;
            s.last_mount_ts = Some(completed_at);
            s.last_mount_duration_ms = Some(duration_ms);
        });
    }

    fn mutate(&self, f: impl FnOnce(&mut ReadinessSnapshot)) {
        let mut guard = self.inner.lock().expect("readiness lock poisoned");
        f(&mut guard);
    }
}

impl Default for ReadinessState {
    fn default() -> Self {
        Self::new()
    }
}
