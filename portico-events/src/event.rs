use chrono::{DateTime, Utc};
use portico_core::readiness::{ReadinessSnapshot, Reason, RedisStates};
use portico_core::snapshot::{CHECKSUM_ALGORITHM, RegistrySnapshot};
use serde::{Deserialize, Serialize};

/// Events pushed to subscribers: registry changes and health transitions.
///
/// Wire shape is a tagged JSON object; the tag doubles as the SSE event
/// name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BroadcastEvent {
    #[serde(rename_all = "camelCase")]
    Registry {
        rev: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        generated_at: Option<DateTime<Utc>>,
        partial: bool,
        stale: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ttl_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        checksum_algorithm: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_checksum: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Health {
        status: String,
        ts: DateTime<Utc>,
        ready: bool,
        reason: Reason,
        registry_partial: bool,
        registry_stale: bool,
        registry_loaded: bool,
        plugin_mount_in_progress: bool,
        plugin_routes_mounted: bool,
        plugins_mounted: usize,
        plugins_failed: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_plugin_mount_ts: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        plugin_routes_last_duration_ms: Option<u64>,
        redis_enabled: bool,
        redis_healthy: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        redis_states: Option<RedisStates>,
    },
}

impl BroadcastEvent {
    /// SSE event name (`event:` line).
    pub fn event_name(&self) -> &'static str {
        match self {
            BroadcastEvent::Registry { .. } => "registry",
            BroadcastEvent::Health { .. } => "health",
        }
    }

    /// Registry event describing a snapshot's metadata.
    pub fn registry(snapshot: &RegistrySnapshot) -> Self {
        BroadcastEvent::Registry {
            rev: snapshot.rev,
            generated_at: Some(snapshot.generated_at),
            partial: snapshot.partial,
            stale: snapshot.stale,
            expires_at: snapshot.expires_at,
            ttl_ms: snapshot.ttl_ms,
            checksum: snapshot.checksum.clone(),
            checksum_algorithm: snapshot
                .checksum
                .as_ref()
                .map(|_| CHECKSUM_ALGORITHM.to_string()),
            previous_checksum: snapshot.previous_checksum.clone(),
        }
    }

    /// Health event derived from the readiness snapshot plus the last
    /// mount-cycle outcome counts.
    pub fn health(
        readiness: &ReadinessSnapshot,
        plugins_mounted: usize,
        plugins_failed: usize,
        ts: DateTime<Utc>,
    ) -> Self {
        let ready = readiness.ready();
        BroadcastEvent::Health {
            status: if ready { "healthy" } else { "degraded" }.to_string(),
            ts,
            ready,
            reason: readiness.reason(),
            registry_partial: readiness.registry_partial,
            registry_stale: readiness.registry_stale,
            registry_loaded: readiness.registry_loaded,
            plugin_mount_in_progress: readiness.mount_in_progress,
            plugin_routes_mounted: readiness.plugin_routes_mounted,
            plugins_mounted,
            plugins_failed,
            last_plugin_mount_ts: readiness.last_mount_ts,
            plugin_routes_last_duration_ms: readiness.last_mount_duration_ms,
            redis_enabled: readiness.redis_enabled,
            redis_healthy: readiness.redis_connected,
            redis_states: readiness.redis_states.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_event_carries_snapshot_metadata() {
        let mut snapshot = RegistrySnapshot::empty(Utc::now());
        snapshot.rev = 42;
        snapshot.checksum = Some("abc".into());

        let event = BroadcastEvent::registry(&snapshot);
        assert_eq!(event.event_name(), "registry");

        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "registry");
        assert_eq!(v["rev"], 42);
        assert_eq!(v["checksum"], "abc");
        assert_eq!(v["checksumAlgorithm"], "sha256");
        assert_eq!(v["partial"], false);
    }

    #[test]
    fn checksum_algorithm_absent_without_checksum() {
        let snapshot = RegistrySnapshot::empty(Utc::now());
        let v = serde_json::to_value(BroadcastEvent::registry(&snapshot)).unwrap();
        assert!(v.get("checksum").is_none());
        assert!(v.get("checksumAlgorithm").is_none());
    }

    #[test]
    fn health_event_reflects_readiness() {
        use portico_core::readiness::ReadinessState;

        let state = ReadinessState::new();
        state.set_cli_initialized(true);
        state.apply_registry(true, false, false);
        state.begin_mount_cycle();
        state.complete_mount_cycle(3, vec![], 17, Utc::now());

        let event = BroadcastEvent::health(&state.snapshot(), 2, 0, Utc::now());
        assert_eq!(event.event_name(), "health");

        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], "health");
        assert_eq!(v["status"], "healthy");
        assert_eq!(v["ready"], true);
        assert_eq!(v["reason"], "ready");
        assert_eq!(v["pluginsMounted"], 2);
        assert_eq!(v["pluginRoutesLastDurationMs"], 17);
    }

    #[test]
    fn degraded_health_when_registry_partial() {
        use portico_core::readiness::ReadinessState;

        let state = ReadinessState::new();
        state.set_cli_initialized(true);
        state.apply_registry(true, true, false);

        let v =
            serde_json::to_value(BroadcastEvent::health(&state.snapshot(), 0, 1, Utc::now()))
                .unwrap();
        assert_eq!(v["status"], "degraded");
        assert_eq!(v["ready"], false);
        assert_eq!(v["reason"], "registry_partial");
        assert_eq!(v["pluginsFailed"], 1);
    }
}
