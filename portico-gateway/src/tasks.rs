use crate::mount::MountOrchestrator;
use crate::state::AppState;
use chrono::Utc;
use portico_events::BroadcastEvent;
use portico_registry::client::ChangeSet;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Incident detector cadence.
const DETECTOR_INTERVAL: Duration = Duration::from_secs(30);
/// Historical metrics cadence.
const HISTORY_INTERVAL: Duration = Duration::from_secs(5);
/// TTL watchdog cadence.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);
/// Server-error delta that flags an incident.
const INCIDENT_THRESHOLD: u64 = 5;
/// Bounded history length (one hour at the 5 s cadence).
const HISTORY_LIMIT: usize = 720;

/// Spawn the long-running background loops. All of them stop when the
/// shutdown token fires.
pub fn spawn_background_tasks(
    state: AppState,
    orchestrator: MountOrchestrator,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    handles.push(tokio::spawn(refresh_loop(
        state.clone(),
        orchestrator.clone(),
        shutdown.clone(),
    )));
    handles.push(tokio::spawn(ttl_watchdog(state.clone(), shutdown.clone())));

    if let Some(changes) = state.discovery.take_change_stream() {
        handles.push(tokio::spawn(change_loop(
            state.clone(),
            orchestrator,
            changes,
            shutdown.clone(),
        )));
    }

    handles.push(tokio::spawn(incident_detector(state.clone(), shutdown.clone())));
    handles.push(tokio::spawn(historical_metrics(state, shutdown)));
    handles
}

/// Reflect the provider's Redis status into readiness.
pub fn update_redis_readiness(state: &AppState) {
    match state.discovery.redis_status() {
        Some(status) => state
            .readiness
            .set_redis(status.enabled, status.healthy, Some(status.roles)),
        None => state.readiness.set_redis(false, false, None),
    }
}

/// Periodic incremental refresh at a third of the snapshot TTL.
async fn refresh_loop(state: AppState, orchestrator: MountOrchestrator, shutdown: CancellationToken) {
    let period = Duration::from_millis((state.config.snapshot_ttl_ms() / 3).max(1_000));
    info!(period_secs = period.as_secs(), "Registry refresh loop started");
    let mut tick = tokio::time::interval(period);
    tick.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {
                if let Err(e) = state.discovery.refresh().await {
                    warn!(error = %e, "Background refresh failed");
                    state.discovery.mark_stale();
                    state.readiness.mark_registry_stale();
                    orchestrator.record_discovery_failure(&e.to_string());
                }
            }
        }
    }
}

/// Marks the snapshot stale once its TTL elapses; the refresh loop fetches
/// the replacement.
async fn ttl_watchdog(state: AppState, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(WATCHDOG_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {
                let snapshot = state.discovery.snapshot();
                if snapshot.rev > 0 && !snapshot.stale && snapshot.is_expired(Utc::now()) {
                    warn!(rev = snapshot.rev, "Snapshot TTL expired, marking stale");
                    state.discovery.mark_stale();
                    state.readiness.mark_registry_stale();

                    let readiness = state.readiness.snapshot();
                    let (mounted, failed) = state.mount_counts();
                    state.bus.publish(BroadcastEvent::health(
                        &readiness, mounted, failed, Utc::now(),
                    ));
                }
            }
        }
    }
}

/// Applies registry change diffs: announce, update readiness, re-mount
/// incrementally.
async fn change_loop(
    state: AppState,
    orchestrator: MountOrchestrator,
    mut changes: mpsc::UnboundedReceiver<ChangeSet>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            diff = changes.recv() => {
                let Some(diff) = diff else { break };
                let snapshot = state.discovery.snapshot();
                info!(
                    rev = snapshot.rev,
                    added = diff.added.len(),
                    removed = diff.removed.len(),
                    changed = diff.changed.len(),
                    "Registry change received"
                );

                state.bus.publish(BroadcastEvent::registry(&snapshot));
                state
                    .readiness
                    .apply_registry(snapshot.rev > 0, snapshot.partial, snapshot.stale);
                update_redis_readiness(&state);

                orchestrator.mount_changes(&snapshot, &diff).await;
            }
        }
    }
}

/// Flags server-error bursts into the cache capability.
async fn incident_detector(state: AppState, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(DETECTOR_INTERVAL);
    let mut last_server_errors = 0u64;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {
                let snapshot = state.metrics.snapshot();
                let delta = snapshot.requests.server_errors.saturating_sub(last_server_errors);
                last_server_errors = snapshot.requests.server_errors;

                if delta >= INCIDENT_THRESHOLD {
                    warn!(server_errors = delta, "Server-error burst detected");
                    state.platform.cache.set(
                        "incidents:last",
                        json!({
                            "ts": Utc::now(),
                            "serverErrors": delta,
                            "totalRequests": snapshot.requests.total,
                        }),
                        None,
                    ).await;
                }
            }
        }
    }
}

/// Appends bounded metric history snapshots through the cache capability.
async fn historical_metrics(state: AppState, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(HISTORY_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {
                let snapshot = state.metrics.snapshot();
                let point = json!({
                    "ts": Utc::now(),
                    "total": snapshot.requests.total,
                    "success": snapshot.requests.success,
                    "clientErrors": snapshot.requests.client_errors,
                    "serverErrors": snapshot.requests.server_errors,
                });

                let mut history = state
                    .platform
                    .cache
                    .get("metrics:history")
                    .await
                    .and_then(|v| v.as_array().cloned())
                    .unwrap_or_default();
                history.push(point);
                if history.len() > HISTORY_LIMIT {
                    let excess = history.len() - HISTORY_LIMIT;
                    history.drain(..excess);
                }
                debug!(points = history.len(), "Metric history updated");
                state
                    .platform
                    .cache
                    .set("metrics:history", serde_json::Value::Array(history), None)
                    .await;
            }
        }
    }
}
