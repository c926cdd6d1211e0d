use crate::provider::{DiscoveredSet, DiscoveryProvider, RedisStatus};
use crate::store::SnapshotStore;
use chrono::Utc;
use portico_core::error::GatewayError;
use portico_core::snapshot::{ManifestEntry, RegistrySnapshot, checksum_manifests};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

/// Plugin-ID diff between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// IDs that need (re-)mounting: added plus changed.
    pub fn to_remount(&self) -> Vec<String> {
        let mut ids = self.added.clone();
        ids.extend(self.changed.iter().cloned());
        ids
    }
}

/// Result of one `refresh()` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub previous_rev: u64,
    pub new_rev: u64,
    pub plugins_discovered: usize,
    pub duration_ms: u64,
    #[serde(skip)]
    pub changes: ChangeSet,
}

/// Minimal plugin descriptor for listings.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub id: String,
    pub version: String,
}

/// Discovery client: consumes a [`DiscoveryProvider`], owns rev assignment,
/// checksum computation, and TTL stamping, and surfaces change diffs to the
/// server.
///
/// `refresh()` is serialized: a caller that arrives while another refresh is
/// in flight waits for it and shares its outcome instead of triggering a
/// second provider pass.
pub struct DiscoveryClient {
    provider: Arc<dyn DiscoveryProvider>,
    store: Arc<SnapshotStore>,
    ttl_ms: u64,
    rev_counter: AtomicU64,
    refresh_gate: Mutex<()>,
    refresh_seq: AtomicU64,
    last_outcome: StdMutex<Option<RefreshOutcome>>,
    changes_tx: mpsc::UnboundedSender<ChangeSet>,
    changes_rx: StdMutex<Option<mpsc::UnboundedReceiver<ChangeSet>>>,
}

impl DiscoveryClient {
    pub fn new(provider: Arc<dyn DiscoveryProvider>, ttl_ms: u64) -> Self {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        Self {
            provider,
            store: Arc::new(SnapshotStore::new(RegistrySnapshot::empty(Utc::now()))),
            ttl_ms,
            rev_counter: AtomicU64::new(0),
            refresh_gate: Mutex::new(()),
            refresh_seq: AtomicU64::new(0),
            last_outcome: StdMutex::new(None),
            changes_tx,
            changes_rx: StdMutex::new(Some(changes_rx)),
        }
    }

    /// Block until the first snapshot is installed (or discovery fails).
    /// The initial install does not emit a change notification; the caller
    /// drives the first mount cycle itself.
    pub async fn initialize(&self) -> Result<RefreshOutcome, GatewayError> {
        let outcome = self.refresh_inner(false).await?;
        info!(
            rev = outcome.new_rev,
            plugins = outcome.plugins_discovered,
            "Discovery initialized"
        );
        Ok(outcome)
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.store.current()
    }

    pub fn store(&self) -> Arc<SnapshotStore> {
        Arc::clone(&self.store)
    }

    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.store
            .current()
            .manifests
            .iter()
            .map(|entry| PluginInfo {
                id: entry.plugin_id.clone(),
                version: entry.manifest.version.clone(),
            })
            .collect()
    }

    /// Force re-discovery; installs a new snapshot when content changed (or
    /// the current one is stale/partial) and emits the change diff.
    pub async fn refresh(&self) -> Result<RefreshOutcome, GatewayError> {
        self.refresh_inner(true).await
    }

    /// Mark the current snapshot stale (TTL expiry) without changing rev.
    pub fn mark_stale(&self) {
        self.store.invalidate();
    }

    pub fn redis_status(&self) -> Option<RedisStatus> {
        self.provider.redis_status()
    }

    /// Take the change stream. Yields one [`ChangeSet`] per installed
    /// snapshot that differed from its predecessor. Single consumer.
    pub fn take_change_stream(&self) -> Option<mpsc::UnboundedReceiver<ChangeSet>> {
        self.changes_rx.lock().expect("change stream lock poisoned").take()
    }

    pub async fn dispose(&self) {
        self.provider.dispose().await;
    }

    async fn refresh_inner(&self, notify: bool) -> Result<RefreshOutcome, GatewayError> {
        let ticket = self.refresh_seq.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;

        // Another refresh completed while we waited on the gate: share its
        // outcome rather than running a second discovery pass.
        if self.refresh_seq.load(Ordering::Acquire) != ticket
            && let Some(outcome) = self.last_outcome.lock().expect("outcome lock poisoned").clone()
        {
            return Ok(outcome);
        }

        let started = Instant::now();
        let current = self.store.current();
        let previous_rev = current.rev;

        let set = self.provider.load().await?;
        let checksum = checksum_manifests(&set.manifests);
        let plugins_discovered = set.manifests.len();

        let outcome = if self.should_install(&current, &set, &checksum) {
            let changes = diff_manifests(&current.manifests, &set.manifests);
            let rev = self.rev_counter.fetch_add(1, Ordering::AcqRel) + 1;
            let now = Utc::now();
            let snapshot = RegistrySnapshot {
                rev,
                generated_at: now,
                expires_at: Some(now + chrono::Duration::milliseconds(self.ttl_ms as i64)),
                ttl_ms: Some(self.ttl_ms),
                checksum: Some(checksum),
                previous_checksum: current.checksum.clone(),
                partial: set.partial,
                stale: false,
                corrupted: set.corrupted,
                manifests: set.manifests,
                errors: set.errors,
            };
            self.store.compare_and_replace(snapshot);

            if notify && !changes.is_empty() {
                let _ = self.changes_tx.send(changes.clone());
            }

            RefreshOutcome {
                previous_rev,
                new_rev: rev,
                plugins_discovered,
                duration_ms: started.elapsed().as_millis() as u64,
                changes,
            }
        } else {
            // Content unchanged and the current snapshot is still good.
            RefreshOutcome {
                previous_rev,
                new_rev: previous_rev,
                plugins_discovered,
                duration_ms: started.elapsed().as_millis() as u64,
                changes: ChangeSet::default(),
            }
        };

        *self.last_outcome.lock().expect("outcome lock poisoned") = Some(outcome.clone());
        self.refresh_seq.fetch_add(1, Ordering::AcqRel);

        if outcome.new_rev != outcome.previous_rev {
            info!(
                previous_rev = outcome.previous_rev,
                new_rev = outcome.new_rev,
                plugins = outcome.plugins_discovered,
                "Registry refreshed"
            );
        }
        Ok(outcome)
    }

    fn should_install(
        &self,
        current: &RegistrySnapshot,
        set: &DiscoveredSet,
        checksum: &str,
    ) -> bool {
        if current.rev == 0 || current.stale || current.partial {
            return true;
        }
        if current.partial != set.partial || current.corrupted != set.corrupted {
            return true;
        }
        if current.checksum.as_deref() != Some(checksum) {
            return true;
        }
        false
    }
}

/// Diff two manifest sets by plugin id. `changed` compares canonical
/// manifest serialization, so timestamp-only differences do not count.
pub fn diff_manifests(old: &[ManifestEntry], new: &[ManifestEntry]) -> ChangeSet {
    let old_by_id: BTreeMap<&str, &ManifestEntry> =
        old.iter().map(|e| (e.plugin_id.as_str(), e)).collect();
    let new_by_id: BTreeMap<&str, &ManifestEntry> =
        new.iter().map(|e| (e.plugin_id.as_str(), e)).collect();

    let mut changes = ChangeSet::default();

    for (id, entry) in &new_by_id {
        match old_by_id.get(id) {
            None => changes.added.push((*id).to_string()),
            Some(previous) => {
                let before = serde_json::to_value(&previous.manifest).unwrap_or_default();
                let after = serde_json::to_value(&entry.manifest).unwrap_or_default();
                if before != after {
                    changes.changed.push((*id).to_string());
                }
            }
        }
    }
    for id in old_by_id.keys() {
        if !new_by_id.contains_key(id) {
            changes.removed.push((*id).to_string());
        }
    }

    if !changes.is_empty() {
        warn!(
            added = changes.added.len(),
            removed = changes.removed.len(),
            changed = changes.changed.len(),
            "Registry diff"
        );
    }
    changes
}
