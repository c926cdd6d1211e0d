use arc_swap::ArcSwap;
use portico_core::snapshot::RegistrySnapshot;
use std::sync::Arc;
use tracing::info;

/// Single-writer pointer to the current registry snapshot.
///
/// Reads are lock-free; replacement installs a new snapshot only when its
/// rev supersedes the current one, so readers always observe a
/// monotonically non-decreasing rev.
pub struct SnapshotStore {
    inner: ArcSwap<RegistrySnapshot>,
}

impl SnapshotStore {
    pub fn new(initial: RegistrySnapshot) -> Self {
        Self {
            inner: ArcSwap::new(Arc::new(initial)),
        }
    }

    pub fn current(&self) -> Arc<RegistrySnapshot> {
        self.inner.load_full()
    }

    /// Install `snapshot` iff its rev is strictly greater than the current
    /// rev. Returns whether the snapshot was installed.
    pub fn compare_and_replace(&self, snapshot: RegistrySnapshot) -> bool {
        let candidate = Arc::new(snapshot);
        loop {
            let current = self.inner.load_full();
            if candidate.rev <= current.rev {
                return false;
            }
            let previous = self
                .inner
                .compare_and_swap(&current, Arc::clone(&candidate));
            if Arc::ptr_eq(&previous, &current) {
                info!(rev = candidate.rev, plugins = candidate.manifests.len(), "Snapshot installed");
                return true;
            }
        }
    }

    /// Mark the current snapshot stale without changing its rev. Used when
    /// the TTL expires and no fresh snapshot has arrived.
    pub fn invalidate(&self) {
        loop {
            let current = self.inner.load_full();
            if current.stale {
                return;
            }
            let mut updated = (*current).clone();
            updated.stale = true;
            let previous = self.inner.compare_and_swap(&current, Arc::new(updated));
            if Arc::ptr_eq(&previous, &current) {
                info!(rev = current.rev, "Snapshot marked stale");
                return;
            }
        }
    }
}
