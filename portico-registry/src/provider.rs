use async_trait::async_trait;
use chrono::Utc;
use portico_core::error::GatewayError;
use portico_core::manifest::ManifestV3;
use portico_core::readiness::RedisStates;
use portico_core::snapshot::{DiscoveryIssue, ManifestEntry};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, warn};

/// The result of one full discovery pass, before the client stamps revs,
/// TTLs, and checksums.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredSet {
    pub manifests: Vec<ManifestEntry>,
    pub errors: Vec<DiscoveryIssue>,

    /// Discovery could not see the full plugin set.
    pub partial: bool,

    /// At least one manifest failed structural parsing.
    pub corrupted: bool,
}

/// Health of the optional Redis coordination layer, as reported by a
/// provider that uses one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisStatus {
    pub enabled: bool,
    pub healthy: bool,
    pub roles: RedisStates,
}

/// Capability interface the gateway consumes for plugin discovery.
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    /// Run one full discovery pass.
    async fn load(&self) -> Result<DiscoveredSet, GatewayError>;

    /// Redis coordination status, when the provider uses Redis.
    fn redis_status(&self) -> Option<RedisStatus> {
        None
    }

    /// Release provider resources on shutdown.
    async fn dispose(&self) {}
}

/// Filesystem discovery provider: scans a root directory for
/// `<plugin>/manifest.json` files.
///
/// Parse failures land in the snapshot's error list and flag the set as
/// corrupted; a missing root directory yields a partial set.
pub struct FsDiscoveryProvider {
    root: PathBuf,
}

impl FsDiscoveryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

#[async_trait]
impl DiscoveryProvider for FsDiscoveryProvider {
    async fn load(&self) -> Result<DiscoveredSet, GatewayError> {
        let mut set = DiscoveredSet::default();

        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Plugin directory unreadable");
                set.partial = true;
                set.errors.push(DiscoveryIssue {
                    plugin_id: "discovery".to_string(),
                    error: format!("plugin directory unreadable: {e}"),
                });
                return Ok(set);
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            let manifest_path = dir.join("manifest.json");
            if !manifest_path.exists() {
                debug!(dir = %dir.display(), "No manifest.json, skipping");
                continue;
            }

            let dir_name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let raw = match std::fs::read(&manifest_path) {
                Ok(raw) => raw,
                Err(e) => {
                    set.partial = true;
                    set.errors.push(DiscoveryIssue {
                        plugin_id: dir_name,
                        error: format!("manifest unreadable: {e}"),
                    });
                    continue;
                }
            };

            match serde_json::from_slice::<ManifestV3>(&raw) {
                Ok(mut manifest) => {
                    if manifest.plugin_root.as_os_str().is_empty() {
                        manifest.plugin_root = dir.clone();
                    }
                    set.manifests.push(ManifestEntry {
                        plugin_id: manifest.id.clone(),
                        plugin_root: manifest.plugin_root.clone(),
                        manifest,
                        source: manifest_path.display().to_string(),
                        discovered_at: Utc::now(),
                        build_timestamp: None,
                    });
                }
                Err(e) => {
                    warn!(plugin = %dir_name, error = %e, "Failed to parse manifest");
                    set.corrupted = true;
                    set.errors.push(DiscoveryIssue {
                        plugin_id: dir_name,
                        error: format!("manifest parse failed: {e}"),
                    });
                }
            }
        }

        Ok(set)
    }
}
