use crate::manifest::ManifestV3;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Immutable registry snapshot: the fleet of manifests known at a point in
/// time. Never mutated after publication; a newer snapshot supersedes by
/// `rev`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    /// Monotonically increasing within a process.
    pub rev: u64,

    pub generated_at: DateTime<Utc>,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub ttl_ms: Option<u64>,

    /// sha256 over the canonical serialization of the manifests.
    #[serde(default)]
    pub checksum: Option<String>,

    #[serde(default)]
    pub previous_checksum: Option<String>,

    /// Discovery did not see the full plugin set.
    #[serde(default)]
    pub partial: bool,

    /// Rev is older than the configured TTL.
    #[serde(default)]
    pub stale: bool,

    /// At least one manifest failed structural validation during discovery.
    #[serde(default)]
    pub corrupted: bool,

    #[serde(default)]
    pub manifests: Vec<ManifestEntry>,

    #[serde(default)]
    pub errors: Vec<DiscoveryIssue>,
}

/// One discovered manifest plus its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub plugin_id: String,
    pub manifest: ManifestV3,
    pub plugin_root: PathBuf,
    pub source: String,
    pub discovered_at: DateTime<Utc>,

    #[serde(default)]
    pub build_timestamp: Option<DateTime<Utc>>,
}

/// Per-plugin discovery failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryIssue {
    pub plugin_id: String,
    pub error: String,
}

impl RegistrySnapshot {
    /// The empty pre-discovery snapshot (`rev == 0`, nothing loaded).
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            rev: 0,
            generated_at: now,
            expires_at: None,
            ttl_ms: None,
            checksum: None,
            previous_checksum: None,
            partial: false,
            stale: false,
            corrupted: false,
            manifests: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    pub fn plugin_ids(&self) -> Vec<&str> {
        self.manifests.iter().map(|m| m.plugin_id.as_str()).collect()
    }

    pub fn find(&self, plugin_id: &str) -> Option<&ManifestEntry> {
        self.manifests.iter().find(|m| m.plugin_id == plugin_id)
    }
}

/// Checksum over the canonical serialization of a manifest set: manifests
/// keyed by plugin id in sorted order, timestamps excluded. Equal checksums
/// imply structurally equal manifest sets.
pub fn checksum_manifests(entries: &[ManifestEntry]) -> String {
    let canonical: BTreeMap<&str, &ManifestV3> = entries
        .iter()
        .map(|e| (e.plugin_id.as_str(), &e.manifest))
        .collect();
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{digest:x}")
}

pub const CHECKSUM_ALGORITHM: &str = "sha256";
