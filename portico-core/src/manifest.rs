use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A plugin manifest (schema v3): identity plus the surface the plugin
/// contributes to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestV3 {
    /// Unique plugin identifier within a snapshot.
    pub id: String,

    /// Semver version string.
    pub version: String,

    /// Absolute filesystem root of the plugin artifacts.
    #[serde(default)]
    pub plugin_root: PathBuf,

    /// Declared permissions, used as capability grants for the backend.
    #[serde(default)]
    pub permissions: Permissions,

    /// REST surface contributed by the plugin.
    #[serde(default)]
    pub rest: Option<RestSurface>,

    /// Opaque UI metadata surfaced by the studio registry endpoint.
    #[serde(default)]
    pub studio: Option<serde_json::Value>,
}

/// Declared plugin permissions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    #[serde(default)]
    pub fs_read: Vec<String>,

    #[serde(default)]
    pub fs_write: Vec<String>,

    #[serde(default)]
    pub allowed_domains: Vec<String>,

    #[serde(default)]
    pub allowed_commands: Vec<String>,

    #[serde(default)]
    pub state_namespaces: Vec<String>,

    /// Explicitly declared capability names, in addition to those implied
    /// by the permission groups above.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// REST surface: a base path plus an ordered route list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestSurface {
    /// Versioned base path, pattern `/vN/...`.
    #[serde(default)]
    pub base_path: Option<String>,

    #[serde(default)]
    pub routes: Vec<RestRoute>,
}

/// A single REST route declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestRoute {
    pub method: RouteMethod,

    /// Route path, may include `:param` segments.
    pub path: String,

    /// Entry point as `"file#export"`.
    pub handler: String,

    /// Per-route timeout budget override.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Per-route rate-limit override.
    #[serde(default)]
    pub rate_limit: Option<RateLimitOverride>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitOverride {
    pub max: u64,
    pub time_window_ms: u64,
}

/// HTTP methods a route declaration may use.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl RouteMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteMethod::Get => "GET",
            RouteMethod::Post => "POST",
            RouteMethod::Put => "PUT",
            RouteMethod::Delete => "DELETE",
            RouteMethod::Patch => "PATCH",
            RouteMethod::Head => "HEAD",
            RouteMethod::Options => "OPTIONS",
        }
    }

    pub fn from_http(method: &http::Method) -> Option<Self> {
        match *method {
            http::Method::GET => Some(RouteMethod::Get),
            http::Method::POST => Some(RouteMethod::Post),
            http::Method::PUT => Some(RouteMethod::Put),
            http::Method::DELETE => Some(RouteMethod::Delete),
            http::Method::PATCH => Some(RouteMethod::Patch),
            http::Method::HEAD => Some(RouteMethod::Head),
            http::Method::OPTIONS => Some(RouteMethod::Options),
            _ => None,
        }
    }
}

impl std::fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl RestRoute {
    /// Split `"file#export"` into its parts. Exactly one `#`, both sides
    /// non-empty.
    pub fn handler_parts(&self) -> Option<(&str, &str)> {
        split_handler(&self.handler)
    }
}

/// Split a handler reference into `(file, export)`.
pub fn split_handler(handler: &str) -> Option<(&str, &str)> {
    let mut parts = handler.splitn(3, '#');
    let file = parts.next()?;
    let export = parts.next()?;
    if parts.next().is_some() || file.is_empty() || export.is_empty() {
        return None;
    }
    Some((file, export))
}

impl ManifestV3 {
    /// Whether this manifest contributes any REST routes.
    pub fn has_rest_routes(&self) -> bool {
        self.rest.as_ref().is_some_and(|r| !r.routes.is_empty())
    }

    pub fn rest_routes(&self) -> &[RestRoute] {
        self.rest.as_ref().map(|r| r.routes.as_slice()).unwrap_or(&[])
    }
}

impl Permissions {
    /// Capability names implied by the declared permissions, plus any
    /// explicit entries. Deduplicated, declaration order preserved.
    pub fn capability_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        };
        if !self.fs_read.is_empty() {
            push("fs:read");
        }
        if !self.fs_write.is_empty() {
            push("fs:write");
        }
        if !self.allowed_domains.is_empty() {
            push("net:request");
        }
        if !self.allowed_commands.is_empty() {
            push("proc:exec");
        }
        if !self.state_namespaces.is_empty() {
            push("state:access");
        }
        for cap in &self.capabilities {
            push(cap);
        }
        names
    }

    /// Capabilities actually granted to the plugin: the intersection of its
    /// declared permissions and the gateway's configured allow-list.
    pub fn granted(&self, allow_list: &[String]) -> Vec<String> {
        self.capability_names()
            .into_iter()
            .filter(|name| allow_list.iter().any(|a| a == name))
            .collect()
    }
}
