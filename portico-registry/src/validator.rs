use portico_core::manifest::{ManifestV3, RestRoute, split_handler};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

fn semver_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+(?:[-+][0-9A-Za-z.+-]+)?$").unwrap())
}

fn base_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^/v\d+(?:/.*)?$").unwrap())
}

/// Manifest-level structural issues (identity, version, base path). Any of
/// these fails the plugin as a whole.
pub fn manifest_issues(manifest: &ManifestV3) -> Vec<String> {
    let mut errors = Vec::new();

    if manifest.id.trim().is_empty() {
        errors.push("id missing".to_string());
    }
    if !semver_re().is_match(&manifest.version) {
        errors.push(format!("version not semver-shaped: {:?}", manifest.version));
    }
    if let Some(base_path) = manifest.rest.as_ref().and_then(|r| r.base_path.as_deref())
        && !base_path_re().is_match(base_path)
    {
        errors.push(format!("rest.basePath must match /vN/...: {base_path:?}"));
    }

    errors
}

/// Route-level structural issues, keyed by route index in declaration
/// order. A flagged route is dropped; its siblings are unaffected.
pub fn route_issues(manifest: &ManifestV3) -> Vec<(usize, String)> {
    let mut errors = Vec::new();
    let mut seen: HashSet<(&'static str, &str)> = HashSet::new();

    for (idx, route) in manifest.rest_routes().iter().enumerate() {
        if route.path.trim().is_empty() {
            errors.push((idx, format!("route[{idx}]: path missing")));
            continue;
        }
        if split_handler(&route.handler).is_none() {
            errors.push((
                idx,
                format!(
                    "route[{idx}] {} {}: handler must be \"file#export\"",
                    route.method, route.path
                ),
            ));
        }
        if !seen.insert((route.method.as_str(), route.path.as_str())) {
            errors.push((
                idx,
                format!(
                    "route[{idx}] {} {}: duplicate route within plugin",
                    route.method, route.path
                ),
            ));
        }
    }

    errors
}

/// Full structural validation of a manifest. Pure; errors are reported in
/// declaration order (manifest-level first, then routes).
pub fn validate_structure(manifest: &ManifestV3) -> Vec<String> {
    let mut errors = manifest_issues(manifest);
    errors.extend(route_issues(manifest).into_iter().map(|(_, e)| e));
    errors
}

/// Handler-presence check: resolve each route's handler file against the
/// plugin root and drop routes whose file does not exist. Returns the
/// surviving routes and per-route errors, both in declaration order.
pub fn check_handler_files(
    manifest: &ManifestV3,
    plugin_root: &Path,
) -> (Vec<RestRoute>, Vec<String>) {
    check_routes(manifest.rest_routes(), plugin_root)
}

/// Handler-presence check over an explicit route list (used by the mount
/// orchestrator after structurally bad routes have been dropped).
pub fn check_routes(routes: &[RestRoute], plugin_root: &Path) -> (Vec<RestRoute>, Vec<String>) {
    let mut surviving = Vec::new();
    let mut errors = Vec::new();

    for (idx, route) in routes.iter().enumerate() {
        let Some((file, _export)) = route.handler_parts() else {
            errors.push(format!(
                "route[{idx}] {} {}: handler must be \"file#export\"",
                route.method, route.path
            ));
            continue;
        };

        let resolved = plugin_root.join(file.trim_start_matches("./"));
        if resolved.exists() {
            surviving.push(route.clone());
        } else {
            debug!(
                handler = %route.handler,
                path = %resolved.display(),
                "Handler file missing, dropping route"
            );
            errors.push(format!(
                "route[{idx}] {} {}: handler file not found: {}",
                route.method,
                route.path,
                resolved.display()
            ));
        }
    }

    (surviving, errors)
}
