//! Mount-path resolution for plugin REST routes.

/// Normalize a configured base path.
///
/// Strips trailing slashes; `""` and `"/"` collapse to the empty string.
/// A non-empty result always carries a leading slash.
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Compute the ordered, de-duplicated list of absolute mount paths for a
/// route: always the bare route path, plus the prefixed form when the base
/// path is non-empty. The bare form keeps unprefixed requests working during
/// transition windows.
pub fn resolve_paths(base_path: &str, route_path: &str) -> Vec<String> {
    let base = normalize_base_path(base_path);
    let route = if route_path.starts_with('/') {
        route_path.to_string()
    } else {
        format!("/{route_path}")
    };

    let mut paths = vec![route.clone()];
    if !base.is_empty() {
        let prefixed = format!("{base}{route}");
        if prefixed != route {
            paths.push(prefixed);
        }
    }
    paths
}
