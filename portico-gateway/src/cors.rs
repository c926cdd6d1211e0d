use http::{HeaderValue, Method, header};
use portico_core::config::{GatewayConfig, Profile};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Dev-profile fallback origins.
const DEV_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://localhost:5173"];

/// Build the CORS layer for the configured profile.
///
/// Dev falls back to the localhost pair when no origins are configured;
/// preview/prod require explicit origins and otherwise disable CORS
/// entirely (`None`).
pub fn build_cors_layer(config: &GatewayConfig) -> Option<CorsLayer> {
    let profile = config.cors_profile();
    let configured: Vec<String> = if config.cors.origins.is_empty() {
        match profile {
            Profile::Dev => DEV_ORIGINS.iter().map(|s| s.to_string()).collect(),
            Profile::Preview | Profile::Prod => {
                info!(profile = profile.as_str(), "CORS disabled: no origins configured");
                return None;
            }
        }
    } else {
        config.cors.origins.clone()
    };

    let origins: Vec<HeaderValue> = configured
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    let mut layer = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::HEAD,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-request-id"),
            header::HeaderName::from_static("x-tenant-id"),
            header::HeaderName::from_static("x-user-id"),
            header::HeaderName::from_static("idempotency-key"),
        ])
        .expose_headers([
            header::HeaderName::from_static("x-request-id"),
            header::HeaderName::from_static("x-schema-version"),
            header::HeaderName::from_static("x-ratelimit-limit"),
            header::HeaderName::from_static("x-ratelimit-remaining"),
            header::RETRY_AFTER,
        ]);

    if config.cors.allow_credentials {
        layer = layer.allow_credentials(true);
    }

    Some(layer)
}
