use thiserror::Error;

/// Unified error type for the Portico gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Mount error: {0}")]
    Mount(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded")]
    RateLimited {
        /// Seconds until the client may retry.
        retry_after_secs: u64,
    },

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Map to HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::NotFound(_) => 404,
            GatewayError::BadRequest(_) | GatewayError::Validation(_) => 400,
            GatewayError::Unauthorized(_) => 401,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::Timeout(_) => 504,
            GatewayError::BackendUnavailable(_) | GatewayError::Discovery(_) => 503,
            _ => 500,
        }
    }

    /// Stable machine-readable code carried in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "CONFIG_ERROR",
            GatewayError::Discovery(_) => "DISCOVERY_ERROR",
            GatewayError::Validation(_) => "VALIDATION_ERROR",
            GatewayError::Mount(_) => "MOUNT_ERROR",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::BadRequest(_) => "BAD_REQUEST",
            GatewayError::Unauthorized(_) => "UNAUTHORIZED",
            GatewayError::RateLimited { .. } => "RATE_LIMITED",
            GatewayError::Timeout(_) => "REQUEST_TIMEOUT",
            GatewayError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            GatewayError::Stream(_) => "STREAM_ERROR",
            GatewayError::Io(_) | GatewayError::Serde(_) | GatewayError::Internal(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Whether the message is safe to expose outside the dev profile.
    /// Internal failures are redacted; taxonomy errors carry curated text.
    pub fn is_redactable(&self) -> bool {
        matches!(
            self,
            GatewayError::Internal(_) | GatewayError::Io(_) | GatewayError::Serde(_)
        )
    }
}

/// Truncate an arbitrary failure into a short single-line reason.
/// Used for per-plugin mount failure records.
pub fn short_reason(prefix: &str, detail: &str) -> String {
    let flat = detail.replace(['\n', '\r'], " ");
    let mut reason = if prefix.is_empty() {
        flat
    } else {
        format!("{prefix} {flat}")
    };
    if reason.len() > 120 {
        let mut cut = 117;
        while !reason.is_char_boundary(cut) {
            cut -= 1;
        }
        reason.truncate(cut);
        reason.push_str("...");
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::NotFound("x".into()).status_code(), 404);
        assert_eq!(GatewayError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(GatewayError::Unauthorized("x".into()).status_code(), 401);
        assert_eq!(
            GatewayError::RateLimited { retry_after_secs: 1 }.status_code(),
            429
        );
        assert_eq!(GatewayError::Timeout(30_000).status_code(), 504);
        assert_eq!(
            GatewayError::BackendUnavailable("cron manager".into()).status_code(),
            503
        );
        assert_eq!(GatewayError::Internal("x".into()).status_code(), 500);
        assert_eq!(GatewayError::Config("x".into()).status_code(), 500);
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(GatewayError::Timeout(1).code(), "REQUEST_TIMEOUT");
        assert_eq!(GatewayError::NotFound("r".into()).code(), "NOT_FOUND");
        assert_eq!(
            GatewayError::RateLimited { retry_after_secs: 3 }.code(),
            "RATE_LIMITED"
        );
        assert_eq!(GatewayError::Internal("boom".into()).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn internal_errors_are_redactable() {
        assert!(GatewayError::Internal("secret".into()).is_redactable());
        assert!(!GatewayError::NotFound("r".into()).is_redactable());
        assert!(!GatewayError::Unauthorized("token".into()).is_redactable());
    }

    #[test]
    fn short_reason_truncates_with_ellipsis() {
        let long = "x".repeat(300);
        let reason = short_reason("rest_mount_failed", &long);
        assert_eq!(reason.len(), 120);
        assert!(reason.ends_with("..."));
        assert!(reason.starts_with("rest_mount_failed"));
    }

    #[test]
    fn short_reason_flattens_newlines() {
        let reason = short_reason("rest_validation_failed", "line one\nline two");
        assert_eq!(reason, "rest_validation_failed line one line two");
    }
}
