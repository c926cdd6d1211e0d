use crate::error::GatewayError;
use serde::Serialize;
use serde_json::Value;

/// Response metadata present on every envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub request_id: String,
    pub duration_ms: u64,
    pub api_version: String,
}

/// Success envelope: `{ok: true, data, meta}`.
#[derive(Debug, Serialize)]
pub struct SuccessEnvelope<T: Serialize> {
    pub ok: bool,
    pub data: T,
    pub meta: Meta,
}

/// Failure envelope: `{ok: false, error: {code, message, details?}, meta}`.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorBody,
    pub meta: Meta,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn success<T: Serialize>(data: T, meta: Meta) -> SuccessEnvelope<T> {
    SuccessEnvelope {
        ok: true,
        data,
        meta,
    }
}

pub fn failure(error: ErrorBody, meta: Meta) -> ErrorEnvelope {
    ErrorEnvelope {
        ok: false,
        error,
        meta,
    }
}

impl ErrorBody {
    /// Build the wire error body from a taxonomy error. Internal failure
    /// messages are redacted unless `expose_internal` (dev profile) is set.
    pub fn from_error(err: &GatewayError, expose_internal: bool) -> Self {
        let message = if err.is_redactable() && !expose_internal {
            "Internal server error".to_string()
        } else {
            err.to_string()
        };
        Self {
            code: err.code().to_string(),
            message,
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}
