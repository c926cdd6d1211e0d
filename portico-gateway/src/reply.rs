use axum::Json;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use http::HeaderValue;
use http::header::RETRY_AFTER;
use portico_core::envelope::{ErrorBody, Meta, failure, success};
use portico_core::error::GatewayError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Per-request context established by the request-ID middleware. Handlers
/// extract it to build envelopes with consistent metadata.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub started: Instant,
    pub api_version: String,
    pub expose_internal: bool,
}

impl RequestContext {
    pub fn meta(&self) -> Meta {
        Meta {
            request_id: self.request_id.clone(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            api_version: self.api_version.clone(),
        }
    }

    /// 200 success envelope.
    pub fn ok<T: Serialize>(&self, data: T) -> Response {
        self.respond(StatusCode::OK, data)
    }

    /// Success envelope with an explicit status.
    pub fn respond<T: Serialize>(&self, status: StatusCode, data: T) -> Response {
        (status, Json(success(data, self.meta()))).into_response()
    }

    /// Error envelope built in place (for handlers that attach details).
    pub fn fail(&self, status: StatusCode, body: ErrorBody) -> Response {
        (status, Json(failure(body, self.meta()))).into_response()
    }
}

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for RequestContext {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Error carried through the response until the context middleware rewrites
/// it into a full envelope (it owns the request metadata).
#[derive(Clone)]
pub struct PendingError(pub Arc<GatewayError>);

/// Handler-side error wrapper. Converts the taxonomy into a response whose
/// body is finalized by the context middleware.
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = status.into_response();
        if let GatewayError::RateLimited { retry_after_secs } = &self.0 {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }
        response
            .extensions_mut()
            .insert(PendingError(Arc::new(self.0)));
        response
    }
}

pub type ApiResult = Result<Response, ApiError>;
