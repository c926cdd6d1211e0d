use async_trait::async_trait;
use bytes::Bytes;
use portico_core::error::GatewayError;
use portico_core::manifest::{ManifestV3, RestRoute};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// Opaque reference to a prepared plugin entry point.
///
/// The backend maps `(file, export)` tuples to handles at mount time; the
/// gateway never touches plugin artifacts directly.
#[derive(Debug, Clone)]
pub struct EntryHandle {
    plugin_id: String,
    token: u64,
}

impl EntryHandle {
    pub fn new(plugin_id: impl Into<String>, token: u64) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            token,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Everything the backend needs to run one plugin handler invocation.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    /// Matched route pattern (with `:param` placeholders).
    pub route: String,
    pub method: String,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    /// Request headers, hop-by-hop headers removed.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub tenant_id: Option<String>,
    pub actor: Option<String>,
    pub idempotency_key: Option<String>,
    /// Capabilities granted at mount (manifest permissions ∩ config grants).
    pub capabilities: Vec<String>,
    pub timeout_ms: u64,
    pub request_id: String,
}

/// Raw backend response, mapped into the success envelope by the
/// dispatcher.
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Sandbox execution contract consumed by the gateway.
#[async_trait]
pub trait ExecuteBackend: Send + Sync {
    /// Resolve a route's entry point into an opaque handle. Called once per
    /// route per mount cycle; a refusal fails that route's mount.
    async fn prepare(
        &self,
        manifest: &ManifestV3,
        route: &RestRoute,
    ) -> Result<EntryHandle, GatewayError>;

    /// Invoke a prepared entry. Implementations must honor the cancellation
    /// token cooperatively — it fires on client disconnect or timeout.
    async fn execute(
        &self,
        entry: &EntryHandle,
        request: ExecuteRequest,
        cancel: CancellationToken,
    ) -> Result<ExecuteResult, GatewayError>;
}

/// Development/test backend: answers every invocation with a JSON
/// description of the request it received.
pub struct EchoBackend {
    next_token: AtomicU64,
}

impl EchoBackend {
    pub fn new() -> Self {
        Self {
            next_token: AtomicU64::new(1),
        }
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecuteBackend for EchoBackend {
    async fn prepare(
        &self,
        manifest: &ManifestV3,
        route: &RestRoute,
    ) -> Result<EntryHandle, GatewayError> {
        let (_file, _export) = route.handler_parts().ok_or_else(|| {
            GatewayError::Mount(format!("unparseable handler: {}", route.handler))
        })?;
        Ok(EntryHandle::new(
            manifest.id.clone(),
            self.next_token.fetch_add(1, Ordering::Relaxed),
        ))
    }

    async fn execute(
        &self,
        entry: &EntryHandle,
        request: ExecuteRequest,
        cancel: CancellationToken,
    ) -> Result<ExecuteResult, GatewayError> {
        if cancel.is_cancelled() {
            return Err(GatewayError::Internal("execution cancelled".into()));
        }

        let echo_body: Value = serde_json::from_slice(&request.body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&request.body).into_owned()));

        let body = serde_json::json!({
            "plugin": entry.plugin_id(),
            "route": request.route,
            "method": request.method,
            "params": request.params,
            "query": request.query,
            "tenantId": request.tenant_id,
            "actor": request.actor,
            "capabilities": request.capabilities,
            "echo": echo_body,
        });

        Ok(ExecuteResult {
            status: 200,
            headers: vec![("x-portico-backend".to_string(), "echo".to_string())],
            body: Bytes::from(serde_json::to_vec(&body)?),
        })
    }
}
