use crate::reply::{ApiError, RequestContext};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use portico_core::error::GatewayError;
use serde_json::json;
use std::collections::HashMap;

/// `GET {base}/plugins/{id}/ask?q=...` — proxied plugin Q&A. Bound only
/// when the LLM capability is wired in.
pub async fn ask(
    ctx: RequestContext,
    State(state): State<AppState>,
    Path(plugin_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let llm = state
        .platform
        .llm
        .as_ref()
        .ok_or_else(|| GatewayError::BackendUnavailable("llm capability not configured".into()))?;

    let question = params
        .get("q")
        .or_else(|| params.get("question"))
        .map(String::as_str)
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| GatewayError::BadRequest("missing query parameter: q".into()))?;

    let snapshot = state.discovery.snapshot();
    let entry = snapshot
        .find(&plugin_id)
        .ok_or_else(|| GatewayError::NotFound(format!("plugin {plugin_id}")))?;

    let manifest_json =
        serde_json::to_string_pretty(&entry.manifest).unwrap_or_else(|_| "{}".to_string());
    let prompt = format!(
        "You are answering a question about the plugin `{plugin_id}`.\n\
         Its manifest:\n{manifest_json}\n\nQuestion: {question}"
    );

    let answer = llm.ask(&prompt).await?;
    Ok(ctx.ok(json!({
        "pluginId": plugin_id,
        "question": question,
        "answer": answer,
    })))
}
