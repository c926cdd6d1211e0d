use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::stream::Stream;
use http::HeaderValue;
use http::header::CACHE_CONTROL;
use portico_events::BroadcastEvent;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use tracing::{debug, info};

/// `GET {base}/events/registry` — authenticated SSE stream.
///
/// On attach the client receives a `: connected` comment, a `registry`
/// event replaying the current snapshot, and a `health` event; afterwards
/// every bus event is forwarded until the client disconnects.
pub async fn registry_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let events_config = &state.config.events.registry;
    if let Some(expected) = events_config.token.as_deref() {
        let presented = extract_token(
            &headers,
            &params,
            &events_config.header_name,
            &events_config.query_param,
        );
        if presented.as_deref() != Some(expected) {
            debug!("SSE token mismatch");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": "unauthorized",
                    "message": "missing or invalid events token",
                })),
            )
                .into_response();
        }
    }

    // Subscribe at attach time: events published while the snapshot replay
    // is in flight must not be lost.
    let events = state.bus.subscribe();
    info!(subscribers = state.bus.subscriber_count(), "SSE client attached");
    let mut response = Sse::new(event_stream(state, events))
        .keep_alive(KeepAlive::default())
        .into_response();
    response.headers_mut().insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    response
}

fn event_stream(
    state: AppState,
    mut events: portico_events::EventStream,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        yield Ok(Event::default().comment("connected"));

        // Replay: the bus has no history, so the attach point gets a fresh
        // snapshot first.
        let snapshot = state.discovery.snapshot();
        yield Ok(to_sse_event(&BroadcastEvent::registry(&snapshot)));

        // Health follows; a failure to compute it must not kill the stream.
        let readiness = state.readiness.snapshot();
        let (mounted, failed) = state.mount_counts();
        yield Ok(to_sse_event(&BroadcastEvent::health(&readiness, mounted, failed, Utc::now())));

        while let Some(event) = events.recv().await {
            yield Ok(to_sse_event(&event));
        }
    }
}

fn to_sse_event(event: &BroadcastEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialize broadcast event");
        "{}".to_string()
    });
    Event::default().event(event.event_name()).data(data)
}

/// Token extraction: the configured header (as `Bearer <t>` or raw) or the
/// configured query parameter.
fn extract_token(
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    header_name: &str,
    query_param: &str,
) -> Option<String> {
    if let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .unwrap_or(value)
            .trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    params.get(query_param).cloned().filter(|t| !t.is_empty())
}
