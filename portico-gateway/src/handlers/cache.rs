use crate::reply::{ApiError, RequestContext};
use crate::state::AppState;
use axum::extract::State;
use axum::response::Response;
use portico_events::BroadcastEvent;
use serde_json::json;
use tracing::info;

/// `POST {base}/cache/invalidate` — force a discovery refresh.
///
/// Concurrent calls coalesce onto one provider pass; when nothing changed
/// the rev is unchanged. A changed snapshot is announced on the bus; the
/// background change loop performs the incremental re-mount.
pub async fn cache_invalidate(
    ctx: RequestContext,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let outcome = state.discovery.refresh().await?;

    if outcome.new_rev != outcome.previous_rev {
        info!(
            previous_rev = outcome.previous_rev,
            new_rev = outcome.new_rev,
            "Cache invalidation installed a new snapshot"
        );
        state
            .bus
            .publish(BroadcastEvent::registry(&state.discovery.snapshot()));
    }

    Ok(ctx.ok(json!({
        "previousRev": outcome.previous_rev,
        "newRev": outcome.new_rev,
        "pluginsDiscovered": outcome.plugins_discovered,
        "durationMs": outcome.duration_ms,
    })))
}
