// =============================================================================
// SSE Trade Stream: live events with catch-up
// =============================================================================
//
// On connect a subscriber receives, in order:
//   1. A `connected` event.
//   2. Up to the catch-up cap of recent events matching its filter, newest
//      first.
//   3. Live events as they publish.
//
// A `: heartbeat <ISO8601>` comment is interleaved roughly every five
// seconds. The subscription (and its broadcast receiver) drops with the
// response stream when the client disconnects.
// =============================================================================

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tracing::info;

use crate::api::rest::parse_types;
use crate::api::ApiError;
use crate::app_state::AppState;
use crate::stream::EventFilter;
use crate::types::TradeStreamEvent;

/// Heartbeat comment cadence.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveQuery {
    /// Comma-separated event types.
    types: Option<String>,
    /// Comma-separated agent ids.
    agent_ids: Option<String>,
}

/// GET /trade-stream/live
pub async fn live_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LiveQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let types = match &query.types {
        Some(raw) => Some(parse_types(raw)?),
        None => None,
    };
    let agent_ids = query.agent_ids.as_ref().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    });

    let subscription = state.stream.subscribe(EventFilter { types, agent_ids });
    info!(catch_up = subscription.catch_up.len(), "sse subscriber connected");

    // 1 + 2: connected marker, then the catch-up burst (newest first).
    let mut initial = Vec::with_capacity(subscription.catch_up.len() + 1);
    initial.push(
        Event::default().event("connected").data(
            serde_json::json!({
                "connectedAt": chrono::Utc::now().to_rfc3339(),
                "catchUp": subscription.catch_up.len(),
            })
            .to_string(),
        ),
    );
    for event in &subscription.catch_up {
        initial.push(sse_event(event));
    }

    // 3: live delivery for as long as the client stays connected.
    let live = stream::unfold(subscription, |mut subscription| async move {
        subscription
            .next_event()
            .await
            .map(|event| (sse_event(&event), subscription))
    });

    let heartbeats = IntervalStream::new(tokio::time::interval(HEARTBEAT_INTERVAL)).map(|_| {
        Event::default().comment(format!("heartbeat {}", chrono::Utc::now().to_rfc3339()))
    });

    let merged = stream::select(live, heartbeats);
    Ok(Sse::new(stream::iter(initial).chain(merged).map(Ok)))
}

/// Frame one bus event: `event:` names the kind, `id:` carries the event id,
/// `data:` carries the JSON envelope.
fn sse_event(event: &TradeStreamEvent) -> Event {
    Event::default()
        .event(event.kind.as_str())
        .id(event.id.to_string())
        .data(serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;

    #[test]
    fn sse_event_frames_kind_id_and_json() {
        let event = TradeStreamEvent {
            id: 42,
            kind: EventKind::AgentDecision,
            agent_id: Some("atlas".to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            payload: serde_json::json!({ "roundId": "round-1" }),
        };

        // Event is opaque; assert through its wire form.
        let framed = format!("{:?}", sse_event(&event));
        assert!(framed.contains("agent_decision"));
        assert!(framed.contains("42"));
        assert!(framed.contains("round-1"));
    }
}
