//! SSE streaming endpoint for discovery job events.
//!
//! GET /api/discovery/jobs/:job_id/stream
//!
//! Attaches to the job's stream-hub topic and forwards events as SSE frames;
//! the event's `type` tag becomes the SSE event name. Subscribers get a
//! synthesized `job_started` (and `complete`, if the job already finished)
//! from current state, then live events. The stream closes after the terminal
//! event.
//!
//! A subscriber that falls behind the per-channel buffer is dropped: it
//! receives a final `error_event` frame and the stream ends. Publishers are
//! never back-pressured by slow consumers.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::server::app::AppState;

/// SSE stream handler.
pub async fn stream_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let (initial, rx) = state
        .orchestrator
        .subscribe(job_id)
        .ok_or(StatusCode::NOT_FOUND)?;

    // If the synthesized catch-up already ends in `complete`, the live tail
    // never starts.
    let already_complete = initial.iter().any(is_terminal);

    let head = stream::iter(
        initial
            .into_iter()
            .map(|value| Ok::<_, Infallible>(to_sse_event(&value))),
    );

    let live = stream::unfold((rx, already_complete), move |(mut rx, done)| async move {
        if done {
            return None;
        }
        match rx.recv().await {
            Ok(value) => {
                let terminal = is_terminal(&value);
                Some((Ok(to_sse_event(&value)), (rx, terminal)))
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(job_id = %job_id, skipped, "Dropping slow SSE subscriber");
                let error = serde_json::json!({
                    "type": "error_event",
                    "message": "subscriber_too_slow",
                });
                Some((Ok(to_sse_event(&error)), (rx, true)))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    });

    Ok(Sse::new(head.chain(live)).keep_alive(KeepAlive::default()))
}

fn is_terminal(value: &serde_json::Value) -> bool {
    value.get("type").and_then(|t| t.as_str()) == Some("complete")
}

fn to_sse_event(value: &serde_json::Value) -> Event {
    let event_name = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("message");

    Event::default().event(event_name).data(value.to_string())
}
