// SPDX-License-Identifier: GPL-3.0-or-later
use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::ApiState;

/// Stream realtime events (hunt progress and friends) as server-sent events.
/// The SSE event name is the hub channel; the data is the JSON payload.
#[utoipa::path(
    get,
    path = "/api/v1/events",
    responses(
        (status = 200, description = "Server-sent event stream", body = String, content_type = "text/event-stream")
    ),
    tag = "events"
)]
pub async fn stream_events(
    State(state): State<ApiState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.hub.subscribe();
    debug!(target: "api", subscribers = state.hub.subscriber_count(), "event stream opened");

    let stream = stream! {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    yield Ok(Event::default().event(message.channel).data(message.payload));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "api", skipped, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
