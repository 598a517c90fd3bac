// SPDX-License-Identifier: MIT OR Apache-2.0
//! The SSE stream: one `connected` event, then heartbeats.

use axum::response::sse::Event;
use chrono::Utc;
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use uuid::Uuid;

/// Heartbeat cadence on long-lived connections.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Build the event stream for one authenticated connection.
///
/// The first frame is a `connected` event carrying the server identity;
/// after that a `heartbeat` fires every 30 seconds until the client
/// disconnects, which drops the stream. There is no reconnection state;
/// clients simply issue a fresh GET.
pub fn event_stream(
    server: &'static str,
    version: &'static str,
    tenant_id: Uuid,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let connected = futures::stream::once(async move {
        Ok(Event::default().event("connected").data(
            json!({
                "server": server,
                "version": version,
                "tenant_id": tenant_id.to_string(),
                "timestamp": Utc::now().to_rfc3339(),
            })
            .to_string(),
        ))
    });

    let interval = tokio::time::interval_at(
        tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
        HEARTBEAT_INTERVAL,
    );
    let heartbeats = IntervalStream::new(interval).map(|_| {
        Ok(Event::default().event("heartbeat").data(
            json!({ "timestamp": Utc::now().to_rfc3339() }).to_string(),
        ))
    });

    connected.chain(heartbeats)
}
