//! Server-sent event dispatcher.
//!
//! A stream is a bounded polling loop: every tick it re-validates the
//! session and drains the queue, emitting one `tool-request` per item.
//! It ends with `reconnect` after the configured maximum duration (or on
//! shutdown) and with `session-expired` when the session goes away. No
//! state outlives the response; clients reopen or fall back to
//! `GET /api/requests`.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use chrono::Utc;
use futures::Stream;
use metrics::counter;
use relay_core::{DispatchedRequest, RelayError, SessionCode, StreamId};
use relay_engine::Relay;
use relay_settings::StreamSettings;
use relay_telemetry::metrics::{REQUESTS_DISPATCHED_TOTAL, SSE_STREAMS_TOTAL};
use serde_json::json;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::requests::CodeQuery;
use super::sessions::parse_code;
use crate::error::ApiError;
use crate::server::AppState;
use crate::shutdown::StreamLease;

/// Event names on the wire.
pub mod events {
    /// First event of every stream.
    pub const CONNECTION: &str = "connection";
    /// One queued request.
    pub const TOOL_REQUEST: &str = "tool-request";
    /// Keeps idle connections open through proxies.
    pub const HEARTBEAT: &str = "heartbeat";
    /// Final event of a stream that ended normally.
    pub const RECONNECT: &str = "reconnect";
    /// Final event once the session is gone.
    pub const SESSION_EXPIRED: &str = "session-expired";
}

/// `GET /api/stream?code=`.
///
/// The session is checked before the stream opens so unknown and expired
/// codes get a normal JSON error instead of an event stream.
pub async fn open_stream(
    State(state): State<AppState>,
    Query(query): Query<CodeQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let code = parse_code(query.code.as_deref(), "code")?;
    let _ = state.relay.sessions.validate(&code).await?;

    counter!(SSE_STREAMS_TOTAL).increment(1);
    let settings = state.relay.settings().stream.clone();
    Ok(Sse::new(dispatch_events(
        state.relay.clone(),
        code,
        settings,
        state.shutdown.open_stream(),
    )))
}

enum Step {
    Tick,
    Heartbeat,
    Deadline,
    Shutdown,
}

/// The event sequence for one stream. `lease` keeps the stream counted
/// until the sequence ends or the client goes away.
pub fn dispatch_events(
    relay: Relay,
    code: SessionCode,
    settings: StreamSettings,
    lease: StreamLease,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let stream_id = StreamId::new();
        let retry = settings.retry_hint();
        info!(stream_id = %stream_id, session_code = %code, "event stream opened");

        yield Ok(Event::default()
            .event(events::CONNECTION)
            .retry(retry)
            .data(json!({
                "streamId": stream_id,
                "sessionCode": code,
                "maxDurationMs": millis(settings.max_duration()),
            }).to_string()));

        let start = Instant::now();
        let mut deadline = std::pin::pin!(tokio::time::sleep_until(start + settings.max_duration()));
        let mut tick = tokio::time::interval(settings.tick());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = tokio::time::interval_at(start + settings.heartbeat(), settings.heartbeat());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut delivered = 0usize;

        loop {
            let step = tokio::select! {
                biased;
                () = lease.cancelled() => Step::Shutdown,
                () = &mut deadline => Step::Deadline,
                _ = heartbeat.tick() => Step::Heartbeat,
                _ = tick.tick() => Step::Tick,
            };

            match step {
                Step::Shutdown | Step::Deadline => {
                    let reason = if matches!(step, Step::Shutdown) { "shutdown" } else { "max-duration" };
                    yield Ok(Event::default()
                        .event(events::RECONNECT)
                        .retry(retry)
                        .data(json!({ "reason": reason, "retryMs": millis(retry) }).to_string()));
                    break;
                }
                Step::Heartbeat => {
                    yield Ok(Event::default()
                        .event(events::HEARTBEAT)
                        .data(json!({ "timestamp": Utc::now() }).to_string()));
                }
                Step::Tick => match relay.sessions.validate(&code).await {
                    Err(err @ (RelayError::NotFound { .. } | RelayError::Expired { .. })) => {
                        yield Ok(Event::default()
                            .event(events::SESSION_EXPIRED)
                            .data(json!({ "sessionCode": code, "reason": err.kind() }).to_string()));
                        break;
                    }
                    Err(err) => warn!(error = %err, session_code = %code, "session check failed, retrying next tick"),
                    Ok(_) => match relay.broker.drain(&code).await {
                        Ok(requests) => {
                            for req in &requests {
                                let item = DispatchedRequest::from(req);
                                match serde_json::to_string(&item) {
                                    Ok(data) => {
                                        delivered += 1;
                                        yield Ok(Event::default()
                                            .event(events::TOOL_REQUEST)
                                            .id(item.id.as_str())
                                            .data(data));
                                    }
                                    Err(e) => warn!(error = %e, request_id = %item.id, "dropping unencodable request"),
                                }
                            }
                            if !requests.is_empty() {
                                counter!(REQUESTS_DISPATCHED_TOTAL, "transport" => "sse")
                                    .increment(requests.len() as u64);
                            }
                        }
                        Err(err) => warn!(error = %err, session_code = %code, "drain failed, retrying next tick"),
                    },
                },
            }
        }
        debug!(stream_id = %stream_id, delivered, elapsed_ms = millis(start.elapsed()), "event stream closed");
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
