//! # SSE Parser
//!
//! Turns the relay's chunked `text/event-stream` body into whole events.
//! Handles:
//! - Line buffering across chunk boundaries
//! - `event:`, `id:`, `data:` and `retry:` fields
//! - Multi-line `data` joined with `\n`
//! - Comment lines and unknown fields (ignored)

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio_stream::StreamExt;
use tracing::warn;

/// One dispatched event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `event` field; `message` when the server sent none.
    pub event: String,
    /// `id` field, if any.
    pub id: Option<String>,
    /// Joined `data` lines.
    pub data: String,
    /// `retry` hint, if any.
    pub retry: Option<Duration>,
}

#[derive(Default)]
struct Pending {
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
    retry: Option<Duration>,
}

impl Pending {
    /// Apply one line. Returns the finished event on a blank line.
    fn apply(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_owned()),
            "id" => self.id = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            "retry" => self.retry = value.parse().ok().map(Duration::from_millis),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let pending = std::mem::take(self);
        if pending.data.is_empty() && pending.event.is_none() {
            return None;
        }
        Some(SseEvent {
            event: pending.event.unwrap_or_else(|| "message".to_owned()),
            id: pending.id,
            data: pending.data.join("\n"),
            retry: pending.retry,
        })
    }
}

/// Parse a byte stream into events.
///
/// A read error ends the stream after logging it. An event left unterminated
/// when the body ends is dropped.
pub fn parse_events<S, E>(byte_stream: S) -> impl Stream<Item = SseEvent> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures::stream::unfold(
        (byte_stream, BytesMut::with_capacity(8192), Pending::default()),
        |(mut stream, mut buffer, mut pending)| async move {
            loop {
                if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let mut line_bytes = buffer.split_to(newline_pos + 1);
                    line_bytes.truncate(line_bytes.len() - 1);
                    if line_bytes.last() == Some(&b'\r') {
                        line_bytes.truncate(line_bytes.len() - 1);
                    }
                    let Ok(line) = std::str::from_utf8(&line_bytes) else {
                        continue;
                    };
                    if let Some(event) = pending.apply(line) {
                        return Some((event, (stream, buffer, pending)));
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        warn!(error = %e, "event stream read error");
                        return None;
                    }
                    None => return None,
                }
            }
        },
    )
}
