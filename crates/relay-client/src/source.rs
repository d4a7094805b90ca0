//! Where queued requests come from.
//!
//! [`SseSource`] reads the event stream, [`PollingSource`] drains the queue
//! on an interval, and [`AdaptiveSource`] prefers the stream and falls back
//! to polling whenever it fails, retrying the stream with backoff. All three
//! look the same to the bridge.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use relay_core::DispatchedRequest;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::client::{EventStream, RelayClient};
use crate::error::ClientError;
use crate::sse::SseEvent;

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A supplier of dispatched requests for one pairing session.
#[async_trait]
pub trait RequestSource: Send {
    /// Wait for the next batch. An empty batch means nothing arrived this
    /// round; callers simply ask again.
    async fn next_batch(&mut self) -> Result<Vec<DispatchedRequest>, ClientError>;

    /// Short name for logs.
    fn transport(&self) -> &'static str;
}

/// Requests read from `GET /api/stream`.
pub struct SseSource {
    client: RelayClient,
    code: String,
    stream: Option<EventStream>,
}

impl SseSource {
    /// Source for `code`. The stream opens on first use.
    pub fn new(client: RelayClient, code: impl Into<String>) -> Self {
        Self { client, code: code.into(), stream: None }
    }

    /// Whether a stream is currently open.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn handle(&mut self, event: &SseEvent) -> Result<Option<DispatchedRequest>, ClientError> {
        match event.event.as_str() {
            "tool-request" => serde_json::from_str(&event.data)
                .map(Some)
                .map_err(|e| ClientError::Decode(e.to_string())),
            "reconnect" => {
                debug!(session_code = %self.code, data = %event.data, "stream asked to reconnect");
                self.stream = None;
                Ok(None)
            }
            "session-expired" => {
                self.stream = None;
                Err(ClientError::SessionGone { code: self.code.clone() })
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl RequestSource for SseSource {
    async fn next_batch(&mut self) -> Result<Vec<DispatchedRequest>, ClientError> {
        if self.stream.is_none() {
            self.stream = Some(self.client.open_stream(&self.code).await?);
        }
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(Vec::new());
            };
            let Some(event) = stream.next().await else {
                self.stream = None;
                return Err(ClientError::StreamClosed);
            };
            match self.handle(&event) {
                Ok(Some(request)) => return Ok(vec![request]),
                Ok(None) if self.stream.is_none() => return Ok(Vec::new()),
                Ok(None) => {}
                Err(ClientError::Decode(e)) => warn!(error = %e, "skipping undecodable tool-request"),
                Err(e) => return Err(e),
            }
        }
    }

    fn transport(&self) -> &'static str {
        "sse"
    }
}

/// Requests drained from `GET /api/requests` on a fixed interval.
pub struct PollingSource {
    client: RelayClient,
    code: String,
    interval: Duration,
    last_poll: Option<Instant>,
}

impl PollingSource {
    /// Source for `code` polling every `interval`.
    pub fn new(client: RelayClient, code: impl Into<String>, interval: Duration) -> Self {
        Self { client, code: code.into(), interval, last_poll: None }
    }
}

#[async_trait]
impl RequestSource for PollingSource {
    async fn next_batch(&mut self) -> Result<Vec<DispatchedRequest>, ClientError> {
        if let Some(last) = self.last_poll {
            tokio::time::sleep_until(last + self.interval).await;
        }
        self.last_poll = Some(Instant::now());
        self.client.drain(&self.code).await
    }

    fn transport(&self) -> &'static str {
        "poll"
    }
}

enum Mode {
    Stream,
    Polling { retry_stream_at: Instant, failures: u32 },
}

/// Event stream first, polling while the stream is unavailable.
pub struct AdaptiveSource {
    sse: SseSource,
    poll: PollingSource,
    backoff: Backoff,
    mode: Mode,
}

impl AdaptiveSource {
    /// Adaptive source for `code`.
    pub fn new(client: RelayClient, code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            sse: SseSource::new(client.clone(), code.clone()),
            poll: PollingSource::new(client, code, DEFAULT_POLL_INTERVAL),
            backoff: Backoff::default(),
            mode: Mode::Stream,
        }
    }

    /// Override the stream retry schedule.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override the polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll.interval = interval;
        self
    }

    /// Whether requests currently come from polling.
    pub fn is_polling(&self) -> bool {
        matches!(self.mode, Mode::Polling { .. })
    }

    fn fall_back(&mut self, failures: u32, err: &ClientError) {
        let delay = err.retry_after().unwrap_or_else(|| self.backoff.delay(failures));
        warn!(
            session_code = %self.sse.code,
            error = %err,
            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "event stream unavailable, polling"
        );
        self.mode = Mode::Polling { retry_stream_at: Instant::now() + delay, failures: failures + 1 };
    }
}

#[async_trait]
impl RequestSource for AdaptiveSource {
    async fn next_batch(&mut self) -> Result<Vec<DispatchedRequest>, ClientError> {
        let failures = match self.mode {
            Mode::Polling { retry_stream_at, .. } if Instant::now() < retry_stream_at => {
                return self.poll.next_batch().await;
            }
            Mode::Polling { failures, .. } => failures,
            Mode::Stream => 0,
        };

        match self.sse.next_batch().await {
            Ok(batch) => {
                if failures > 0 {
                    info!(session_code = %self.sse.code, "event stream restored");
                }
                self.mode = Mode::Stream;
                Ok(batch)
            }
            Err(e) if e.is_session_gone() => Err(e),
            Err(e) => {
                self.fall_back(failures, &e);
                self.poll.next_batch().await
            }
        }
    }

    fn transport(&self) -> &'static str {
        if self.is_polling() { "poll" } else { "sse" }
    }
}
