//! Request/response broker.
//!
//! Keys:
//! - `request:{id}`: the [`ToolRequest`], written once per correlation id
//! - `queue:{code}`: FIFO of requests awaiting delivery to the browser
//! - `response:{id}`: the [`ToolResponse`], written once
//!
//! A crash between writing `request:{id}` and pushing onto the queue leaves
//! a request that is pollable but never delivered; the caller's bounded wait
//! then times out.

use std::time::Duration;

use chrono::Utc;
use relay_core::{CorrelationId, Outcome, RelayError, SessionCode, ToolRequest, ToolResponse};
use relay_settings::BrokerSettings;
use relay_store::{SharedStore, StoreExt};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Store key for a request record.
pub fn request_key(id: &CorrelationId) -> String {
    format!("request:{id}")
}

/// Store key for a session's delivery queue.
pub fn queue_key(code: &SessionCode) -> String {
    format!("queue:{code}")
}

/// Store key for a response record.
pub fn response_key(id: &CorrelationId) -> String {
    format!("response:{id}")
}

/// A request as submitted, before timestamps are assigned.
#[derive(Clone, Debug)]
pub struct NewRequest {
    /// Target session.
    pub session_code: SessionCode,
    /// Idempotency key.
    pub correlation_id: CorrelationId,
    /// Tool name.
    pub tool_name: String,
    /// Tool arguments.
    pub arguments: Value,
}

/// How a submission or completion was applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// First write for this correlation id.
    Stored,
    /// Same payload seen before; nothing changed.
    Duplicate,
}

/// Result of [`Broker::poll`].
#[derive(Clone, Debug, PartialEq)]
pub enum PollOutcome {
    /// A terminal response is stored.
    Completed(ToolResponse),
    /// The request is known but has no response yet.
    Pending(ToolRequest),
    /// Never seen, or its TTL elapsed.
    Unknown,
}

/// Queues tool requests and correlates their responses.
#[derive(Clone)]
pub struct Broker {
    store: SharedStore,
    settings: BrokerSettings,
}

impl Broker {
    /// Broker over `store`.
    pub fn new(store: SharedStore, settings: BrokerSettings) -> Self {
        Self { store, settings }
    }

    /// Lifetime of requests and responses.
    pub fn request_ttl(&self) -> Duration {
        self.settings.request_ttl()
    }

    /// Queue a request for delivery.
    ///
    /// Resubmitting the same correlation id with the same payload is a
    /// no-op; a different payload is a `conflict`.
    #[instrument(skip(self, req), fields(session_code = %req.session_code, request_id = %req.correlation_id))]
    pub async fn enqueue(&self, req: NewRequest) -> Result<Applied, RelayError> {
        let record = ToolRequest {
            correlation_id: req.correlation_id,
            session_code: req.session_code,
            tool_name: req.tool_name,
            arguments: req.arguments,
            enqueued_at: Utc::now(),
        };
        let value = encode(&record)?;
        let ttl = self.request_ttl();

        if let Some(existing) = self
            .store
            .set_if_absent(&request_key(&record.correlation_id), &value, ttl)
            .await?
        {
            let existing: ToolRequest = decode(existing)?;
            return if existing.same_payload(&record) {
                debug!("duplicate submission ignored");
                Ok(Applied::Duplicate)
            } else {
                Err(RelayError::Conflict(format!(
                    "request {} already exists with a different payload",
                    record.correlation_id
                )))
            };
        }

        let depth = self
            .store
            .list_push(&queue_key(&record.session_code), &value, ttl)
            .await?;
        info!(tool = %record.tool_name, depth, "request queued");
        Ok(Applied::Stored)
    }

    /// Remove and return every queued request for a session, oldest first.
    #[instrument(skip(self), fields(session_code = %code))]
    pub async fn drain(&self, code: &SessionCode) -> Result<Vec<ToolRequest>, RelayError> {
        let raw = self.store.list_drain(&queue_key(code)).await?;
        let mut out = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_value::<ToolRequest>(item) {
                Ok(req) => out.push(req),
                Err(e) => warn!(error = %e, "dropping undecodable queue item"),
            }
        }
        if !out.is_empty() {
            debug!(count = out.len(), "drained requests");
        }
        Ok(out)
    }

    /// Store the terminal outcome of a request.
    ///
    /// Responses are written once: an identical repeat is a no-op, a
    /// different outcome is a `conflict`. Completing after the caller's
    /// wait timed out is accepted.
    #[instrument(skip(self, outcome), fields(session_code = %code, request_id = %id))]
    pub async fn complete(
        &self,
        code: &SessionCode,
        id: &CorrelationId,
        outcome: Outcome,
    ) -> Result<Applied, RelayError> {
        let request: Option<ToolRequest> = self.store.get_as(&request_key(id)).await?;
        match request {
            Some(req) if &req.session_code == code => {}
            _ => return Err(RelayError::NotFound { resource: "request", id: id.to_string() }),
        }

        let response = ToolResponse {
            correlation_id: id.clone(),
            outcome,
            completed_at: Utc::now(),
        };
        let value = encode(&response)?;
        match self
            .store
            .set_if_absent(&response_key(id), &value, self.request_ttl())
            .await?
        {
            None => {
                info!(is_error = response.outcome.is_error(), "response stored");
                Ok(Applied::Stored)
            }
            Some(existing) => {
                let existing: ToolResponse = decode(existing)?;
                if existing.outcome == response.outcome {
                    Ok(Applied::Duplicate)
                } else {
                    Err(RelayError::Conflict(format!(
                        "request {id} already has a different response"
                    )))
                }
            }
        }
    }

    /// Current state of a correlation id within a session.
    pub async fn poll(
        &self,
        code: &SessionCode,
        id: &CorrelationId,
    ) -> Result<PollOutcome, RelayError> {
        let request: Option<ToolRequest> = self.store.get_as(&request_key(id)).await?;
        if request.as_ref().is_some_and(|r| &r.session_code != code) {
            return Ok(PollOutcome::Unknown);
        }
        if let Some(response) = self.store.get_as::<ToolResponse>(&response_key(id)).await? {
            return Ok(PollOutcome::Completed(response));
        }
        Ok(request.map_or(PollOutcome::Unknown, PollOutcome::Pending))
    }

    /// Re-poll until a response arrives or `timeout` elapses.
    ///
    /// A timeout does not retract the request; the response stays pollable.
    #[instrument(skip(self), fields(session_code = %code, request_id = %id))]
    pub async fn wait_for(
        &self,
        code: &SessionCode,
        id: &CorrelationId,
        timeout: Duration,
    ) -> Result<ToolResponse, RelayError> {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            match self.poll(code, id).await? {
                PollOutcome::Completed(response) => return Ok(response),
                PollOutcome::Pending(_) => {}
                PollOutcome::Unknown => {
                    return Err(RelayError::NotFound { resource: "request", id: id.to_string() });
                }
            }
            let now = Instant::now();
            if now >= deadline {
                debug!("wait elapsed without a response");
                return Err(RelayError::Timeout {
                    request_id: id.to_string(),
                    waited: now - started,
                });
            }
            tokio::time::sleep(self.settings.poll_interval().min(deadline - now)).await;
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, RelayError> {
    serde_json::to_value(value).map_err(|e| RelayError::Internal(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, RelayError> {
    serde_json::from_value(value).map_err(|e| RelayError::Internal(e.to_string()))
}
