//! Broker endpoints: submit, drain, complete and poll.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use metrics::counter;
use relay_core::{CorrelationId, DispatchedRequest, Outcome, RelayError};
use relay_engine::{Applied, NewRequest, PollOutcome};
use relay_telemetry::metrics::REQUESTS_DISPATCHED_TOTAL;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::sessions::parse_code;
use crate::error::ApiError;
use crate::extract::{ApiJson, ClientAddress};
use crate::server::AppState;

/// Query carrying a pairing code as `code`.
#[derive(Debug, Default, Deserialize)]
pub struct CodeQuery {
    /// Pairing code.
    pub code: Option<String>,
}

/// Response of `GET /api/requests`.
#[derive(Debug, Serialize)]
pub struct DrainedRequests {
    /// Requests in FIFO order.
    pub requests: Vec<DispatchedRequest>,
}

/// `GET /api/requests?code=`, the polling fallback for the stream.
pub async fn drain_requests(
    State(state): State<AppState>,
    Query(query): Query<CodeQuery>,
) -> Result<Json<DrainedRequests>, ApiError> {
    let code = parse_code(query.code.as_deref(), "code")?;
    let requests: Vec<DispatchedRequest> =
        state.relay.drain(&code).await?.iter().map(DispatchedRequest::from).collect();
    if !requests.is_empty() {
        counter!(REQUESTS_DISPATCHED_TOTAL, "transport" => "poll").increment(requests.len() as u64);
        debug!(session_code = %code, count = requests.len(), "requests drained by poll");
    }
    Ok(Json(DrainedRequests { requests }))
}

/// Body of `POST /api/request`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequestBody {
    /// Target pairing code.
    pub session_code: String,
    /// Caller-chosen correlation id.
    pub request_id: String,
    /// Tool to run.
    pub tool_name: String,
    /// Tool arguments, `{}` when omitted.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Acknowledgement for submissions.
#[derive(Debug, Serialize)]
pub struct Accepted {
    /// Correlation id.
    pub id: CorrelationId,
    /// `queued`, `completed` or `error`.
    pub status: &'static str,
    /// Whether this exact submission had already been applied.
    pub duplicate: bool,
}

/// `POST /api/request`.
pub async fn submit_request(
    State(state): State<AppState>,
    ClientAddress(address): ClientAddress,
    ApiJson(body): ApiJson<SubmitRequestBody>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let code = parse_code(Some(&body.session_code), "sessionCode")?;
    let id = CorrelationId::parse(&body.request_id)?;
    let applied = state
        .relay
        .submit_request(
            &address,
            NewRequest {
                session_code: code,
                correlation_id: id.clone(),
                tool_name: body.tool_name,
                arguments: body.arguments.unwrap_or_else(|| Value::Object(Map::new())),
            },
        )
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted { id, status: "queued", duplicate: applied == Applied::Duplicate }),
    ))
}

/// Body of `POST /api/response`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponseBody {
    /// Pairing code the request belongs to.
    pub session_code: String,
    /// Correlation id being answered.
    pub request_id: String,
    /// Success payload. Exclusive with `error`.
    #[serde(default)]
    pub result: Option<Value>,
    /// Failure payload. Exclusive with `result`.
    #[serde(default)]
    pub error: Option<Value>,
}

/// `POST /api/response`.
pub async fn submit_response(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SubmitResponseBody>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let code = parse_code(Some(&body.session_code), "sessionCode")?;
    let id = CorrelationId::parse(&body.request_id)?;
    let status = if body.error.as_ref().is_some_and(|e| !e.is_null()) { "error" } else { "completed" };
    let applied = state.relay.submit_response(&code, &id, body.result, body.error).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted { id, status, duplicate: applied == Applied::Duplicate }),
    ))
}

/// Query of `GET /api/response`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollQuery {
    /// Pairing code.
    pub session_code: Option<String>,
    /// Correlation id.
    pub request_id: Option<String>,
}

/// Response of `GET /api/response`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    /// Correlation id.
    pub id: CorrelationId,
    /// `queued`, `completed` or `error`.
    pub status: &'static str,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// When the response was stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// `GET /api/response?sessionCode=&requestId=`.
pub async fn poll_response(
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
) -> Result<Json<PollView>, ApiError> {
    let code = parse_code(query.session_code.as_deref(), "sessionCode")?;
    let raw_id = query
        .request_id
        .as_deref()
        .ok_or_else(|| RelayError::invalid_field("requestId", "required"))?;
    let id = CorrelationId::parse(raw_id)?;

    let view = match state.relay.broker.poll(&code, &id).await? {
        PollOutcome::Completed(resp) => {
            let (status, result, error) = match resp.outcome {
                Outcome::Result(v) => ("completed", Some(v), None),
                Outcome::Error(e) => ("error", None, Some(e)),
            };
            PollView { id, status, result, error, completed_at: Some(resp.completed_at) }
        }
        PollOutcome::Pending(_) => {
            PollView { id, status: "queued", result: None, error: None, completed_at: None }
        }
        PollOutcome::Unknown => {
            return Err(RelayError::NotFound { resource: "request", id: id.to_string() }.into());
        }
    };
    Ok(Json(view))
}
