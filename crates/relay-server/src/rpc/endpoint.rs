//! `POST /mcp` and `GET /mcp/metrics`.
//!
//! Every call validates the identity headers before anything is mutated,
//! resolves (and refreshes) the protocol session, applies the per-session
//! call quota, dispatches, then records store-backed call metrics.

use std::time::{Duration, Instant};

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use relay_core::{ProtocolSessionId, ProtocolStatus, RelayError};
use relay_engine::protocol::{
    CLIENT_INFO_HEADER, PROTOCOL_VERSION_HEADER, SESSION_CODE_HEADER, SESSION_ID_HEADER,
    parse_identity,
};
use relay_engine::{MetricsScope, RawIdentity, Scope};
use relay_telemetry::metrics::RPC_ERRORS_TOTAL;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::context::RpcContext;
use super::errors::RpcError;
use super::handlers::SESSIONLESS_METHODS;
use super::types::{RpcRequest, RpcResponse};
use crate::error::ApiError;
use crate::extract::ClientAddress;
use crate::headers;
use crate::server::AppState;

/// What one call produced, before it is rendered.
struct CallOutcome {
    session: Option<ProtocolSessionId>,
    response: Option<RpcResponse>,
}

impl CallOutcome {
    fn reply(session: Option<ProtocolSessionId>, response: RpcResponse) -> Self {
        Self { session, response: Some(response) }
    }

    fn rejected(session: Option<ProtocolSessionId>, method: &str, id: Value, err: &RpcError) -> Self {
        counter!(RPC_ERRORS_TOTAL, "method" => method.to_owned(), "kind" => err.kind()).increment(1);
        Self::reply(session, RpcResponse::failure(id, err))
    }
}

/// `POST /mcp`.
#[instrument(skip_all, fields(client = %client.0))]
pub async fn handle_rpc(
    State(state): State<AppState>,
    client: ClientAddress,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let outcome = process(&state, &client.0, &headers, &body).await;

    if let Some(response) = &outcome.response {
        state
            .relay
            .metrics
            .record(outcome.session.as_ref(), started.elapsed(), response.is_failure())
            .await;
    }
    render(outcome, started.elapsed())
}

async fn process(state: &AppState, client: &str, headers: &HeaderMap, body: &[u8]) -> CallOutcome {
    let relay = &state.relay;

    let request = match serde_json::from_slice::<Value>(body) {
        Ok(value) => RpcRequest::from_value(value),
        Err(e) => Err(RpcError::parse(e.to_string())),
    };
    let request = match request {
        Ok(request) => request,
        Err(err) => return CallOutcome::rejected(None, "unknown", Value::Null, &err),
    };
    let id = request.response_id();
    let method = request.method.clone();

    let raw = RawIdentity {
        session_id: headers::get(headers, SESSION_ID_HEADER),
        client_info: headers::get(headers, CLIENT_INFO_HEADER),
        protocol_version: headers::get(headers, PROTOCOL_VERSION_HEADER),
        session_code: headers::get(headers, SESSION_CODE_HEADER),
    };
    let identity = match parse_identity(raw, relay.protocol.supported_versions()) {
        Ok(identity) => identity,
        Err(err) => return CallOutcome::rejected(None, &method, id, &err.into()),
    };
    let header_session = identity.session_id.clone();

    if request.is_notification() {
        if let Some(sid) = &header_session {
            if let Err(e) = relay.protocol.touch(sid, identity.session_code.clone()).await {
                debug!(error = %e, method, "notification for unknown protocol session");
            }
        }
        return CallOutcome { session: header_session, response: None };
    }

    let session = if method == "initialize" {
        None
    } else if let Some(sid) = &header_session {
        match relay.protocol.touch(sid, identity.session_code.clone()).await {
            Ok(session) => Some(session),
            Err(err) => {
                return CallOutcome::rejected(header_session.clone(), &method, id, &err.into());
            }
        }
    } else if SESSIONLESS_METHODS.contains(&method.as_str()) {
        None
    } else {
        let err = RelayError::invalid_field(SESSION_ID_HEADER, "required; call initialize first");
        return CallOutcome::rejected(None, &method, id, &err.into());
    };

    let actor = header_session
        .as_ref()
        .map_or_else(|| format!("addr:{client}"), ToString::to_string);
    if let Err(err) = relay
        .limiter
        .enforce(Scope::ProtocolCall, &actor, relay.settings().rate_limits.protocol_call)
        .await
    {
        return CallOutcome::rejected(header_session, &method, id, &err.into());
    }

    let ctx = RpcContext::new(relay.clone(), identity, session);
    let response = state.registry.dispatch(request, &ctx).await;
    CallOutcome::reply(ctx.session_id().or(header_session), response)
}

fn render(outcome: CallOutcome, elapsed: Duration) -> Response {
    let mut response = match outcome.response {
        Some(body) => (StatusCode::OK, Json(body)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    let out = response.headers_mut();
    if let Some(sid) = &outcome.session {
        headers::set(out, headers::MCP_SESSION_ID, sid.as_str());
    }
    headers::set(out, headers::PROCESSING_TIME_MS, &elapsed.as_millis().to_string());
    response
}

/// Query for `GET /mcp/metrics`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsQuery {
    /// Protocol session to report on; global counters when absent.
    pub session_id: Option<String>,
}

/// `GET /mcp/metrics[?sessionId=]`.
pub async fn call_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<Value>, ApiError> {
    let relay = &state.relay;
    let Some(raw) = query.session_id.as_deref().filter(|s| !s.is_empty()) else {
        let snapshot = relay.metrics.snapshot(&MetricsScope::Global).await?;
        return Ok(Json(json!({ "scope": "global", "metrics": snapshot })));
    };

    let id = ProtocolSessionId::parse(raw)?;
    let snapshot = relay.metrics.snapshot(&MetricsScope::Session(id.clone())).await?;
    let session = relay.protocol.get(&id).await?;
    let status = match &session {
        Some(s) => s.status,
        None if snapshot.calls > 0 => ProtocolStatus::Expired,
        None => {
            return Err(RelayError::NotFound { resource: "protocol session", id: id.to_string() }.into());
        }
    };
    Ok(Json(json!({
        "scope": "session",
        "sessionId": id,
        "status": status,
        "protocolVersion": session.as_ref().map(|s| &s.protocol_version),
        "lastSeenAt": session.as_ref().map(|s| s.last_seen_at),
        "metrics": snapshot,
    })))
}
