//! Pairing session lifecycle.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use relay_core::{RelayError, Session, SessionCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::extract::ClientAddress;
use crate::server::AppState;

/// Optional body of `POST /api/sessions`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateSessionBody {
    /// Capability tags the browser side announces.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Response of `POST /api/sessions`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    /// Pairing code to hand to the LLM side.
    pub code: SessionCode,
    /// Lifetime in seconds.
    pub ttl: u64,
    /// Absolute expiry.
    pub expires_at: DateTime<Utc>,
}

/// Response of `GET /api/sessions/{code}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// Pairing code.
    pub code: SessionCode,
    /// Cleared by deactivation or once `expiresAt` passes.
    pub active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Absolute expiry.
    pub expires_at: DateTime<Utc>,
    /// Seconds until the store drops the session.
    pub ttl_remaining: u64,
    /// Capability tags.
    pub capabilities: Vec<String>,
}

impl SessionView {
    fn new(session: Session, ttl_remaining: u64, now: DateTime<Utc>) -> Self {
        Self {
            active: session.is_live(now),
            code: session.code,
            created_at: session.created_at,
            expires_at: session.expires_at,
            ttl_remaining,
            capabilities: session.capabilities,
        }
    }
}

/// Parse a path or query code, rejecting malformed input before any store access.
pub fn parse_code(raw: Option<&str>, field: &str) -> Result<SessionCode, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RelayError::invalid_field(field, "required"))?;
    Ok(SessionCode::parse(raw)?)
}

/// `POST /api/sessions`.
pub async fn create_session(
    State(state): State<AppState>,
    ClientAddress(address): ClientAddress,
    body: Bytes,
) -> Result<(StatusCode, Json<CreatedSession>), ApiError> {
    let body: CreateSessionBody = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?
    };

    let session = state.relay.sessions.create(&address, body.capabilities).await?;
    info!(session_code = %session.code, source = %address, "pairing session created");
    Ok((
        StatusCode::CREATED,
        Json(CreatedSession {
            ttl: state.relay.sessions.ttl().as_secs(),
            expires_at: session.expires_at,
            code: session.code,
        }),
    ))
}

/// `GET /api/sessions/{code}`.
pub async fn get_session(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let code = parse_code(Some(&code), "code")?;
    let info = state.relay.sessions.info(&code).await?;
    Ok(Json(SessionView::new(info.session, info.ttl_remaining.as_secs(), Utc::now())))
}

/// `DELETE /api/sessions/{code}`.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    let code = parse_code(Some(&code), "code")?;
    state.relay.sessions.deactivate(&code).await?;
    Ok(StatusCode::NO_CONTENT)
}
