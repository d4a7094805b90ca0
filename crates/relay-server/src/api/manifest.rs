//! Manifest endpoints with API version negotiation.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use relay_core::{RelayError, SessionCode, ToolDefinition};
use relay_engine::ManifestDocument;
use relay_engine::manifest::{API_VERSION, SUPPORTED_API_VERSIONS, negotiate_api_version};
use serde::Deserialize;
use serde_json::json;

use super::sessions::parse_code;
use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::headers;
use crate::server::AppState;

/// Query of `GET /api/manifest`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestQuery {
    /// Session whose manifest to return; the global manifest when absent.
    pub session_code: Option<String>,
}

/// `GET /api/manifest[?sessionCode=]`.
pub async fn get_manifest(
    State(state): State<AppState>,
    Query(query): Query<ManifestQuery>,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    let code = match query.session_code.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_code(Some(raw), "sessionCode")?),
        None => None,
    };
    render_manifest(&state, code.as_ref(), &request_headers).await
}

/// `GET /api/sessions/{code}/metadata`.
pub async fn session_metadata(
    State(state): State<AppState>,
    Path(code): Path<String>,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    let code = parse_code(Some(&code), "code")?;
    render_manifest(&state, Some(&code), &request_headers).await
}

async fn render_manifest(
    state: &AppState,
    code: Option<&SessionCode>,
    request_headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let api_version = negotiate_api_version(headers::get(request_headers, headers::ACCEPT_VERSION))
        .map_err(|requested| {
            ApiError::raw(
                StatusCode::NOT_ACCEPTABLE,
                json!({
                    "error": "requested API version is not supported",
                    "code": "VERSION_NOT_SUPPORTED",
                    "requestedVersion": requested,
                    "supportedVersions": SUPPORTED_API_VERSIONS,
                }),
            )
        })?;

    let manifest = match code {
        Some(code) => {
            let _ = state.relay.sessions.validate(code).await.map_err(session_error)?;
            state.relay.manifests.for_session(code).await?
        }
        None => state.relay.manifests.global(),
    };

    let mut response = Json(manifest.document(api_version)).into_response();
    let out = response.headers_mut();
    headers::set(out, headers::API_VERSION, api_version);
    headers::set(out, headers::TOOL_MANIFEST_VERSION, manifest.version());
    headers::set(out, headers::SUPPORTED_VERSIONS, &SUPPORTED_API_VERSIONS.join(","));
    Ok(response)
}

/// Expired sessions get a fixed body browsers can match on.
fn session_error(err: RelayError) -> ApiError {
    match err {
        RelayError::Expired { id, .. } => ApiError::raw(
            StatusCode::FORBIDDEN,
            json!({
                "error": format!("session {id} has expired"),
                "code": "SESSION_EXPIRED",
            }),
        ),
        other => other.into(),
    }
}

/// Body of `POST /api/sessions/{code}/manifest`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterManifestBody {
    /// Version of the catalog being registered.
    pub tool_manifest_version: String,
    /// Tool definitions.
    pub tools: Vec<ToolDefinition>,
}

/// `POST /api/sessions/{code}/manifest`.
///
/// The manifest lives as long as the session does.
pub async fn register_manifest(
    State(state): State<AppState>,
    Path(code): Path<String>,
    ApiJson(body): ApiJson<RegisterManifestBody>,
) -> Result<(StatusCode, Json<ManifestDocument>), ApiError> {
    let code = parse_code(Some(&code), "code")?;
    let session = state.relay.sessions.validate(&code).await.map_err(session_error)?;
    let ttl = Duration::from_secs(session.ttl_remaining_secs(chrono::Utc::now()).max(1));

    let doc = ManifestDocument {
        api_version: API_VERSION.to_owned(),
        tool_manifest_version: body.tool_manifest_version,
        tools: body.tools,
    };
    let _ = state.relay.manifests.register(&code, &doc, ttl).await?;
    Ok((StatusCode::CREATED, Json(doc)))
}
