//! HTTP error responses.
//!
//! Every REST failure renders as `{"error": {"kind", "message", "details"?}}`
//! with the status the error kind maps to.

use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use relay_core::RelayError;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::error;

/// Body of an error response.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    /// Taxonomy kind (`validation`, `not_found`, ...).
    pub kind: String,
    /// Client-safe message.
    pub message: String,
    /// Structured details, e.g. offending fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

/// Error returned from REST handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Value,
    retry_after: Option<Duration>,
}

impl ApiError {
    /// Error with a standard envelope.
    pub fn new(status: StatusCode, kind: &str, message: impl Into<String>) -> Self {
        Self::with_details(status, kind, message, None)
    }

    fn with_details(
        status: StatusCode,
        kind: &str,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        let envelope = ErrorEnvelope {
            error: ErrorBody { kind: kind.to_owned(), message: message.into(), details },
        };
        Self {
            status,
            body: serde_json::to_value(envelope).unwrap_or(Value::Null),
            retry_after: None,
        }
    }

    /// Error with a caller-shaped body, for endpoints with a fixed wire contract.
    pub fn raw(status: StatusCode, body: Value) -> Self {
        Self { status, body, retry_after: None }
    }

    /// 400 for a malformed body or query.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    /// HTTP status of this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Rendered JSON body.
    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// HTTP status for a taxonomy error.
pub fn status_for(err: &RelayError) -> StatusCode {
    match err {
        RelayError::Validation { .. } => StatusCode::BAD_REQUEST,
        RelayError::NotFound { .. } => StatusCode::NOT_FOUND,
        RelayError::Expired { .. } => StatusCode::FORBIDDEN,
        RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        RelayError::Conflict(_) => StatusCode::CONFLICT,
        RelayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Structured details for a taxonomy error, if it carries any.
pub fn details_for(err: &RelayError) -> Option<Value> {
    match err {
        RelayError::Validation { fields, .. } if !fields.is_empty() => {
            Some(json!({ "fields": fields }))
        }
        RelayError::RateLimited { retry_after } => {
            Some(json!({ "retryAfter": retry_after.as_secs() }))
        }
        RelayError::Timeout { request_id, waited } => Some(json!({
            "requestId": request_id,
            "waitedMs": u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
        })),
        _ => None,
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        if let RelayError::Internal(detail) = &err {
            error!(detail = %detail, "internal error");
        }
        let mut api = Self::with_details(
            status_for(&err),
            err.kind(),
            err.public_message(),
            details_for(&err),
        );
        api.retry_after = err.retry_after();
        api
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(wait) = self.retry_after {
            let _ = response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(wait.as_secs().max(1)),
            );
        }
        response
    }
}
