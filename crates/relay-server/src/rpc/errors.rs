//! JSON-RPC error codes and error type.

use relay_core::RelayError;
use serde_json::{Value, json};

use super::types::RpcErrorBody;
use crate::error::details_for;

// ── Error code constants ────────────────────────────────────────────

/// Body is not valid JSON.
pub const PARSE_ERROR: i64 = -32_700;
/// Body is JSON but not a valid request envelope.
pub const INVALID_REQUEST: i64 = -32_600;
/// Method not found in the registry.
pub const METHOD_NOT_FOUND: i64 = -32_601;
/// Invalid params, headers or tool arguments.
pub const INVALID_PARAMS: i64 = -32_602;
/// Unexpected internal error.
pub const INTERNAL_ERROR: i64 = -32_603;
/// Per-session call quota exceeded.
pub const RATE_LIMITED: i64 = -32_000;
/// Tool call did not complete in time. `data.requestId` can be polled.
pub const TIMEOUT: i64 = -32_001;
/// Unknown protocol session, pairing session or request.
pub const NOT_FOUND: i64 = -32_002;
/// Pairing session expired or deactivated.
pub const EXPIRED: i64 = -32_003;
/// Correlation id reused with a different payload.
pub const CONFLICT: i64 = -32_004;

/// Error type returned by handlers and the envelope parser.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Body is not JSON.
    #[error("parse error: {message}")]
    Parse {
        /// Decoder message.
        message: String,
    },

    /// Envelope is malformed.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What is wrong.
        message: String,
    },

    /// No handler for the method.
    #[error("method '{method}' not found")]
    MethodNotFound {
        /// Requested method.
        method: String,
    },

    /// Handler exceeded its time budget.
    #[error("handler for '{method}' timed out")]
    HandlerTimeout {
        /// Method that timed out.
        method: String,
    },

    /// Relay taxonomy error.
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl RpcError {
    /// Parse failure.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse { message: message.into() }
    }

    /// Envelope failure.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest { message: message.into() }
    }

    /// Unknown method.
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound { method: method.into() }
    }

    /// Invalid params without a specific field.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::Relay(RelayError::validation(message))
    }

    /// Numeric code for this error.
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse { .. } => PARSE_ERROR,
            Self::InvalidRequest { .. } => INVALID_REQUEST,
            Self::MethodNotFound { .. } => METHOD_NOT_FOUND,
            Self::HandlerTimeout { .. } => INTERNAL_ERROR,
            Self::Relay(err) => match err {
                RelayError::Validation { .. } => INVALID_PARAMS,
                RelayError::NotFound { .. } => NOT_FOUND,
                RelayError::Expired { .. } => EXPIRED,
                RelayError::RateLimited { .. } => RATE_LIMITED,
                RelayError::Conflict(_) => CONFLICT,
                RelayError::Timeout { .. } => TIMEOUT,
                RelayError::Internal(_) => INTERNAL_ERROR,
            },
        }
    }

    /// Short classification for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::MethodNotFound { .. } => "method_not_found",
            Self::HandlerTimeout { .. } => "handler_timeout",
            Self::Relay(err) => err.kind(),
        }
    }

    /// Convert to the wire-format error member.
    pub fn to_error_body(&self) -> RpcErrorBody {
        let mut data = json!({ "kind": self.kind() });
        if let (Self::Relay(err), Value::Object(map)) = (self, &mut data) {
            if let Some(Value::Object(details)) = details_for(err) {
                map.extend(details);
            }
        }
        RpcErrorBody { code: self.code(), message: sanitize_error_message(self), data: Some(data) }
    }
}

/// Message safe to return to clients. Internal details are not exposed.
pub fn sanitize_error_message(err: &RpcError) -> String {
    match err {
        RpcError::Relay(relay) => relay.public_message(),
        RpcError::HandlerTimeout { .. } => "internal error".to_owned(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn codes_follow_taxonomy() {
        let cases = [
            (RpcError::from(RelayError::validation("x")), INVALID_PARAMS),
            (RelayError::NotFound { resource: "session", id: "A".into() }.into(), NOT_FOUND),
            (RelayError::Expired { resource: "session", id: "A".into() }.into(), EXPIRED),
            (RelayError::RateLimited { retry_after: Duration::from_secs(1) }.into(), RATE_LIMITED),
            (RelayError::Conflict("x".into()).into(), CONFLICT),
            (
                RelayError::Timeout { request_id: "r".into(), waited: Duration::from_secs(1) }.into(),
                TIMEOUT,
            ),
            (RelayError::Internal("x".into()).into(), INTERNAL_ERROR),
            (RpcError::parse("eof"), PARSE_ERROR),
            (RpcError::invalid_request("x"), INVALID_REQUEST),
            (RpcError::method_not_found("x"), METHOD_NOT_FOUND),
        ];
        for (err, code) in cases {
            assert_eq!(err.code(), code, "{err}");
        }
    }

    #[test]
    fn timeout_body_carries_request_id() {
        let err = RpcError::from(RelayError::Timeout {
            request_id: "req_42".into(),
            waited: Duration::from_secs(25),
        });
        let body = err.to_error_body();
        assert_eq!(body.code, TIMEOUT);
        let data = body.data.unwrap();
        assert_eq!(data["kind"], "timeout");
        assert_eq!(data["requestId"], "req_42");
    }

    #[test]
    fn validation_body_lists_fields() {
        let err = RpcError::from(RelayError::invalid_field("Mcp-Session-Id", "bad"));
        let data = err.to_error_body().data.unwrap();
        assert_eq!(data["fields"][0]["field"], "Mcp-Session-Id");
    }

    #[test]
    fn sanitize_internal_error_strips_details() {
        let err = RpcError::from(RelayError::Internal("database is locked at /var/relay.db".into()));
        assert_eq!(sanitize_error_message(&err), "internal error");
    }

    #[test]
    fn sanitize_preserves_user_facing_messages() {
        let err = RpcError::method_not_found("tools/delete");
        assert!(sanitize_error_message(&err).contains("tools/delete"));
    }
}
