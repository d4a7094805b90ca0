use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One offending field in a validation failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field, header or JSON path that failed validation.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

/// Error taxonomy shared by every relay component.
///
/// Classifies errors as client-fixable (`validation`, `not_found`,
/// `expired`, `conflict`), retryable (`rate_limited`, `timeout`) or
/// operational (`internal`).
#[derive(Clone, Debug, thiserror::Error)]
pub enum RelayError {
    /// Malformed code, header, body or arguments. Never retried.
    #[error("validation failed: {message}")]
    Validation {
        /// Summary of the failure.
        message: String,
        /// Every offending field.
        fields: Vec<FieldError>,
    },

    /// Unknown session, protocol session or correlation id.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of thing that was looked up.
        resource: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// The governing TTL elapsed or the session was deactivated.
    #[error("{resource} expired: {id}")]
    Expired {
        /// Kind of thing that expired.
        resource: &'static str,
        /// Its id.
        id: String,
    },

    /// A governed operation exceeded its window quota.
    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited {
        /// Time until the current window resets.
        retry_after: Duration,
    },

    /// Correlation id reused with a different payload.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Bounded wait elapsed without a terminal result. The request is
    /// still live and can be polled later.
    #[error("timed out after {}ms waiting for {request_id}", waited.as_millis())]
    Timeout {
        /// Correlation id that can be polled later.
        request_id: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// Store unavailable or unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Validation failure for a single field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        let message = message.into();
        Self::Validation {
            message: format!("{field}: {message}"),
            fields: vec![FieldError { field, message }],
        }
    }

    /// Validation failure listing several fields.
    pub fn invalid_fields(fields: Vec<FieldError>) -> Self {
        let message = fields
            .iter()
            .map(|f| format!("{}: {}", f.field, f.message))
            .collect::<Vec<_>>()
            .join("; ");
        Self::Validation { message, fields }
    }

    /// Validation failure without a specific field.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Short classification string for logging, metrics and wire bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Expired { .. } => "expired",
            Self::RateLimited { .. } => "rate_limited",
            Self::Conflict(_) => "conflict",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the same call may succeed later without client changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout { .. })
    }

    /// Suggested delay before retrying, only for rate limits.
    pub fn retry_after(&self) -> Option<Duration> {
        if let Self::RateLimited { retry_after } = self {
            Some(*retry_after)
        } else {
            None
        }
    }

    /// Offending fields of a validation failure (empty otherwise).
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Validation { fields, .. } => fields,
            _ => &[],
        }
    }

    /// Message safe to return to clients. Internal details are not exposed.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_owned(),
            other => other.to_string(),
        }
    }
}
