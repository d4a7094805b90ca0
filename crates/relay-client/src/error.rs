//! Client error type.

use std::time::Duration;

use thiserror::Error;

/// Errors from talking to a relay.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The relay answered with a non-success status.
    #[error("relay returned {status} ({kind}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error kind from the envelope, `unknown` when absent.
        kind: String,
        /// Error message from the envelope.
        message: String,
        /// `Retry-After`, when sent.
        retry_after: Option<Duration>,
    },

    /// The pairing session is unknown, expired or deactivated.
    #[error("session {code} is no longer valid")]
    SessionGone {
        /// Pairing code.
        code: String,
    },

    /// The event stream ended without a `reconnect` event.
    #[error("event stream closed unexpectedly")]
    StreamClosed,

    /// A payload could not be decoded.
    #[error("invalid payload: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether the pairing session can no longer be used.
    pub fn is_session_gone(&self) -> bool {
        matches!(self, Self::SessionGone { .. })
    }

    /// Whether the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::StreamClosed => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::SessionGone { .. } | Self::Decode(_) => false,
        }
    }

    /// Server-requested wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Map session-level `not_found`/`expired` answers to [`ClientError::SessionGone`].
    #[must_use]
    pub fn for_session(self, code: &str) -> Self {
        match &self {
            Self::Api { status: 403 | 404, kind, .. } if kind == "expired" || kind == "not_found" => {
                Self::SessionGone { code: code.to_owned() }
            }
            _ => self,
        }
    }
}
