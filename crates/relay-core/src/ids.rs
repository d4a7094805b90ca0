//! Branded identifiers.
//!
//! Pairing codes and correlation ids are validated newtypes; server-minted
//! ids use the prefixed UUID v7 scheme below.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::RelayError;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a new time-ordered id.
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Wrap an existing value without validation.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the raw string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(
    /// Identity of a front-door protocol session (`Mcp-Session-Id`).
    ProtocolSessionId,
    "mcp"
);
branded_id!(
    /// Identity of one SSE response, used only for log correlation.
    StreamId,
    "stream"
);

/// Minimum accepted length of a client-supplied protocol session id.
pub const PROTOCOL_SESSION_ID_MIN_LEN: usize = 8;
/// Maximum accepted length of a client-supplied protocol session id.
pub const PROTOCOL_SESSION_ID_MAX_LEN: usize = 128;

impl ProtocolSessionId {
    /// Parse a client-supplied id: 8–128 chars of `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let len_ok = (PROTOCOL_SESSION_ID_MIN_LEN..=PROTOCOL_SESSION_ID_MAX_LEN).contains(&raw.len());
        let chars_ok = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if len_ok && chars_ok {
            Ok(Self(raw.to_owned()))
        } else {
            Err(RelayError::invalid_field(
                "sessionId",
                format!(
                    "must be {PROTOCOL_SESSION_ID_MIN_LEN}-{PROTOCOL_SESSION_ID_MAX_LEN} characters of [A-Za-z0-9_-]"
                ),
            ))
        }
    }
}

/// Maximum accepted length of a correlation id.
pub const CORRELATION_ID_MAX_LEN: usize = 128;

/// Caller-supplied idempotency key joining a queued request to its response.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Validate a correlation id: 1–128 chars of `[A-Za-z0-9._:-]`.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let chars_ok = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'));
        if raw.is_empty() || raw.len() > CORRELATION_ID_MAX_LEN || !chars_ok {
            return Err(RelayError::invalid_field(
                "requestId",
                format!("must be 1-{CORRELATION_ID_MAX_LEN} characters of [A-Za-z0-9._:-]"),
            ));
        }
        Ok(Self(raw.to_owned()))
    }

    /// Mint a fresh id for requests originating at the front door.
    pub fn generate() -> Self {
        Self(format!("req_{}", Uuid::now_v7()))
    }

    /// Borrow the raw string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = RelayError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CorrelationId {
    type Error = RelayError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}
