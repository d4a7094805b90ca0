//! Records persisted in the shared store and exchanged over the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::code::SessionCode;
use crate::errors::RelayError;
use crate::ids::{CorrelationId, ProtocolSessionId};

/// A pairing session between one LLM-side client and one browser tab.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Pairing code.
    pub code: SessionCode,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Absolute expiry. Checked on every validation.
    pub expires_at: DateTime<Utc>,
    /// Address the create call came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
    /// Cleared by an explicit deactivation.
    pub active: bool,
    /// Free-form capability tags announced at creation.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Session {
    /// Whether the session can still be used at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at > now
    }

    /// Whole seconds until expiry, zero once elapsed.
    pub fn ttl_remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.expires_at - now).num_seconds()).unwrap_or(0)
    }
}

/// A queued tool invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
    /// Idempotency key joining this request to its response.
    pub correlation_id: CorrelationId,
    /// Session the request belongs to.
    pub session_code: SessionCode,
    /// Tool to run in the browser.
    pub tool_name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Value,
    /// When the request was first queued.
    pub enqueued_at: DateTime<Utc>,
}

impl ToolRequest {
    /// Whether `other` carries the same invocation, ignoring timestamps.
    pub fn same_payload(&self, other: &Self) -> bool {
        self.session_code == other.session_code
            && self.tool_name == other.tool_name
            && self.arguments == other.arguments
    }
}

/// Shape a queued request takes on the stream and the drain endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispatchedRequest {
    /// Correlation id.
    pub id: CorrelationId,
    /// Tool name.
    pub tool: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Value,
}

impl From<&ToolRequest> for DispatchedRequest {
    fn from(req: &ToolRequest) -> Self {
        Self {
            id: req.correlation_id.clone(),
            tool: req.tool_name.clone(),
            arguments: req.arguments.clone(),
        }
    }
}

/// Terminal outcome of a tool invocation: exactly one of result or error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Executor succeeded.
    Result(Value),
    /// Executor reported a failure.
    Error(Value),
}

impl Outcome {
    /// Build from the optional wire fields. JSON `null` counts as absent.
    pub fn from_parts(result: Option<Value>, error: Option<Value>) -> Result<Self, RelayError> {
        let result = result.filter(|v| !v.is_null());
        let error = error.filter(|v| !v.is_null());
        match (result, error) {
            (Some(r), None) => Ok(Self::Result(r)),
            (None, Some(e)) => Ok(Self::Error(e)),
            (Some(_), Some(_)) => Err(RelayError::invalid_field(
                "result",
                "exactly one of result or error is allowed, got both",
            )),
            (None, None) => Err(RelayError::invalid_field(
                "result",
                "exactly one of result or error is required, got neither",
            )),
        }
    }

    /// Whether this is an error outcome.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Stored response for a correlation id. Written once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    /// Correlation id.
    pub correlation_id: CorrelationId,
    /// Result or error.
    #[serde(flatten)]
    pub outcome: Outcome,
    /// When the response was stored.
    pub completed_at: DateTime<Utc>,
}

/// One tool in a manifest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human readable description for the LLM.
    pub description: String,
    /// JSON Schema for the arguments object.
    pub input_schema: Value,
}

/// Client identity announced through the `X-Client-Info` header.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version, when given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Any other fields the client sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Lifecycle of a front-door session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolStatus {
    /// Initialized and within its TTL.
    Active,
    /// TTL elapsed.
    Expired,
}

/// Front-door session persisted under `protocol:{sessionId}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolSession {
    /// Session id echoed in `Mcp-Session-Id`.
    pub session_id: ProtocolSessionId,
    /// Client identity from initialize, if sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<ClientInfo>,
    /// Negotiated protocol version.
    pub protocol_version: String,
    /// Lifecycle status.
    pub status: ProtocolStatus,
    /// Pairing code `tools/call` targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<SessionCode>,
    /// Initialize time.
    pub created_at: DateTime<Utc>,
    /// Refreshed on every call.
    pub last_seen_at: DateTime<Utc>,
}
