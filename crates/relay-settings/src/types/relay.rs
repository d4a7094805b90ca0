//! Settings for sessions, the broker, the event stream, rate limits and the
//! protocol front door.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shortest accepted pairing-session TTL.
pub const MIN_SESSION_TTL_MINUTES: u64 = 10;
/// Longest accepted pairing-session TTL.
pub const MAX_SESSION_TTL_MINUTES: u64 = 60;

/// Pairing-session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Session lifetime in minutes (10 to 60).
    pub ttl_minutes: u64,
    /// Fresh draws allowed when a generated code is already taken.
    pub code_attempts: u32,
}

impl SessionSettings {
    /// Session lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes * 60)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_minutes: 30,
            code_attempts: 5,
        }
    }
}

/// Request/response broker settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Lifetime of queued requests and stored responses, in seconds.
    pub request_ttl_secs: u64,
    /// Bounded wait of a front-door `tools/call`, in milliseconds.
    pub call_timeout_ms: u64,
    /// Store re-poll interval while waiting, in milliseconds.
    pub poll_interval_ms: u64,
}

impl BrokerSettings {
    /// Request and response lifetime.
    pub fn request_ttl(&self) -> Duration {
        Duration::from_secs(self.request_ttl_secs)
    }

    /// Bounded wait of `tools/call`.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Re-poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            request_ttl_secs: 600,
            call_timeout_ms: 25_000,
            poll_interval_ms: 500,
        }
    }
}

/// Server-sent event stream settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Drain interval, in milliseconds.
    pub tick_ms: u64,
    /// Heartbeat interval, in milliseconds.
    pub heartbeat_ms: u64,
    /// Stream lifetime before the client must reconnect, in milliseconds.
    pub max_duration_ms: u64,
    /// Reconnect hint sent in the SSE `retry` field, in milliseconds.
    pub retry_hint_ms: u64,
}

impl StreamSettings {
    /// Drain interval.
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Heartbeat interval.
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    /// Stream lifetime.
    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    /// Reconnect hint.
    pub fn retry_hint(&self) -> Duration {
        Duration::from_millis(self.retry_hint_ms)
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            heartbeat_ms: 20_000,
            max_duration_ms: 25_000,
            retry_hint_ms: 1_000,
        }
    }
}

/// Quota for one governed operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitRule {
    /// Calls allowed per window.
    pub limit: u64,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl RateLimitRule {
    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Quotas per governed operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitSettings {
    /// Session creation, per source address.
    pub session_create: RateLimitRule,
    /// Request submission, per source address and pairing code.
    pub request_submit: RateLimitRule,
    /// Front-door calls, per protocol session.
    pub protocol_call: RateLimitRule,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            session_create: RateLimitRule { limit: 10, window_secs: 60 },
            request_submit: RateLimitRule { limit: 120, window_secs: 60 },
            protocol_call: RateLimitRule { limit: 60, window_secs: 60 },
        }
    }
}

/// Protocol front-door settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolSettings {
    /// Accepted `MCP-Protocol-Version` values. The first is preferred.
    pub supported_versions: Vec<String>,
    /// Sliding lifetime of a protocol session, in seconds.
    pub session_ttl_secs: u64,
    /// Retention of global metric counters, in seconds.
    pub metrics_retention_secs: u64,
    /// Server name reported by `initialize`.
    pub server_name: String,
}

impl ProtocolSettings {
    /// Protocol session lifetime.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Global metric retention.
    pub fn metrics_retention(&self) -> Duration {
        Duration::from_secs(self.metrics_retention_secs)
    }
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            supported_versions: vec![
                "2025-06-18".to_string(),
                "2025-03-26".to_string(),
                "2024-11-05".to_string(),
            ],
            session_ttl_secs: 3_600,
            metrics_retention_secs: 86_400,
            server_name: "tool-relay".to_string(),
        }
    }
}
