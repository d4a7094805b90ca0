//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a partial
//! JSON file only needs the keys it changes.

mod relay;
mod server;

pub use relay::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the relay.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "session": { "ttlMinutes": 15 },
///   "store": { "backend": "sqlite", "path": "/var/lib/relay/relay.db" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Pairing sessions.
    pub session: SessionSettings,
    /// Request/response broker.
    pub broker: BrokerSettings,
    /// Event stream dispatcher.
    pub stream: StreamSettings,
    /// Rate-limit quotas.
    pub rate_limits: RateLimitSettings,
    /// Protocol front door.
    pub protocol: ProtocolSettings,
    /// Shared store.
    pub store: StoreSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Check ranges and cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let ttl = self.session.ttl_minutes;
        if !(MIN_SESSION_TTL_MINUTES..=MAX_SESSION_TTL_MINUTES).contains(&ttl) {
            return Err(SettingsError::InvalidValue(format!(
                "session.ttlMinutes must be {MIN_SESSION_TTL_MINUTES}-{MAX_SESSION_TTL_MINUTES}, got {ttl}"
            )));
        }
        if self.session.code_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "session.codeAttempts must be at least 1".to_string(),
            ));
        }
        if self.broker.request_ttl_secs == 0 || self.broker.request_ttl() > self.session.ttl() {
            return Err(SettingsError::InvalidValue(format!(
                "broker.requestTtlSecs must be 1-{}, got {}",
                self.session.ttl().as_secs(),
                self.broker.request_ttl_secs
            )));
        }
        if self.broker.poll_interval_ms == 0 || self.stream.tick_ms == 0 || self.stream.heartbeat_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "poll and stream intervals must be non-zero".to_string(),
            ));
        }
        if self.protocol.supported_versions.is_empty() {
            return Err(SettingsError::InvalidValue(
                "protocol.supportedVersions must not be empty".to_string(),
            ));
        }
        for (name, rule) in [
            ("sessionCreate", self.rate_limits.session_create),
            ("requestSubmit", self.rate_limits.request_submit),
            ("protocolCall", self.rate_limits.protocol_call),
        ] {
            if rule.limit == 0 || rule.window_secs == 0 {
                return Err(SettingsError::InvalidValue(format!(
                    "rateLimits.{name} needs a non-zero limit and window"
                )));
            }
        }
        Ok(())
    }
}
