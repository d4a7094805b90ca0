//! Pairing-session lifecycle.
//!
//! A session is one store record under `session:{code}` whose expiry equals
//! the session TTL. Creation draws codes until `set_if_absent` succeeds.

use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use relay_core::{RelayError, Session, SessionCode};
use relay_settings::{RateLimitRule, SessionSettings};
use relay_store::{SharedStore, StoreExt};
use relay_telemetry::metrics::SESSIONS_CREATED_TOTAL;
use tracing::{info, instrument, warn};

use crate::rate_limit::{RateLimiter, Scope};

/// Store key for a pairing session.
pub fn session_key(code: &SessionCode) -> String {
    format!("session:{code}")
}

/// Snapshot returned by [`SessionManager::info`].
#[derive(Clone, Debug, PartialEq)]
pub struct SessionInfo {
    /// The stored session.
    pub session: Session,
    /// Time until the store drops it.
    pub ttl_remaining: Duration,
}

/// Creates, validates and deactivates pairing sessions.
#[derive(Clone)]
pub struct SessionManager {
    store: SharedStore,
    limiter: RateLimiter,
    settings: SessionSettings,
    create_rule: RateLimitRule,
}

impl SessionManager {
    /// Manager over `store`.
    pub fn new(
        store: SharedStore,
        limiter: RateLimiter,
        settings: SessionSettings,
        create_rule: RateLimitRule,
    ) -> Self {
        Self { store, limiter, settings, create_rule }
    }

    /// Session TTL.
    pub fn ttl(&self) -> Duration {
        self.settings.ttl()
    }

    /// Create a session for a caller at `source_address`.
    #[instrument(skip(self, capabilities))]
    pub async fn create(
        &self,
        source_address: &str,
        capabilities: Vec<String>,
    ) -> Result<Session, RelayError> {
        let _ = self
            .limiter
            .enforce(Scope::SessionCreate, source_address, self.create_rule)
            .await?;

        let ttl = self.ttl();
        let lifetime = chrono::Duration::from_std(ttl)
            .map_err(|e| RelayError::Internal(format!("session ttl: {e}")))?;

        for attempt in 1..=self.settings.code_attempts {
            let code = SessionCode::generate(&mut rand::rng());
            let now = Utc::now();
            let session = Session {
                code: code.clone(),
                created_at: now,
                expires_at: now + lifetime,
                source_address: Some(source_address.to_owned()),
                active: true,
                capabilities: capabilities.clone(),
            };
            let value = serde_json::to_value(&session)
                .map_err(|e| RelayError::Internal(e.to_string()))?;
            if self
                .store
                .set_if_absent(&session_key(&code), &value, ttl)
                .await?
                .is_none()
            {
                counter!(SESSIONS_CREATED_TOTAL).increment(1);
                info!(session_code = %code, attempt, "session created");
                return Ok(session);
            }
            warn!(attempt, "pairing code collision, drawing again");
        }

        Err(RelayError::Internal(format!(
            "no free pairing code after {} attempts",
            self.settings.code_attempts
        )))
    }

    /// Look up a live session.
    ///
    /// Missing → `not_found`; deactivated or past `expiresAt` → `expired`.
    #[instrument(skip(self), fields(session_code = %code))]
    pub async fn validate(&self, code: &SessionCode) -> Result<Session, RelayError> {
        let session: Session = self
            .store
            .get_as(&session_key(code))
            .await?
            .ok_or_else(|| RelayError::NotFound { resource: "session", id: code.to_string() })?;
        if session.is_live(Utc::now()) {
            Ok(session)
        } else {
            Err(RelayError::Expired { resource: "session", id: code.to_string() })
        }
    }

    /// Parse raw input, then [`SessionManager::validate`]. Malformed codes
    /// never reach the store.
    pub async fn validate_raw(&self, raw: &str) -> Result<Session, RelayError> {
        let code = SessionCode::parse(raw)?;
        self.validate(&code).await
    }

    /// Session plus its remaining store lifetime.
    pub async fn info(&self, code: &SessionCode) -> Result<SessionInfo, RelayError> {
        let key = session_key(code);
        let session: Session = self
            .store
            .get_as(&key)
            .await?
            .ok_or_else(|| RelayError::NotFound { resource: "session", id: code.to_string() })?;
        let ttl_remaining = self.store.ttl(&key).await?.unwrap_or_default();
        Ok(SessionInfo { session, ttl_remaining })
    }

    /// Mark a session inactive. Later validations report `expired`.
    #[instrument(skip(self), fields(session_code = %code))]
    pub async fn deactivate(&self, code: &SessionCode) -> Result<(), RelayError> {
        let key = session_key(code);
        let mut session: Session = self
            .store
            .get_as(&key)
            .await?
            .ok_or_else(|| RelayError::NotFound { resource: "session", id: code.to_string() })?;
        session.active = false;
        let value =
            serde_json::to_value(&session).map_err(|e| RelayError::Internal(e.to_string()))?;
        if !self.store.update_keep_ttl(&key, &value).await? {
            return Err(RelayError::NotFound { resource: "session", id: code.to_string() });
        }
        info!("session deactivated");
        Ok(())
    }
}
