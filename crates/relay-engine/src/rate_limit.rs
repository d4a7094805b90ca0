//! Fixed-window rate limiting over the shared store.
//!
//! One counter per `(scope, actor)` under `ratelimit:{scope}:{actor}`. The
//! first increment in a window sets the key's expiry; later increments do
//! not extend it, so the window resets when the key lapses.

use std::time::Duration;

use metrics::counter;
use relay_core::RelayError;
use relay_settings::RateLimitRule;
use relay_store::SharedStore;
use relay_telemetry::metrics::RATE_LIMITED_TOTAL;
use tracing::{debug, instrument};

/// Governed operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// `POST /api/sessions`, per source address.
    SessionCreate,
    /// `POST /api/request`, per source address and pairing code.
    RequestSubmit,
    /// `POST /mcp`, per protocol session.
    ProtocolCall,
}

impl Scope {
    /// Key segment and metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::SessionCreate => "session-create",
            Scope::RequestSubmit => "request-submit",
            Scope::ProtocolCall => "protocol-call",
        }
    }
}

/// Result of a rate-limit check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Call admitted; `remaining` more fit in this window.
    Allowed {
        /// Calls left in the window.
        remaining: u64,
    },
    /// Quota exhausted until the window resets.
    Denied {
        /// Time until the window resets.
        retry_after: Duration,
    },
}

/// Store-backed fixed-window limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: SharedStore,
}

impl RateLimiter {
    /// Limiter over `store`.
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Store key for a scope and actor.
    pub fn key(scope: Scope, actor: &str) -> String {
        format!("ratelimit:{}:{actor}", scope.as_str())
    }

    /// Count one call and decide whether it is admitted.
    #[instrument(skip(self, scope), fields(scope = scope.as_str()))]
    pub async fn check(
        &self,
        scope: Scope,
        actor: &str,
        rule: RateLimitRule,
    ) -> Result<Decision, RelayError> {
        let counter = self
            .store
            .incr_with_ttl(&Self::key(scope, actor), 1, rule.window())
            .await?;
        let count = u64::try_from(counter.value).unwrap_or(0);
        if count > rule.limit {
            let retry_after = counter.ttl_remaining.max(Duration::from_secs(1));
            debug!(count, limit = rule.limit, ?retry_after, "rate limit exceeded");
            Ok(Decision::Denied { retry_after })
        } else {
            Ok(Decision::Allowed { remaining: rule.limit - count })
        }
    }

    /// Like [`RateLimiter::check`] but turns a denial into
    /// [`RelayError::RateLimited`].
    pub async fn enforce(
        &self,
        scope: Scope,
        actor: &str,
        rule: RateLimitRule,
    ) -> Result<u64, RelayError> {
        match self.check(scope, actor, rule).await? {
            Decision::Allowed { remaining } => Ok(remaining),
            Decision::Denied { retry_after } => {
                counter!(RATE_LIMITED_TOTAL, "scope" => scope.as_str()).increment(1);
                Err(RelayError::RateLimited { retry_after })
            }
        }
    }
}
