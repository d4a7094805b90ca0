//! Store-backed front-door call metrics.
//!
//! Counters are kept per protocol session (`metrics:session:{id}:{counter}`)
//! and globally (`metrics:global:{counter}`) so every instance contributes
//! to and reads the same numbers.

use std::time::Duration;

use relay_core::{ProtocolSessionId, RelayError};
use relay_store::SharedStore;
use serde::Serialize;
use tracing::warn;

const CALLS: &str = "calls";
const ERRORS: &str = "errors";
const TOTAL_LATENCY_MS: &str = "total_latency_ms";
const MAX_LATENCY_MS: &str = "max_latency_ms";

/// Which counter set to read or write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetricsScope {
    /// Across every session.
    Global,
    /// One protocol session.
    Session(ProtocolSessionId),
}

impl MetricsScope {
    fn key(&self, counter: &str) -> String {
        match self {
            MetricsScope::Global => format!("metrics:global:{counter}"),
            MetricsScope::Session(id) => format!("metrics:session:{id}:{counter}"),
        }
    }
}

/// Counter values at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Calls handled.
    pub calls: u64,
    /// Calls that ended in an error.
    pub errors: u64,
    /// Sum of call latencies.
    pub total_latency_ms: u64,
    /// Slowest call.
    pub max_latency_ms: u64,
    /// `total_latency_ms / calls`, zero without calls.
    pub avg_latency_ms: f64,
}

/// Records and reads call counters.
#[derive(Clone)]
pub struct CallMetrics {
    store: SharedStore,
    session_ttl: Duration,
    retention: Duration,
}

impl CallMetrics {
    /// Metrics over `store`. Session counters expire after `session_ttl`,
    /// global ones after `retention`.
    pub fn new(store: SharedStore, session_ttl: Duration, retention: Duration) -> Self {
        Self { store, session_ttl, retention }
    }

    /// Record one call in the global scope and, when known, the session scope.
    ///
    /// Recording failures are logged, never surfaced to the caller.
    pub async fn record(&self, session: Option<&ProtocolSessionId>, latency: Duration, is_error: bool) {
        let latency_ms = i64::try_from(latency.as_millis()).unwrap_or(i64::MAX);
        let mut scopes = vec![(MetricsScope::Global, self.retention)];
        if let Some(id) = session {
            scopes.push((MetricsScope::Session(id.clone()), self.session_ttl));
        }
        for (scope, ttl) in scopes {
            if let Err(e) = self.record_scope(&scope, latency_ms, is_error, ttl).await {
                warn!(error = %e, ?scope, "failed to record call metrics");
            }
        }
    }

    async fn record_scope(
        &self,
        scope: &MetricsScope,
        latency_ms: i64,
        is_error: bool,
        ttl: Duration,
    ) -> Result<(), RelayError> {
        let _ = self.store.incr_with_ttl(&scope.key(CALLS), 1, ttl).await?;
        if is_error {
            let _ = self.store.incr_with_ttl(&scope.key(ERRORS), 1, ttl).await?;
        }
        let _ = self
            .store
            .incr_with_ttl(&scope.key(TOTAL_LATENCY_MS), latency_ms, ttl)
            .await?;
        let _ = self
            .store
            .max_with_ttl(&scope.key(MAX_LATENCY_MS), latency_ms, ttl)
            .await?;
        // Session counters live as long as the session they describe.
        if let MetricsScope::Session(_) = scope {
            for counter in [CALLS, ERRORS, TOTAL_LATENCY_MS, MAX_LATENCY_MS] {
                let _ = self.store.expire(&scope.key(counter), ttl).await?;
            }
        }
        Ok(())
    }

    /// Current counters for a scope. Missing counters read as zero.
    pub async fn snapshot(&self, scope: &MetricsScope) -> Result<MetricsSnapshot, RelayError> {
        let calls = self.read(scope, CALLS).await?;
        let errors = self.read(scope, ERRORS).await?;
        let total_latency_ms = self.read(scope, TOTAL_LATENCY_MS).await?;
        let max_latency_ms = self.read(scope, MAX_LATENCY_MS).await?;
        #[allow(clippy::cast_precision_loss)]
        let avg_latency_ms = if calls == 0 {
            0.0
        } else {
            total_latency_ms as f64 / calls as f64
        };
        Ok(MetricsSnapshot { calls, errors, total_latency_ms, max_latency_ms, avg_latency_ms })
    }

    async fn read(&self, scope: &MetricsScope, counter: &str) -> Result<u64, RelayError> {
        Ok(self
            .store
            .get(&scope.key(counter))
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(0))
    }
}
