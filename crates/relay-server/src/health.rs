//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Store section of the health response.
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    /// Backend name (`memory`, `sqlite`).
    pub backend: &'static str,
    /// Whether the last ping succeeded.
    pub reachable: bool,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"degraded"` when the store is unreachable.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Shared store state.
    pub store: StoreHealth,
}

impl HealthResponse {
    /// Whether the instance can serve traffic.
    pub fn is_ok(&self) -> bool {
        self.store.reachable
    }
}

/// Build a health response from the store ping result.
pub fn health_check(start_time: Instant, backend: &'static str, reachable: bool) -> HealthResponse {
    HealthResponse {
        status: if reachable { "ok" } else { "degraded" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        store: StoreHealth { backend, reachable },
    }
}
