//! Prometheus recorder and metric names.

pub use metrics_exporter_prometheus::PrometheusHandle;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::TelemetryError;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `GET /metrics/prometheus`.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::Recorder(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names shared across crates.

/// Front-door calls (counter, labels: method).
pub const RPC_REQUESTS_TOTAL: &str = "relay_rpc_requests_total";
/// Front-door failures (counter, labels: method, kind).
pub const RPC_ERRORS_TOTAL: &str = "relay_rpc_errors_total";
/// Front-door latency (histogram, labels: method).
pub const RPC_REQUEST_DURATION_SECONDS: &str = "relay_rpc_request_duration_seconds";
/// Event streams opened (counter).
pub const SSE_STREAMS_TOTAL: &str = "relay_sse_streams_total";
/// Tool requests delivered over streams or drain polls (counter, labels: transport).
pub const REQUESTS_DISPATCHED_TOTAL: &str = "relay_requests_dispatched_total";
/// Pairing sessions created (counter).
pub const SESSIONS_CREATED_TOTAL: &str = "relay_sessions_created_total";
/// Calls rejected by a rate limit (counter, labels: scope).
pub const RATE_LIMITED_TOTAL: &str = "relay_rate_limited_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_names_are_prefixed_snake_case() {
        for name in [
            RPC_REQUESTS_TOTAL,
            RPC_ERRORS_TOTAL,
            RPC_REQUEST_DURATION_SECONDS,
            SSE_STREAMS_TOTAL,
            REQUESTS_DISPATCHED_TOTAL,
            SESSIONS_CREATED_TOTAL,
            RATE_LIMITED_TOTAL,
        ] {
            assert!(name.starts_with("relay_"), "{name}");
            assert!(name.chars().all(|c| c.is_ascii_lowercase() || c == '_'), "{name}");
        }
    }
}
