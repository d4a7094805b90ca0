//! # relay-telemetry
//!
//! Tracing subscriber setup and the per-instance Prometheus recorder.
//!
//! Session and global call counters that must survive across instances live
//! in the shared store (see `relay-engine`); the recorder here only covers
//! what one process observes.

#![deny(unsafe_code)]

pub mod metrics;

pub use metrics::{PrometheusHandle, install_recorder, render};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default filter directive. Overridden by `RUST_LOG`.
    pub level: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    /// Install the global Prometheus recorder.
    pub prometheus: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            prometheus: true,
        }
    }
}

/// Telemetry setup failures.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    #[error("tracing subscriber already installed: {0}")]
    Subscriber(String),
    /// The Prometheus recorder could not be installed.
    #[error("metrics recorder: {0}")]
    Recorder(String),
}

/// Handles kept alive for the life of the process.
#[derive(Debug, Default)]
pub struct TelemetryGuard {
    prometheus: Option<PrometheusHandle>,
}

impl TelemetryGuard {
    /// The Prometheus handle, when the recorder was installed.
    pub fn prometheus(&self) -> Option<&PrometheusHandle> {
        self.prometheus.as_ref()
    }
}

/// Build the filter: `RUST_LOG` when set, else the configured directive.
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging and metrics. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let filter = env_filter(&config.level);

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    let prometheus = if config.prometheus {
        Some(install_recorder()?)
    } else {
        None
    };

    Ok(TelemetryGuard { prometheus })
}
