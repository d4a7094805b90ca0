//! # relay-server
//!
//! Axum HTTP surface over [`relay_engine::Relay`].
//!
//! - Pairing session endpoints and tool manifests with version negotiation
//! - Broker endpoints: submit, drain, complete and poll
//! - Server-sent event dispatcher with the polling endpoint as fallback
//! - JSON-RPC front door at `/mcp` with header validation, resumption and call metrics
//! - Health, Prometheus exposition and graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod api;
pub mod error;
pub mod extract;
pub mod headers;
pub mod health;
pub mod rpc;
pub mod server;
pub mod shutdown;

pub use error::ApiError;
pub use server::{AppState, RelayServer};
pub use shutdown::{ShutdownCoordinator, ShutdownReport, StreamLease};
