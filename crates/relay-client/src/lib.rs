//! # relay-client
//!
//! The executor side of the relay.
//!
//! - [`RelayClient`]: typed calls for the REST surface
//! - [`RequestSource`]: one interface over the event stream ([`SseSource`]),
//!   queue polling ([`PollingSource`]) and the two combined ([`AdaptiveSource`])
//! - [`run_bridge`]: feeds requests to a [`ToolExecutor`] and submits results

#![deny(unsafe_code)]

pub mod backoff;
pub mod bridge;
pub mod client;
pub mod error;
pub mod source;
pub mod sse;

pub use backoff::Backoff;
pub use bridge::{BridgeExit, BridgeStats, ToolExecutor, run_bridge};
pub use client::{Ack, CreatedSession, EventStream, PolledResponse, RelayClient, SessionStatus};
pub use error::ClientError;
pub use source::{AdaptiveSource, PollingSource, RequestSource, SseSource};
pub use sse::SseEvent;
