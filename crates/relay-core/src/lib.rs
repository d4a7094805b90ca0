//! # relay-core
//!
//! Shared vocabulary for the tool relay:
//!
//! - **Pairing codes**: `SessionCode`, 8 symbols of base32
//! - **Identifiers**: `CorrelationId`, `ProtocolSessionId`, `StreamId`
//! - **Records**: sessions, tool requests/responses, manifests, protocol sessions
//! - **Errors**: `RelayError` taxonomy shared by every surface

#![deny(unsafe_code)]

pub mod code;
pub mod errors;
pub mod ids;
pub mod types;

pub use code::SessionCode;
pub use errors::{FieldError, RelayError};
pub use ids::{CorrelationId, ProtocolSessionId, StreamId};
pub use types::{
    ClientInfo, DispatchedRequest, Outcome, ProtocolSession, ProtocolStatus, Session,
    ToolDefinition, ToolRequest, ToolResponse,
};
