//! Front-door method handlers.

mod lifecycle;
mod tools;

pub use lifecycle::{InitializeHandler, PingHandler};
pub use tools::{ToolsCallHandler, ToolsListHandler};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::errors::RpcError;
use super::registry::MethodRegistry;
use super::types::RpcRequest;

/// Register every front-door method.
pub fn register_all(registry: &mut MethodRegistry) {
    registry.register("initialize", InitializeHandler);
    registry.register("ping", PingHandler);
    registry.register("tools/list", ToolsListHandler);
    registry.register("tools/call", ToolsCallHandler);
}

/// Methods served without a prior `initialize`.
pub const SESSIONLESS_METHODS: &[&str] = &["initialize", "ping"];

/// Decode params into `T`, treating absent params as `{}`.
pub(crate) fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    let map = RpcRequest::params_object(params)?;
    serde_json::from_value(Value::Object(map))
        .map_err(|e| RpcError::invalid_params(format!("invalid params: {e}")))
}
