//! JSON-RPC front door: envelope types, error codes, method registry and
//! the `/mcp` endpoints.

pub mod context;
pub mod endpoint;
pub mod errors;
pub mod handlers;
pub mod registry;
pub mod types;

pub use context::RpcContext;
pub use errors::RpcError;
pub use registry::{MethodHandler, MethodRegistry};
pub use types::{RpcErrorBody, RpcRequest, RpcResponse};

/// Registry with every front-door method registered.
pub fn default_registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    handlers::register_all(&mut registry);
    registry
}
